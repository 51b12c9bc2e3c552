use std::path::PathBuf;

use anyhow::{Context, Result};

use lectern::index::load_index;
use lectern::llm::OllamaClient;
use lectern::models::RetrievedChunk;
use lectern::prompt::{build_answer_prompt, format_citation};
use lectern::retrieve::hybrid_retrieve;

pub struct AskArgs {
    pub index: PathBuf,
    pub question: String,
    pub top_k: usize,
    pub retrieval_only: bool,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub model: Option<String>,
    pub embed_model: Option<String>,
    pub context_chars: usize,
}

fn source_line(r: &RetrievedChunk) -> String {
    let section = r.chunk.section_title.as_deref().unwrap_or("N/A");
    format!(
        "- {} | {} | doc={} | section={}",
        format_citation(&r.chunk),
        r.chunk.chunk_id,
        r.chunk.book_title,
        section
    )
}

pub fn run(args: AskArgs) -> Result<()> {
    let index = load_index(&args.index, args.embed_model.as_deref())
        .context("Failed to load index")?;
    let retrieved = hybrid_retrieve(
        &index,
        &args.question,
        args.top_k,
        args.dense_weight,
        args.sparse_weight,
    )
    .context("Retrieval failed")?;

    if args.retrieval_only {
        println!("Retrieved passages:\n");
        for r in &retrieved {
            let section = r.chunk.section_title.as_deref().unwrap_or("N/A");
            println!(
                "{}. {} | {} | doc={} | section={} | score={:.3}",
                r.rank,
                format_citation(&r.chunk),
                r.chunk.chunk_id,
                r.chunk.book_title,
                section,
                r.hybrid_score
            );
            println!("{}", r.chunk.text);
            println!("{}", "-".repeat(80));
        }
        return Ok(());
    }

    let mut llm = OllamaClient::create(None, args.model.as_deref())
        .context("Failed to create Ollama client")?;
    let prompt = build_answer_prompt(&args.question, &retrieved, args.context_chars);
    let answer = llm.generate(&prompt).context("Generation failed")?;

    println!("{}", answer);
    // The source list covers everything retrieved, including chunks the
    // prompt budget dropped.
    println!("\nSources:");
    for r in &retrieved {
        println!("{}", source_line(r));
    }
    Ok(())
}
