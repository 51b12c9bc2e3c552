use std::path::Path;

use anyhow::{Context, Result};

use lectern::eval::run_eval;
use lectern::index::load_index;
use lectern::llm::OllamaClient;
use lectern::prompt::DEFAULT_CONTEXT_CHARS;

pub fn run(index_dir: &Path, eval_jsonl: &Path, out_csv: &Path, top_k: usize) -> Result<()> {
    let index = load_index(index_dir, None).context("Failed to load index")?;
    let mut llm =
        OllamaClient::create(None, None).context("Failed to create Ollama client")?;
    run_eval(
        &index,
        eval_jsonl,
        out_csv,
        top_k,
        DEFAULT_CONTEXT_CHARS,
        &mut |prompt| llm.generate(prompt),
    )
    .context("Eval run failed")?;
    println!("Saved eval results to: {}", out_csv.display());
    Ok(())
}
