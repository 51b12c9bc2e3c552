mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lectern::prompt::DEFAULT_CONTEXT_CHARS;
use lectern::retrieve::{DEFAULT_DENSE_WEIGHT, DEFAULT_SPARSE_WEIGHT};

#[derive(Parser)]
#[command(name = "lectern", about = "Ask questions of your PDF textbooks, locally", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDFs and build a hybrid retrieval index
    Ingest {
        /// One or more input PDF paths
        #[arg(long = "pdf", required = true, num_args = 1..)]
        pdfs: Vec<PathBuf>,
        /// Output index directory
        #[arg(long)]
        out: PathBuf,
        /// Embedding model override
        #[arg(long)]
        embed_model: Option<String>,
    },

    /// Ask a question against an existing index
    Ask {
        /// Index directory
        #[arg(long)]
        index: PathBuf,
        /// The question
        #[arg(long, short = 'q')]
        question: String,
        /// Top-k chunks to retrieve (default: LECTERN_TOP_K or 6)
        #[arg(long)]
        top_k: Option<usize>,
        /// Only print retrieved passages, skip generation
        #[arg(long)]
        retrieval_only: bool,
        /// Dense retrieval weight
        #[arg(long, default_value_t = DEFAULT_DENSE_WEIGHT)]
        dense_weight: f32,
        /// Sparse retrieval weight
        #[arg(long, default_value_t = DEFAULT_SPARSE_WEIGHT)]
        sparse_weight: f32,
        /// Ollama generation model override
        #[arg(long)]
        model: Option<String>,
        /// Embedding model override
        #[arg(long)]
        embed_model: Option<String>,
        /// Total character budget for prompt context
        #[arg(long, default_value_t = DEFAULT_CONTEXT_CHARS)]
        context_chars: usize,
    },

    /// Run a labeled question set and save CSV metrics
    Eval {
        /// Index directory
        #[arg(long)]
        index: PathBuf,
        /// Eval JSONL path
        #[arg(long)]
        eval: PathBuf,
        /// Output CSV path
        #[arg(long)]
        out: PathBuf,
        /// Top-k for retrieval (default: LECTERN_TOP_K or 6)
        #[arg(long)]
        top_k: Option<usize>,
    },
}

/// Top-k default: `LECTERN_TOP_K`, else 6. Invalid values fall back.
fn default_top_k() -> usize {
    std::env::var("LECTERN_TOP_K")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(6)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ingest {
            pdfs,
            out,
            embed_model,
        } => commands::ingest::run(&pdfs, &out, embed_model.as_deref()),
        Command::Ask {
            index,
            question,
            top_k,
            retrieval_only,
            dense_weight,
            sparse_weight,
            model,
            embed_model,
            context_chars,
        } => commands::ask::run(commands::ask::AskArgs {
            index,
            question,
            top_k: top_k.unwrap_or_else(default_top_k),
            retrieval_only,
            dense_weight,
            sparse_weight,
            model,
            embed_model,
            context_chars,
        }),
        Command::Eval {
            index,
            eval,
            out,
            top_k,
        } => commands::eval::run(&index, &eval, &out, top_k.unwrap_or_else(default_top_k)),
    }
}
