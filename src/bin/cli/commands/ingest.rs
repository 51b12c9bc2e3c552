use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use lectern::chunking::ChunkingConfig;
use lectern::index::build_index;

pub fn run(pdfs: &[PathBuf], out: &Path, embed_model: Option<&str>) -> Result<()> {
    build_index(pdfs, out, embed_model, &ChunkingConfig::default())
        .context("Failed to build index")?;
    println!("Index created at: {}", out.display());
    Ok(())
}
