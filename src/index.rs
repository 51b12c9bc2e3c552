//! Hybrid index build, persistence, and reload.
//!
//! An index directory holds four artifacts plus the embedding cache:
//!
//! - `chunks.jsonl` — one chunk per line, final order
//! - `vectors.bin` — dense vectors, row i belongs to chunk i
//! - `bm25_tokens.json` — token lists, entry i belongs to chunk i
//! - `meta.json` — creation time, documents, chunk count, embed model
//! - `emb_cache.sqlite3` — embedding cache, reused across rebuilds
//!
//! The three row-aligned structures are only ever handed out bundled in a
//! [`LoadedIndex`], whose constructor enforces equal lengths. An index is
//! an immutable snapshot; adding a document means rebuilding from the
//! full document set.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use crate::chunking::{build_chunks, ChunkingConfig};
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder, EmbeddingCache, EmbeddingError};
use crate::ingest::{self, IngestError};
use crate::models::{make_chunk_id, Chunk, DocumentMeta, IndexMeta};

pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const BM25_TOKENS_FILE: &str = "bm25_tokens.json";
pub const META_FILE: &str = "meta.json";
pub const CACHE_FILE: &str = "emb_cache.sqlite3";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("At least one PDF path is required")]
    NoDocuments,

    #[error("No chunks were created from the provided PDF(s)")]
    NoChunks,

    #[error("Missing index artifact: {0}")]
    MissingArtifact(String),

    #[error("Corrupt index artifact {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("Index rows misaligned: {chunks} chunks, {vectors} vectors, {token_lists} token lists")]
    Misaligned {
        chunks: usize,
        vectors: usize,
        token_lists: usize,
    },
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Flat inner-product vector store, one row per chunk in chunk order.
///
/// Vectors are unit-norm on the way in, so the inner product is cosine
/// similarity.
pub struct DenseIndex {
    dim: usize,
    data: Vec<f32>,
}

impl DenseIndex {
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(vectors.len() * dim);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(IndexError::Corrupt {
                    path: VECTORS_FILE.to_string(),
                    detail: format!("row {} has dim {}, expected {}", i, v.len(), dim),
                });
            }
            data.extend_from_slice(v);
        }
        Ok(Self { dim, data })
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`n` rows by inner product with `query`, descending. Ties keep
    /// the lower row first.
    pub fn search(&self, query: &[f32], n: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|row| {
                let start = row * self.dim;
                let dot: f32 = self.data[start..start + self.dim]
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (row, dot)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }

    /// Write as `[u32 rows][u32 dim]` followed by f32 little-endian rows.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(fs::File::create(path)?);
        w.write_all(&(self.len() as u32).to_le_bytes())?;
        w.write_all(&(self.dim as u32).to_le_bytes())?;
        w.write_all(&vec_to_blob(&self.data))?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(fs::File::open(path)?);
        let mut header = [0u8; 8];
        r.read_exact(&mut header)?;
        let rows = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let dim = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        let data = blob_to_vec(&bytes);
        if data.len() != rows * dim {
            return Err(IndexError::Corrupt {
                path: path.display().to_string(),
                detail: format!("expected {} values, found {}", rows * dim, data.len()),
            });
        }
        Ok(Self { dim, data })
    }
}

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// Okapi BM25 scorer over a pre-tokenized corpus.
///
/// Built from the persisted token lists so the build-time tokenization is
/// reproduced exactly instead of redone.
pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn build(corpus: &[Vec<String>]) -> Self {
        let mut term_freqs: Vec<HashMap<String, usize>> = Vec::with_capacity(corpus.len());
        let mut doc_lens: Vec<usize> = Vec::with_capacity(corpus.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for tokens in corpus {
            let mut tf: HashMap<String, usize> = HashMap::new();
            for t in tokens {
                *tf.entry(t.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(tf);
        }

        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            (total as f32 / doc_lens.len() as f32).max(1e-6)
        };

        Self {
            term_freqs,
            doc_lens,
            doc_freqs,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }

    /// IDF with +1 smoothing: `ln((N - df + 0.5) / (df + 0.5) + 1)`.
    /// Never negative, so common terms degrade gracefully instead of
    /// penalizing documents.
    fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = *self.doc_freqs.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// One score per document, in corpus order.
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];
        if self.is_empty() {
            return scores;
        }
        for term in query_tokens {
            let df = *self.doc_freqs.get(term).unwrap_or(&0);
            if df == 0 {
                continue;
            }
            let idf = self.idf(term);
            for (doc, tf_map) in self.term_freqs.iter().enumerate() {
                let tf = *tf_map.get(term).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let dl = self.doc_lens[doc] as f32;
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / self.avg_doc_len);
                scores[doc] += idf * tf * (BM25_K1 + 1.0) / denom;
            }
        }
        scores
    }
}

/// An index reloaded into queryable form.
///
/// The chunk list, dense rows, and token lists share one ordinal; this
/// type is the only way they travel together, and its constructor is the
/// alignment check.
pub struct LoadedIndex {
    pub out_dir: PathBuf,
    pub chunks: Vec<Chunk>,
    pub dense: DenseIndex,
    pub bm25: Bm25Index,
    pub embedder: Embedder,
    pub meta: IndexMeta,
}

impl std::fmt::Debug for LoadedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedIndex")
            .field("out_dir", &self.out_dir)
            .field("chunks", &self.chunks.len())
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl LoadedIndex {
    pub fn new(
        out_dir: PathBuf,
        chunks: Vec<Chunk>,
        dense: DenseIndex,
        bm25: Bm25Index,
        embedder: Embedder,
        meta: IndexMeta,
    ) -> Result<Self> {
        if chunks.len() != dense.len() || chunks.len() != bm25.len() {
            return Err(IndexError::Misaligned {
                chunks: chunks.len(),
                vectors: dense.len(),
                token_lists: bm25.len(),
            });
        }
        Ok(Self {
            out_dir,
            chunks,
            dense,
            bm25,
            embedder,
            meta,
        })
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

fn write_jsonl(path: &Path, chunks: &[Chunk]) -> Result<()> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    for chunk in chunks {
        serde_json::to_writer(&mut w, chunk)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

fn read_jsonl(path: &Path) -> Result<Vec<Chunk>> {
    let r = BufReader::new(fs::File::open(path)?);
    let mut chunks = Vec::new();
    for line in r.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        chunks.push(serde_json::from_str(&line)?);
    }
    Ok(chunks)
}

/// Ingest, chunk, and renumber the given PDFs.
fn ingest_documents(
    pdf_paths: &[PathBuf],
    config: &ChunkingConfig,
) -> Result<(Vec<Chunk>, Vec<DocumentMeta>)> {
    let mut all_chunks: Vec<Chunk> = Vec::new();
    let mut documents: Vec<DocumentMeta> = Vec::new();

    for pdf_path in pdf_paths {
        let resolved = pdf_path.canonicalize().unwrap_or_else(|_| pdf_path.clone());
        let book_title = resolved
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| resolved.display().to_string());
        let pages = ingest::ingest_pdf(&resolved)?;
        let mut chunks = build_chunks(&pages, &book_title, config);
        for c in &mut chunks {
            c.source_pdf = resolved.display().to_string();
        }
        log::info!("{}: {} pages -> {} chunks", book_title, pages.len(), chunks.len());
        all_chunks.extend(chunks);
        documents.push(DocumentMeta {
            book_title,
            pdf_path: resolved.display().to_string(),
        });
    }

    if all_chunks.is_empty() {
        return Err(IndexError::NoChunks);
    }

    renumber_chunks(&mut all_chunks);

    Ok((all_chunks, documents))
}

/// Assign final, contiguous ids spanning all documents in emission order.
/// Per-document ids from the chunker are provisional until this runs.
pub fn renumber_chunks(chunks: &mut [Chunk]) {
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_id = make_chunk_id(i + 1);
    }
}

/// Build and persist an index from source PDFs.
pub fn build_index(
    pdf_paths: &[PathBuf],
    out_dir: &Path,
    embed_model: Option<&str>,
    config: &ChunkingConfig,
) -> Result<()> {
    let embedder = Embedder::create(embed_model);
    build_index_with(pdf_paths, out_dir, &embedder, config)
}

/// Build with a caller-supplied embedder (test seam).
pub fn build_index_with(
    pdf_paths: &[PathBuf],
    out_dir: &Path,
    embedder: &Embedder,
    config: &ChunkingConfig,
) -> Result<()> {
    if pdf_paths.is_empty() {
        return Err(IndexError::NoDocuments);
    }
    let (chunks, documents) = ingest_documents(pdf_paths, config)?;
    persist_index(chunks, documents, out_dir, embedder)
}

/// Embed finalized chunks and write all index artifacts.
///
/// Artifacts are written to `.tmp` siblings first and renamed into place
/// only after every write succeeds, so a failed build cannot leave a
/// directory that passes the load-time artifact check. The embedding
/// cache is written through regardless; it is shared across rebuilds.
pub fn persist_index(
    chunks: Vec<Chunk>,
    documents: Vec<DocumentMeta>,
    out_dir: &Path,
    embedder: &Embedder,
) -> Result<()> {
    if chunks.is_empty() {
        return Err(IndexError::NoChunks);
    }
    fs::create_dir_all(out_dir)?;

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let embeddings = {
        let cache = EmbeddingCache::open(&out_dir.join(CACHE_FILE))?;
        embedder.encode_many(&texts, &cache)?
        // Cache connection closes here, flushed, even on early return.
    };

    let dense = DenseIndex::from_vectors(embeddings)?;
    let tokenized: Vec<Vec<String>> = texts.iter().map(|t| ingest::tokenize(t)).collect();

    let meta = IndexMeta {
        created_at_utc: Utc::now().to_rfc3339(),
        num_documents: documents.len(),
        documents,
        num_chunks: chunks.len(),
        embed_model: embedder.model_name.clone(),
    };

    let final_paths = [
        out_dir.join(CHUNKS_FILE),
        out_dir.join(VECTORS_FILE),
        out_dir.join(BM25_TOKENS_FILE),
        out_dir.join(META_FILE),
    ];
    let tmp_paths: Vec<PathBuf> = final_paths
        .iter()
        .map(|p| {
            let mut os = p.clone().into_os_string();
            os.push(".tmp");
            PathBuf::from(os)
        })
        .collect();

    write_jsonl(&tmp_paths[0], &chunks)?;
    dense.save(&tmp_paths[1])?;
    fs::write(&tmp_paths[2], serde_json::to_vec(&tokenized)?)?;
    fs::write(&tmp_paths[3], serde_json::to_vec_pretty(&meta)?)?;

    for (tmp, fin) in tmp_paths.iter().zip(final_paths.iter()) {
        fs::rename(tmp, fin)?;
    }

    log::info!(
        "Index build complete at {} ({} chunks)",
        out_dir.display(),
        meta.num_chunks
    );
    Ok(())
}

/// Load a persisted index, failing fast on the first missing artifact.
pub fn load_index(out_dir: &Path, embed_model_override: Option<&str>) -> Result<LoadedIndex> {
    let meta = read_meta(out_dir)?;
    let model = embed_model_override.unwrap_or(&meta.embed_model).to_string();
    let embedder = Embedder::create(Some(&model));
    load_index_with(out_dir, embedder)
}

/// Load with a caller-supplied embedder (test seam). The embedder's model
/// is trusted to match the persisted vectors.
pub fn load_index_with(out_dir: &Path, embedder: Embedder) -> Result<LoadedIndex> {
    let chunks_path = out_dir.join(CHUNKS_FILE);
    let vectors_path = out_dir.join(VECTORS_FILE);
    let tokens_path = out_dir.join(BM25_TOKENS_FILE);
    let meta_path = out_dir.join(META_FILE);
    for p in [&chunks_path, &vectors_path, &tokens_path, &meta_path] {
        if !p.exists() {
            return Err(IndexError::MissingArtifact(p.display().to_string()));
        }
    }

    let chunks = read_jsonl(&chunks_path)?;
    let dense = DenseIndex::load(&vectors_path)?;
    let tokenized: Vec<Vec<String>> = serde_json::from_slice(&fs::read(&tokens_path)?)?;
    let bm25 = Bm25Index::build(&tokenized);
    let meta: IndexMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;

    LoadedIndex::new(out_dir.to_path_buf(), chunks, dense, bm25, embedder, meta)
}

fn read_meta(out_dir: &Path) -> Result<IndexMeta> {
    let meta_path = out_dir.join(META_FILE);
    if !meta_path.exists() {
        return Err(IndexError::MissingArtifact(meta_path.display().to_string()));
    }
    Ok(serde_json::from_slice(&fs::read(&meta_path)?)?)
}
