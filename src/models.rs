//! Data models shared across the retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Plain text extracted from a single PDF page.
///
/// Produced by the extractor; immutable afterwards. `page_num` is 1-based
/// and follows physical page order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_num: u32,
    pub text: String,
}

/// The persisted retrieval unit: a contiguous, token-budgeted span of
/// document text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `chunk_NNNN`, 1-based, assigned in final emission order across all
    /// ingested documents.
    pub chunk_id: String,
    pub book_title: String,
    pub source_pdf: String,
    /// Inclusive page range covered by the chunk's constituent units.
    pub page_start: u32,
    pub page_end: u32,
    /// Last non-null heading seen among the chunk's units, if any.
    pub section_title: Option<String>,
    /// Character-count proxy, see [`crate::chunking::estimate_tokens`].
    pub token_estimate: usize,
    pub text: String,
}

/// Format a 1-based chunk ordinal as a chunk id.
pub fn make_chunk_id(idx_1_based: usize) -> String {
    format!("chunk_{:04}", idx_1_based)
}

/// Provenance of one ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub book_title: String,
    pub pdf_path: String,
}

/// Index-level metadata persisted as `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub created_at_utc: String,
    pub num_documents: usize,
    pub documents: Vec<DocumentMeta>,
    pub num_chunks: usize,
    pub embed_model: String,
}

/// A chunk scored and ranked for one query. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Max-normalized dense similarity, in [0, 1].
    pub dense_score: f32,
    /// Max-normalized BM25 score, in [0, 1].
    pub sparse_score: f32,
    /// Weighted sum of the two normalized scores.
    pub hybrid_score: f32,
    /// 1-based position in descending hybrid-score order.
    pub rank: usize,
}
