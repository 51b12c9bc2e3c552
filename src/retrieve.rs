//! Hybrid dense + lexical retrieval.
//!
//! Dense search runs over a bounded candidate set (true nearest-neighbor
//! work is what the cap protects); BM25 is linear and scores the whole
//! corpus. Both score vectors are max-normalized independently and fused
//! by weighted sum.

use crate::embedding::Result as EmbeddingResult;
use crate::index::LoadedIndex;
use crate::ingest::tokenize;
use crate::models::RetrievedChunk;

pub const DEFAULT_DENSE_WEIGHT: f32 = 0.65;
pub const DEFAULT_SPARSE_WEIGHT: f32 = 0.35;

/// Divide by the vector's own maximum; a zero vector stays zero.
fn max_normalize(scores: &mut [f32]) {
    let max = scores.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for s in scores.iter_mut() {
            *s /= max;
        }
    }
}

/// Retrieve the `top_k` best chunks for `query`, ranked by fused score.
///
/// Returns at most `top_k` results; an empty corpus yields an empty list
/// rather than an error ("no matches" is a valid outcome). Ties resolve
/// toward the lower original chunk ordinal.
pub fn hybrid_retrieve(
    index: &LoadedIndex,
    query: &str,
    top_k: usize,
    dense_weight: f32,
    sparse_weight: f32,
) -> EmbeddingResult<Vec<RetrievedChunk>> {
    let n_docs = index.num_chunks();
    if n_docs == 0 {
        return Ok(Vec::new());
    }

    let qvec = index.embedder.encode_one(query)?;

    // Bounded dense candidate search, scattered into a full-length score
    // vector with raw similarities floored at zero.
    let dense_n = std::cmp::min(n_docs, std::cmp::max(top_k * 8, 50));
    let mut dense_all = vec![0.0f32; n_docs];
    for (row, score) in index.dense.search(&qvec, dense_n) {
        dense_all[row] = score.max(0.0);
    }

    let mut sparse_all = index.bm25.scores(&tokenize(query));

    max_normalize(&mut dense_all);
    max_normalize(&mut sparse_all);

    let hybrid: Vec<f32> = dense_all
        .iter()
        .zip(sparse_all.iter())
        .map(|(d, s)| dense_weight * d + sparse_weight * s)
        .collect();

    let mut order: Vec<usize> = (0..n_docs).collect();
    // Stable sort keeps equal scores in ordinal order.
    order.sort_by(|&a, &b| {
        hybrid[b]
            .partial_cmp(&hybrid[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(top_k);

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(i, idx)| RetrievedChunk {
            chunk: index.chunks[idx].clone(),
            dense_score: dense_all[idx],
            sparse_score: sparse_all[idx],
            hybrid_score: hybrid[idx],
            rank: i + 1,
        })
        .collect())
}
