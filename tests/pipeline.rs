//! End-to-end index build / reload / retrieval over synthetic documents,
//! with a deterministic stub embedding backend standing in for Ollama.

use std::path::Path;

use lectern::chunking::{build_chunks, ChunkingConfig};
use lectern::embedding::{Embedder, EmbeddingBackend, EmbeddingError};
use lectern::index::{
    load_index_with, persist_index, renumber_chunks, LoadedIndex, CACHE_FILE,
};
use lectern::models::{Chunk, DocumentMeta, PageText};
use lectern::prompt::build_answer_prompt;
use lectern::retrieve::hybrid_retrieve;
use tempfile::TempDir;

/// Deterministic 16-dim bag-of-bytes embedding; similar texts get similar
/// vectors, which is all retrieval ordering needs here.
struct HashBackend;

impl EmbeddingBackend for HashBackend {
    fn encode(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 16];
                for (i, b) in t.bytes().enumerate() {
                    v[(b as usize + i) % 16] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Backend that always fails, for the atomic-build test.
struct FailingBackend;

impl EmbeddingBackend for FailingBackend {
    fn encode(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Backend("backend unreachable".to_string()))
    }
}

fn stub_embedder() -> Embedder {
    Embedder::with_backend("stub-model".to_string(), Box::new(HashBackend))
}

fn pages(texts: &[&str]) -> Vec<PageText> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| PageText {
            page_num: i as u32 + 1,
            text: t.to_string(),
        })
        .collect()
}

/// Two synthetic documents' worth of finalized chunks.
fn two_document_chunks() -> (Vec<Chunk>, Vec<DocumentMeta>) {
    let doc_a = pages(&[
        "THERMODYNAMICS\n\nEntropy always increases in an isolated system. Heat flows from hot to cold bodies.",
        "The second law governs the direction of spontaneous processes in nature.",
    ]);
    let doc_b = pages(&[
        "OPTICS\n\nLight refracts when crossing between media of different refractive index.",
    ]);

    let config = ChunkingConfig::default();
    let mut chunks = build_chunks(&doc_a, "thermo", &config);
    for c in &mut chunks {
        c.source_pdf = "/books/thermo.pdf".to_string();
    }
    let mut b = build_chunks(&doc_b, "optics", &config);
    for c in &mut b {
        c.source_pdf = "/books/optics.pdf".to_string();
    }
    chunks.extend(b);
    renumber_chunks(&mut chunks);

    let documents = vec![
        DocumentMeta {
            book_title: "thermo".to_string(),
            pdf_path: "/books/thermo.pdf".to_string(),
        },
        DocumentMeta {
            book_title: "optics".to_string(),
            pdf_path: "/books/optics.pdf".to_string(),
        },
    ];
    (chunks, documents)
}

fn build_and_load(dir: &Path) -> LoadedIndex {
    let (chunks, documents) = two_document_chunks();
    persist_index(chunks, documents, dir, &stub_embedder()).unwrap();
    load_index_with(dir, stub_embedder()).unwrap()
}

#[test]
fn chunk_ids_are_contiguous_across_documents() {
    let (chunks, _) = two_document_chunks();
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.chunk_id, format!("chunk_{:04}", i + 1));
        assert!(!c.text.is_empty());
    }
}

#[test]
fn index_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let index = build_and_load(dir.path());

    let (original, _) = two_document_chunks();
    assert_eq!(index.chunks, original);
    assert_eq!(index.meta.num_chunks, original.len());
    assert_eq!(index.meta.embed_model, "stub-model");
    assert_eq!(index.meta.documents.len(), 2);
    assert!(dir.path().join(CACHE_FILE).exists());
}

#[test]
fn retrieval_finds_the_relevant_document() {
    let dir = TempDir::new().unwrap();
    let index = build_and_load(dir.path());

    let results = hybrid_retrieve(&index, "entropy increases", 3, 0.65, 0.35).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.book_title, "thermo");
    assert!(results[0].chunk.text.contains("Entropy"));
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.rank, i + 1);
    }

    let prompt = build_answer_prompt("Does entropy increase?", &results, 2000);
    assert!(prompt.contains("Does entropy increase?"));
    assert!(prompt.contains(&results[0].chunk.chunk_id));
}

#[test]
fn rebuild_reuses_the_embedding_cache() {
    let dir = TempDir::new().unwrap();
    let (chunks, documents) = two_document_chunks();
    persist_index(chunks.clone(), documents.clone(), dir.path(), &stub_embedder()).unwrap();
    // Second build over the same directory hits the cache for every chunk
    // and must produce an identical index.
    persist_index(chunks, documents, dir.path(), &stub_embedder()).unwrap();
    let index = load_index_with(dir.path(), stub_embedder()).unwrap();
    assert_eq!(index.num_chunks(), index.meta.num_chunks);
}

#[test]
fn failed_build_leaves_no_loadable_index() {
    let dir = TempDir::new().unwrap();
    let (chunks, documents) = two_document_chunks();
    let embedder = Embedder::with_backend("stub-model".to_string(), Box::new(FailingBackend));
    let err = persist_index(chunks, documents, dir.path(), &embedder);
    assert!(err.is_err());
    // No artifact subset was finalized; the load check fails fast.
    assert!(load_index_with(dir.path(), stub_embedder()).is_err());
}
