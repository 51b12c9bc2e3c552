//! Text embedding with a persistent content-addressed cache.
//!
//! The backend is abstract so the pipeline can be tested with a stub;
//! the production backend talks to Ollama's embeddings endpoint. Every
//! vector leaving this module is L2-normalized, which is what lets the
//! dense index use a plain inner product as cosine similarity.

use std::path::Path;

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Order-preserving batch encoder. Failures propagate whole; there is no
/// partial-result policy.
pub trait EmbeddingBackend {
    fn encode(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Scale a vector to unit L2 norm, clipping the norm at a small epsilon
/// so a zero vector divides cleanly.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm = norm.max(1e-12);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Serialize a vector as little-endian f32 bytes.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`].
pub fn blob_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Append-only key-value store of normalized vectors, keyed by a content
/// hash of `model + "\n" + text`.
///
/// Opened for the duration of one embedding pass; the connection closes
/// on drop even when the pass fails midway. Concurrent writers from
/// multiple processes are unsupported (undefined behavior).
pub struct EmbeddingCache {
    conn: Connection,
}

impl EmbeddingCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                key TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                vec BLOB NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT vec FROM embeddings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0)?;
                Ok(Some(blob_to_vec(&blob)))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, vec: &[f32]) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO embeddings (key, dim, vec) VALUES (?1, ?2, ?3)",
            params![key, vec.len() as i64, vec_to_blob(vec)],
        )?;
        Ok(())
    }
}

/// Ollama `/api/embed` backend.
pub struct OllamaEmbeddingBackend {
    host: String,
    client: reqwest::blocking::Client,
}

impl OllamaEmbeddingBackend {
    pub fn new(host: Option<&str>) -> Self {
        let host = host
            .map(|h| h.to_string())
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| OLLAMA_DEFAULT_HOST.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            host,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl EmbeddingBackend for OllamaEmbeddingBackend {
    fn encode(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.host);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model, "input": texts }))
            .send()?;
        if !resp.status().is_success() {
            return Err(EmbeddingError::Backend(format!(
                "{} returned status {}",
                url,
                resp.status()
            )));
        }
        let body: EmbedResponse = resp.json()?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: body.embeddings.len(),
            });
        }
        Ok(body.embeddings)
    }
}

/// Embedding façade binding a model identifier to a backend.
pub struct Embedder {
    pub model_name: String,
    backend: Box<dyn EmbeddingBackend>,
}

impl Embedder {
    /// Production embedder. Model resolution: explicit override, then the
    /// `EMBED_MODEL` environment variable, then the default.
    pub fn create(model_override: Option<&str>) -> Self {
        let name = model_override
            .map(|m| m.to_string())
            .or_else(|| std::env::var("EMBED_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());
        log::info!("Using embedding model: {}", name);
        Self::with_backend(name, Box::new(OllamaEmbeddingBackend::new(None)))
    }

    pub fn with_backend(model_name: String, backend: Box<dyn EmbeddingBackend>) -> Self {
        Self {
            model_name,
            backend,
        }
    }

    /// Encode many texts through the cache. Hits come back exactly as
    /// stored; misses are encoded in one backend batch, normalized,
    /// persisted, and returned. Output order matches input order.
    pub fn encode_many(&self, texts: &[String], cache: &EmbeddingCache) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing_idx: Vec<usize> = Vec::new();
        let mut missing_texts: Vec<String> = Vec::new();
        let mut missing_keys: Vec<String> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = cache_key(&self.model_name, text);
            match cache.get(&key)? {
                Some(v) => vectors[i] = Some(v),
                None => {
                    missing_idx.push(i);
                    missing_texts.push(text.clone());
                    missing_keys.push(key);
                }
            }
        }

        if !missing_texts.is_empty() {
            log::info!("Encoding {} uncached chunks", missing_texts.len());
            let encoded = self.backend.encode(&self.model_name, &missing_texts)?;
            if encoded.len() != missing_texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: missing_texts.len(),
                    got: encoded.len(),
                });
            }
            for ((i, key), mut vec) in missing_idx
                .iter()
                .zip(missing_keys.iter())
                .zip(encoded.into_iter())
            {
                l2_normalize(&mut vec);
                cache.put(key, &vec)?;
                vectors[*i] = Some(vec);
            }
        }

        Ok(vectors.into_iter().map(|v| v.expect("all slots filled")).collect())
    }

    /// Encode one text without touching the cache. Queries are rarely
    /// repeated, so memoizing them only grows the cache.
    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let encoded = self.backend.encode(&self.model_name, &texts)?;
        let mut vec = encoded
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })?;
        l2_normalize(&mut vec);
        Ok(vec)
    }
}
