//! Local question answering over PDF textbooks.
//!
//! The pipeline: PDF pages are extracted and cleaned ([`ingest`]), split
//! into overlapping token-budgeted chunks ([`chunking`]), embedded with a
//! persistent cache ([`embedding`]), and persisted as a hybrid
//! dense + lexical index ([`index`]). At query time [`retrieve`] fuses
//! dense and BM25 scores, [`prompt`] composes a citation-enforcing prompt
//! under a character budget, and [`llm`] runs it against a local Ollama
//! model. [`eval`] batch-scores retrieval and answers against labeled
//! questions.
//!
//! Everything is single-threaded and blocking; an index is an immutable
//! snapshot rebuilt from scratch when the corpus changes.

pub mod chunking;
pub mod embedding;
pub mod eval;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod retrieve;
