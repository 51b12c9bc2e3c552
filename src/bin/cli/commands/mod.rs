pub mod ask;
pub mod eval;
pub mod ingest;
