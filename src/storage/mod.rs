//! Storage layer for ragline
//!
//! Read-mostly SQLite repository of documents, chunks and their embeddings,
//! plus the corpus import path used to populate it

pub mod database;
pub mod import;

pub use database::{Database, DbPool, DbStats, EmbeddingRow, ModelStats};
pub use import::{import_corpus, CorpusFile, ImportStats};
