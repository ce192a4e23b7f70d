//! Search backend contract
//!
//! A backend answers the two retrieval legs. Both calls must honour the TOC
//! rule they are given, and the vector leg must only return rows at or above
//! the similarity threshold, most similar first.

mod sqlite;

pub use sqlite::{cosine_similarity, fts_match_expression, SqliteBackend};

use crate::retrieval::{LexicalHit, VectorHit};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend task failed: {0}")]
    Task(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend work cancelled")]
    Cancelled,
}

impl From<crate::error::RaglineError> for BackendError {
    fn from(err: crate::error::RaglineError) -> Self {
        BackendError::Storage(err.to_string())
    }
}

/// The two retrieval legs over a pre-built index
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Semantic leg: rows with similarity >= `similarity_threshold`,
    /// similarity descending
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        similarity_threshold: f32,
        exclude_toc: bool,
    ) -> Result<Vec<VectorHit>, BackendError>;

    /// Lexical leg: rows in rank order, ranks starting at 1
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        exclude_toc: bool,
    ) -> Result<Vec<LexicalHit>, BackendError>;
}
