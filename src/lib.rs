//! ragline - Hybrid Retrieval & Ranking Engine
//!
//! Answers a question with an ordered, citable list of passages from a
//! pre-built document repository: a semantic and a keyword leg run
//! concurrently, are merged with Reciprocal Rank Fusion, capped per document
//! and reranked by title overlap. Numbered citations in a generated answer
//! map back to the passages and their source documents.

pub mod backend;
pub mod citations;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use error::{RaglineError, Result};
