//! Hybrid Retrieval & Ranking
//!
//! This module turns one query into an ordered, citable list of passages:
//! semantic and keyword legs run concurrently, are filtered, merged with
//! Reciprocal Rank Fusion, capped per document and reranked by title overlap.

mod diversity;
mod expansion;
mod filter;
mod fusion;
mod hybrid;
mod passage;
mod reranker;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use diversity::apply_diversity;
pub use expansion::{
    build_expander, load_prompt, ExpansionConfig, ExpansionError, LlmExpander, NoOpExpander,
    QueryExpander, DEFAULT_PROMPT,
};
pub use filter::{CandidateFilter, FilteredLegs};
pub use fusion::{compare_candidates, reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{format_context, normalize_query, PipelineLimits, RetrievalError, Retriever};
pub use passage::{
    Chunk, Document, LexicalHit, MatchKind, PageLocator, Passage, RankedCandidate, VectorHit,
};
pub use reranker::{overlap_ratio, tokenize, TitleReranker};
pub use types::{
    Leg, LegFailure, RequestContext, RetrievalOutcome, RetrievalResult, SearchConfig,
    MAX_OVERFETCH_MULTIPLIER, NO_RESULTS_NOTICE,
};
