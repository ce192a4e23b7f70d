//! Per-call search configuration, request context and pipeline outcomes

use crate::retrieval::RankedCandidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest accepted `overfetch_multiplier`
pub const MAX_OVERFETCH_MULTIPLIER: usize = 10;

/// Message the answer step should relay when nothing relevant was found
pub const NO_RESULTS_NOTICE: &str =
    "No relevant information was found in the knowledge base for this question.";

/// Retrieval knobs, passed explicitly on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum cosine similarity for the vector leg
    pub similarity_threshold: f32,

    /// Number of passages returned
    pub match_count: usize,

    /// RRF smoothing constant
    pub rrf_k: f64,

    /// Diversity cap per source document
    pub max_chunks_per_document: usize,

    pub title_rerank_enabled: bool,

    /// Maximum boost granted by a full title match
    pub title_rerank_boost: f64,

    /// Drop table-of-contents chunks
    pub exclude_toc: bool,

    pub query_expansion_enabled: bool,

    /// Each leg fetches `match_count * overfetch_multiplier` rows
    pub overfetch_multiplier: usize,

    /// Best similarity below this marks the result as low relevance
    pub out_of_scope_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.25,
            match_count: 30,
            rrf_k: 50.0,
            max_chunks_per_document: 5,
            title_rerank_enabled: true,
            title_rerank_boost: 0.15,
            exclude_toc: true,
            query_expansion_enabled: true,
            overfetch_multiplier: 2,
            out_of_scope_threshold: 0.40,
        }
    }
}

impl SearchConfig {
    /// Rows requested from each backend leg
    pub fn leg_limit(&self) -> usize {
        self.match_count
            .saturating_mul(self.overfetch_multiplier.max(1))
    }

    /// Check the invariants the pipeline relies on
    ///
    /// The upper bound on `match_count` is not part of the per-call settings;
    /// the retriever enforces it from its `PipelineLimits`.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(format!(
                "similarity_threshold must be between 0 and 1, got {}",
                self.similarity_threshold
            ));
        }
        if self.match_count == 0 {
            return Err("match_count must be greater than 0".to_string());
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(format!("rrf_k must be positive, got {}", self.rrf_k));
        }
        if self.max_chunks_per_document == 0 {
            return Err("max_chunks_per_document must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.title_rerank_boost) {
            return Err(format!(
                "title_rerank_boost must be between 0 and 1, got {}",
                self.title_rerank_boost
            ));
        }
        if !(1..=MAX_OVERFETCH_MULTIPLIER).contains(&self.overfetch_multiplier) {
            return Err(format!(
                "overfetch_multiplier must be between 1 and {}, got {}",
                MAX_OVERFETCH_MULTIPLIER, self.overfetch_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.out_of_scope_threshold) {
            return Err(format!(
                "out_of_scope_threshold must be between 0 and 1, got {}",
                self.out_of_scope_threshold
            ));
        }
        Ok(())
    }
}

/// Per-request context, created by the caller and threaded through the pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Milliseconds since the request started
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the two retrieval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Vector,
    Lexical,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Vector => f.write_str("vector"),
            Leg::Lexical => f.write_str("lexical"),
        }
    }
}

/// A leg that timed out or errored while the other one answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegFailure {
    pub leg: Leg,
    pub reason: String,
}

/// Successful retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub request_id: Uuid,

    /// Query text actually searched (after expansion)
    pub query: String,

    /// Final passages; `ordered[i].rank == i + 1`
    pub ordered: Vec<RankedCandidate>,

    /// Numbered context handed to the answer generator
    pub context_text: String,

    /// Only one leg contributed
    pub degraded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation: Option<LegFailure>,

    /// Best similarity fell below the out-of-scope threshold
    pub low_relevance: bool,
}

impl RetrievalResult {
    /// Best vector similarity among the returned passages
    pub fn max_similarity(&self) -> Option<f32> {
        self.ordered
            .iter()
            .filter_map(|c| c.vector_similarity)
            .reduce(f32::max)
    }

    /// Notice to relay when the result looks out of scope
    pub fn low_relevance_notice(&self) -> Option<String> {
        if !self.low_relevance {
            return None;
        }
        let pct = (self.max_similarity().unwrap_or(0.0) * 100.0) as u32;
        Some(format!(
            "Low relevance: the best match scores {}%, so this question is probably outside the knowledge base.",
            pct
        ))
    }
}

/// Outcome of a retrieval call; empty results are data, not errors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    Found(RetrievalResult),
    NoResults {
        request_id: Uuid,
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        degradation: Option<LegFailure>,
    },
}

impl RetrievalOutcome {
    pub fn is_no_results(&self) -> bool {
        matches!(self, RetrievalOutcome::NoResults { .. })
    }

    pub fn is_degraded(&self) -> bool {
        match self {
            RetrievalOutcome::Found(result) => result.degraded,
            RetrievalOutcome::NoResults { degradation, .. } => degradation.is_some(),
        }
    }

    pub fn result(&self) -> Option<&RetrievalResult> {
        match self {
            RetrievalOutcome::Found(result) => Some(result),
            RetrievalOutcome::NoResults { .. } => None,
        }
    }

    pub fn into_result(self) -> Option<RetrievalResult> {
        match self {
            RetrievalOutcome::Found(result) => Some(result),
            RetrievalOutcome::NoResults { .. } => None,
        }
    }

    /// Ordered passages; empty for `NoResults`
    pub fn ordered(&self) -> &[RankedCandidate] {
        match self {
            RetrievalOutcome::Found(result) => &result.ordered,
            RetrievalOutcome::NoResults { .. } => &[],
        }
    }
}
