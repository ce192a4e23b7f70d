//! Hybrid retrieval pipeline combining semantic and keyword search

use crate::backend::SearchBackend;
use crate::embedding::{Embedder, EmbeddingError};
use crate::retrieval::{
    apply_diversity, reciprocal_rank_fusion, CandidateFilter, FusionConfig, FusionError, Leg,
    LegFailure, LexicalHit, NoOpExpander, QueryExpander, RankedCandidate, RequestContext,
    RetrievalOutcome, RetrievalResult, SearchConfig, TitleReranker, VectorHit,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Similarity below which an entry is marked LOW in the context
const LOW_CONFIDENCE_SIMILARITY: f32 = 0.6;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Invalid search configuration: {0}")]
    InvalidConfig(String),

    #[error("Query embedding unavailable: {0}")]
    EmbeddingUnavailable(#[source] EmbeddingError),

    #[error("Both retrieval legs failed (vector: {vector}; lexical: {lexical})")]
    BackendTotalFailure { vector: String, lexical: String },
}

impl From<FusionError> for RetrievalError {
    fn from(err: FusionError) -> Self {
        RetrievalError::InvalidConfig(err.to_string())
    }
}

/// Request-independent pipeline bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineLimits {
    /// Budget for each backend leg
    pub leg_timeout: Duration,
    /// Longest accepted query after normalization
    pub max_query_chars: usize,
    /// Largest `match_count` a caller may request
    pub max_limit: usize,
    /// Budget for query expansion
    pub expansion_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            leg_timeout: Duration::from_secs(5),
            max_query_chars: 1_000,
            max_limit: 100,
            expansion_timeout: Duration::from_secs(3),
        }
    }
}

/// Why one leg produced nothing
enum LegError {
    Embedding(EmbeddingError),
    Backend(String),
}

/// Hybrid retriever
///
/// Holds only shared, request-independent collaborators. Everything about a
/// single request lives in the `RequestContext` and `SearchConfig` passed to
/// [`Retriever::retrieve`], so one instance serves any number of concurrent
/// requests.
pub struct Retriever {
    embedder: Arc<Embedder>,
    backend: Arc<dyn SearchBackend>,
    expander: Arc<dyn QueryExpander>,
    limits: PipelineLimits,
}

impl Retriever {
    /// Create a retriever without query expansion
    pub fn new(
        embedder: Arc<Embedder>,
        backend: Arc<dyn SearchBackend>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            embedder,
            backend,
            expander: Arc::new(NoOpExpander),
            limits,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Run the full pipeline for one query
    ///
    /// # Returns
    /// `NoResults` when neither leg produced a usable candidate, otherwise the
    /// ordered passages with 1-based ranks, the numbered context and the
    /// degradation flags. Errors are reserved for bad input, an unusable
    /// configuration, a failed embedding or both legs failing.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
        config: &SearchConfig,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        config.validate().map_err(RetrievalError::InvalidConfig)?;
        if config.match_count > self.limits.max_limit {
            return Err(RetrievalError::InvalidConfig(format!(
                "match_count {} exceeds the limit of {}",
                config.match_count, self.limits.max_limit
            )));
        }
        let fusion_config = FusionConfig::new(config.rrf_k)?;

        let normalized = normalize_query(query, self.limits.max_query_chars)?;

        let search_text = if config.query_expansion_enabled {
            self.expand(&normalized).await
        } else {
            normalized.clone()
        };

        // Step 1: Parallel semantic + keyword search
        let leg_limit = config.leg_limit();
        let (vector_result, lexical_result) = tokio::join!(
            self.vector_leg(&search_text, leg_limit, config),
            self.lexical_leg(&search_text, leg_limit, config)
        );

        let (vector_hits, lexical_hits, degradation) = match (vector_result, lexical_result) {
            (Err(LegError::Embedding(e)), _) => {
                warn!(error = %e, "Query embedding failed");
                return Err(RetrievalError::EmbeddingUnavailable(e));
            }
            (Ok(vector), Ok(lexical)) => (vector, lexical, None),
            (Err(LegError::Backend(reason)), Ok(lexical)) => {
                warn!(leg = %Leg::Vector, %reason, "Retrieval leg failed, continuing degraded");
                (
                    Vec::new(),
                    lexical,
                    Some(LegFailure {
                        leg: Leg::Vector,
                        reason,
                    }),
                )
            }
            (Ok(vector), Err(reason)) => {
                warn!(leg = %Leg::Lexical, %reason, "Retrieval leg failed, continuing degraded");
                (
                    vector,
                    Vec::new(),
                    Some(LegFailure {
                        leg: Leg::Lexical,
                        reason,
                    }),
                )
            }
            (Err(LegError::Backend(vector)), Err(lexical)) => {
                warn!(%vector, %lexical, "Both retrieval legs failed");
                return Err(RetrievalError::BackendTotalFailure { vector, lexical });
            }
        };

        // Step 2: Per-leg filtering
        let legs = CandidateFilter::from_config(config).apply(&vector_hits, &lexical_hits);
        debug!(
            vector = legs.vector.len(),
            lexical = legs.lexical.len(),
            "Legs filtered"
        );

        if legs.is_empty() {
            info!(elapsed_ms = ctx.elapsed_ms(), "No candidates found");
            return Ok(RetrievalOutcome::NoResults {
                request_id: ctx.request_id,
                query: search_text,
                degradation,
            });
        }

        // Step 3: Reciprocal Rank Fusion
        let fused = reciprocal_rank_fusion(&legs, &fusion_config);

        // Step 4: Diversity cap
        let diverse = apply_diversity(&fused, config.max_chunks_per_document);

        // Step 5: Title rerank if enabled
        let reranked = match TitleReranker::from_config(config) {
            Some(reranker) => reranker.rerank(&normalized, &diverse),
            None => diverse,
        };

        // Step 6: Truncate and assign citation indices
        let ordered: Vec<RankedCandidate> = reranked
            .into_iter()
            .take(config.match_count)
            .enumerate()
            .map(|(idx, candidate)| RankedCandidate {
                rank: idx + 1,
                ..candidate
            })
            .collect();

        let context_text = format_context(&ordered);
        let vector_failed = matches!(&degradation, Some(f) if f.leg == Leg::Vector);
        let max_similarity = ordered
            .iter()
            .filter_map(|c| c.vector_similarity)
            .reduce(f32::max);
        let low_relevance = match max_similarity {
            Some(best) => best < config.out_of_scope_threshold,
            None => !vector_failed,
        };

        if low_relevance {
            warn!(
                max_similarity = max_similarity.unwrap_or(0.0),
                "Low relevance results"
            );
        }

        info!(
            results = ordered.len(),
            degraded = degradation.is_some(),
            elapsed_ms = ctx.elapsed_ms(),
            "Retrieval complete"
        );

        Ok(RetrievalOutcome::Found(RetrievalResult {
            request_id: ctx.request_id,
            query: search_text,
            ordered,
            context_text,
            degraded: degradation.is_some(),
            degradation,
            low_relevance,
        }))
    }

    /// Expand the query, falling back to it on error or timeout
    async fn expand(&self, query: &str) -> String {
        let expansion = self.expander.expand(query);
        match tokio::time::timeout(self.limits.expansion_timeout, expansion).await {
            Ok(Ok(expanded)) => {
                debug!(expanded = %expanded, "Using expanded query");
                expanded
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Query expansion failed, using original");
                query.to_string()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.limits.expansion_timeout.as_millis() as u64,
                    "Query expansion timed out, using original"
                );
                query.to_string()
            }
        }
    }

    /// Semantic leg: embed, then search by vector
    async fn vector_leg(
        &self,
        text: &str,
        limit: usize,
        config: &SearchConfig,
    ) -> Result<Vec<VectorHit>, LegError> {
        let embedding = self.embedder.embed(text).await.map_err(LegError::Embedding)?;

        let search = self.backend.vector_search(
            &embedding,
            limit,
            config.similarity_threshold,
            config.exclude_toc,
        );
        match tokio::time::timeout(self.limits.leg_timeout, search).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(LegError::Backend(e.to_string())),
            Err(_) => Err(LegError::Backend(self.timeout_reason())),
        }
    }

    /// Keyword leg
    async fn lexical_leg(
        &self,
        text: &str,
        limit: usize,
        config: &SearchConfig,
    ) -> Result<Vec<LexicalHit>, String> {
        let search = self.backend.lexical_search(text, limit, config.exclude_toc);
        match tokio::time::timeout(self.limits.leg_timeout, search).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(self.timeout_reason()),
        }
    }

    fn timeout_reason(&self) -> String {
        format!("timed out after {}ms", self.limits.leg_timeout.as_millis())
    }
}

/// Clean up raw query text
///
/// Trims, collapses internal whitespace and strips punctuation from both
/// ends. Nothing else is rewritten.
pub fn normalize_query(query: &str, max_chars: usize) -> Result<String, RetrievalError> {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let normalized = collapsed
        .trim_matches(|c: char| is_edge_punctuation(c) || c.is_whitespace())
        .to_string();

    if normalized.is_empty() {
        return Err(RetrievalError::Validation(
            "Query text cannot be empty".to_string(),
        ));
    }

    let length = normalized.chars().count();
    if length > max_chars {
        return Err(RetrievalError::Validation(format!(
            "Query is {} characters long, the limit is {}",
            length, max_chars
        )));
    }

    Ok(normalized)
}

fn is_edge_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '¿' | '¡' | '«' | '»' | '…' | '“' | '”' | '‘' | '’')
}

/// Numbered context handed to the answer generator
///
/// Entry `[i]` is `ordered[i - 1]`, so the numbers in the answer map straight
/// back to ranks.
pub fn format_context(ordered: &[RankedCandidate]) -> String {
    let entries: Vec<String> = ordered
        .iter()
        .map(|candidate| {
            let relevance = match candidate.vector_similarity {
                Some(similarity) => {
                    let marker = if similarity < LOW_CONFIDENCE_SIMILARITY {
                        " - LOW"
                    } else {
                        ""
                    };
                    format!("relevance: {}%{}", (similarity * 100.0) as i32, marker)
                }
                None => "keyword match".to_string(),
            };
            format!(
                "[{}] Source: \"{}\" ({})\n{}\n",
                candidate.rank,
                candidate.passage.title(),
                relevance,
                candidate.passage.chunk.content
            )
        })
        .collect();

    format!(
        "Found {} relevant results (sorted by relevance):\n\n{}",
        entries.len(),
        entries.join("\n---\n")
    )
}
