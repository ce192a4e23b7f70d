//! Title-overlap reranking
//!
//! Boosts candidates whose document title shares terms with the query. The
//! boost scales with the share of title terms found in the query and never
//! exceeds the configured maximum.

use crate::retrieval::{compare_candidates, RankedCandidate, SearchConfig};
use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Secondary relevance signal based on query/title term overlap
#[derive(Debug, Clone, Copy)]
pub struct TitleReranker {
    boost: f64,
}

impl TitleReranker {
    pub fn new(boost: f64) -> Self {
        Self {
            boost: boost.max(0.0),
        }
    }

    /// Build the stage from the per-call config
    ///
    /// Returns `None` when title reranking is disabled so the caller skips the
    /// stage entirely instead of applying a zero boost.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
        config
            .title_rerank_enabled
            .then(|| Self::new(config.title_rerank_boost))
    }

    pub fn boost(&self) -> f64 {
        self.boost
    }

    /// Boost for one title against pre-tokenized query terms
    pub fn boost_for(&self, query_terms: &BTreeSet<String>, title: &str) -> f64 {
        let ratio = overlap_ratio(query_terms, &tokenize(title));
        self.boost.min(self.boost * ratio)
    }

    /// Rerank candidates
    ///
    /// # Returns
    /// New candidates re-sorted by boosted score with the fusion tie-breaks;
    /// `rank` is reassigned to the new position.
    pub fn rerank(&self, query: &str, candidates: &[RankedCandidate]) -> Vec<RankedCandidate> {
        let query_terms = tokenize(query);

        let mut reranked: Vec<RankedCandidate> = candidates
            .iter()
            .map(|candidate| {
                let boost = self.boost_for(&query_terms, candidate.passage.title());
                RankedCandidate {
                    title_boost: boost,
                    fused_score: candidate.rrf_score + boost,
                    ..candidate.clone()
                }
            })
            .collect();

        reranked.sort_by(compare_candidates);

        for (idx, candidate) in reranked.iter_mut().enumerate() {
            candidate.rank = idx + 1;
        }

        let boosted = reranked.iter().filter(|c| c.title_boost > 0.0).count();
        tracing::debug!(boosted, total = reranked.len(), "Title rerank applied");

        reranked
    }
}

/// Case- and diacritic-insensitive word set
///
/// Text is NFD-decomposed, combining marks are dropped, everything is
/// lowercased and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// |query ∩ title| / |title|, 0 for an empty title
pub fn overlap_ratio(query_terms: &BTreeSet<String>, title_terms: &BTreeSet<String>) -> f64 {
    if title_terms.is_empty() {
        return 0.0;
    }
    let shared = title_terms.intersection(query_terms).count();
    shared as f64 / title_terms.len() as f64
}
