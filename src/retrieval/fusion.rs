//! Reciprocal Rank Fusion algorithm for combining search results

use crate::retrieval::{FilteredLegs, Passage, RankedCandidate};
use ahash::AHashMap;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid RRF constant: k must be finite and positive, got {0}")]
    InvalidK(f64),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// RRF K constant (typically 50-60)
    pub rrf_k: f64,
}

impl FusionConfig {
    pub fn new(rrf_k: f64) -> Result<Self, FusionError> {
        if !rrf_k.is_finite() || rrf_k <= 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }

        Ok(Self { rrf_k })
    }

    fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.rrf_k + rank as f64)
    }
}

/// Accumulator for one chunk while both legs are folded in
struct Fused {
    passage: Passage,
    vector_similarity: Option<f32>,
    vector_rank: Option<usize>,
    lexical_rank: Option<usize>,
    score: f64,
}

/// Apply Reciprocal Rank Fusion to the filtered legs
///
/// RRF formula: score(d) = sum over legs containing d of: 1 / (k + rank)
///
/// Ranks are the 1-based positions in the filtered legs. A chunk present in a
/// single leg still scores; a chunk absent from both never appears.
///
/// # Returns
/// Candidates sorted by fused score with deterministic tie-breaks, `rank` and
/// `fused_rank` set to the 1-based fused position.
pub fn reciprocal_rank_fusion(legs: &FilteredLegs, config: &FusionConfig) -> Vec<RankedCandidate> {
    let mut fused: AHashMap<&str, Fused> =
        AHashMap::with_capacity(legs.vector.len() + legs.lexical.len());

    // Process semantic results
    for (idx, hit) in legs.vector.iter().enumerate() {
        let rank = idx + 1;
        let entry = fused.entry(hit.passage.chunk_id()).or_insert_with(|| Fused {
            passage: hit.passage.clone(),
            vector_similarity: None,
            vector_rank: None,
            lexical_rank: None,
            score: 0.0,
        });
        entry.vector_similarity = Some(hit.similarity);
        entry.vector_rank = Some(rank);
        entry.score += config.contribution(rank);
    }

    // Process keyword results
    for (idx, hit) in legs.lexical.iter().enumerate() {
        let rank = idx + 1;
        let entry = fused.entry(hit.passage.chunk_id()).or_insert_with(|| Fused {
            passage: hit.passage.clone(),
            vector_similarity: None,
            vector_rank: None,
            lexical_rank: None,
            score: 0.0,
        });
        entry.lexical_rank = Some(rank);
        entry.score += config.contribution(rank);
    }

    let mut results: Vec<RankedCandidate> = fused
        .into_values()
        .map(|f| RankedCandidate {
            passage: f.passage,
            vector_similarity: f.vector_similarity,
            vector_rank: f.vector_rank,
            lexical_rank: f.lexical_rank,
            rrf_score: f.score,
            title_boost: 0.0,
            fused_score: f.score,
            fused_rank: 0,
            rank: 0,
        })
        .collect();

    results.sort_by(compare_candidates);

    for (idx, candidate) in results.iter_mut().enumerate() {
        candidate.fused_rank = idx + 1;
        candidate.rank = idx + 1;
    }

    results
}

/// Total order used wherever candidates are ranked
///
/// Fused score descending, then raw vector similarity descending (present
/// beats absent), then `chunk_index` ascending, then chunk id.
pub fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| match (a.vector_similarity, b.vector_similarity) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.passage.chunk.chunk_index.cmp(&b.passage.chunk.chunk_index))
        .then_with(|| a.chunk_id().cmp(b.chunk_id()))
}
