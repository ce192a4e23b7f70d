//! Per-leg inclusion rules applied before fusion

use crate::retrieval::{LexicalHit, SearchConfig, VectorHit};
use ahash::AHashSet;

/// Both legs after filtering; positions in each vector are the leg ranks
#[derive(Debug, Clone, Default)]
pub struct FilteredLegs {
    pub vector: Vec<VectorHit>,
    pub lexical: Vec<LexicalHit>,
}

impl FilteredLegs {
    pub fn is_empty(&self) -> bool {
        self.vector.is_empty() && self.lexical.is_empty()
    }
}

/// Filter applied to the raw backend legs
///
/// The backend is asked to honour the same rules; this stage re-checks them so
/// an excluded chunk can never re-enter through the other leg.
#[derive(Debug, Clone, Copy)]
pub struct CandidateFilter {
    similarity_threshold: f32,
    exclude_toc: bool,
}

impl CandidateFilter {
    pub fn new(similarity_threshold: f32, exclude_toc: bool) -> Self {
        Self {
            similarity_threshold,
            exclude_toc,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.similarity_threshold, config.exclude_toc)
    }

    /// Filter both legs
    ///
    /// Vector hits are re-sorted by similarity (stable) and lexical hits by
    /// backend rank, then duplicates are dropped keeping the first occurrence.
    /// The resulting vector positions become the 1-based leg ranks.
    pub fn apply(&self, vector: &[VectorHit], lexical: &[LexicalHit]) -> FilteredLegs {
        let mut vector: Vec<VectorHit> = vector
            .iter()
            .filter(|hit| hit.similarity >= self.similarity_threshold)
            .filter(|hit| self.keeps_toc_flag(hit.passage.chunk.is_toc))
            .cloned()
            .collect();
        vector.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        let mut seen: AHashSet<String> = AHashSet::new();
        vector.retain(|hit| seen.insert(hit.passage.chunk.id.clone()));

        let mut lexical: Vec<LexicalHit> = lexical
            .iter()
            .filter(|hit| self.keeps_toc_flag(hit.passage.chunk.is_toc))
            .cloned()
            .collect();
        lexical.sort_by_key(|hit| hit.rank);

        seen.clear();
        lexical.retain(|hit| seen.insert(hit.passage.chunk.id.clone()));

        FilteredLegs { vector, lexical }
    }

    fn keeps_toc_flag(&self, is_toc: bool) -> bool {
        !(self.exclude_toc && is_toc)
    }
}
