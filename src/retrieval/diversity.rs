//! Per-document diversity cap

use crate::retrieval::RankedCandidate;
use ahash::AHashMap;

/// Keep at most `max_per_document` candidates per source document
///
/// Walks the fused order and drops a candidate once its document has reached
/// the cap. Dropped slots are not refilled from other documents, and the
/// survivors keep their relative order and fused ranks.
pub fn apply_diversity(
    candidates: &[RankedCandidate],
    max_per_document: usize,
) -> Vec<RankedCandidate> {
    let mut per_document: AHashMap<&str, usize> = AHashMap::new();
    let mut kept = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let count = per_document.entry(candidate.document_id()).or_insert(0);
        if *count < max_per_document {
            *count += 1;
            kept.push(candidate.clone());
        }
    }

    let dropped = candidates.len() - kept.len();
    if dropped > 0 {
        tracing::debug!(
            dropped,
            max_per_document,
            "Diversity filter dropped candidates"
        );
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::test_support::{candidate, passage};

    #[test]
    fn test_single_document_capped() {
        // doc1 owns the four best-ranked chunks, doc2 and doc3 follow
        let ranked = vec![
            candidate(&passage("d1-a", "doc1", 0), 0.040, 1),
            candidate(&passage("d1-b", "doc1", 1), 0.039, 2),
            candidate(&passage("d1-c", "doc1", 2), 0.038, 3),
            candidate(&passage("d1-d", "doc1", 3), 0.037, 4),
            candidate(&passage("d2-a", "doc2", 0), 0.020, 5),
            candidate(&passage("d3-a", "doc3", 0), 0.010, 6),
        ];

        let kept = apply_diversity(&ranked, 2);
        let ids: Vec<&str> = kept.iter().map(|c| c.chunk_id()).collect();

        assert_eq!(ids, vec!["d1-a", "d1-b", "d2-a", "d3-a"]);
        // Fused positions are not reassigned
        let fused_ranks: Vec<usize> = kept.iter().map(|c| c.fused_rank).collect();
        assert_eq!(fused_ranks, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_cap_of_one_keeps_best_per_document() {
        let ranked = vec![
            candidate(&passage("a1", "a", 0), 0.05, 1),
            candidate(&passage("b1", "b", 0), 0.04, 2),
            candidate(&passage("a2", "a", 1), 0.03, 3),
            candidate(&passage("b2", "b", 1), 0.02, 4),
        ];

        let kept = apply_diversity(&ranked, 1);
        let ids: Vec<&str> = kept.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(ids, vec!["a1", "b1"]);
    }

    #[test]
    fn test_input_untouched() {
        let ranked = vec![
            candidate(&passage("a1", "a", 0), 0.05, 1),
            candidate(&passage("a2", "a", 1), 0.04, 2),
        ];

        let kept = apply_diversity(&ranked, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(ranked.len(), 2);
    }
}
