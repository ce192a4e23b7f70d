//! Invariants of the ranking stages over generated legs

use proptest::prelude::*;
use ragline::citations::resolve_citations;
use ragline::retrieval::{
    apply_diversity, reciprocal_rank_fusion, CandidateFilter, Chunk, Document, FusionConfig,
    LexicalHit, Passage, VectorHit,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Row {
    document: u8,
    similarity: f32,
    is_toc: bool,
    in_vector: bool,
    lexical_position: Option<u8>,
}

fn row() -> impl Strategy<Value = Row> {
    (
        0u8..4,
        0.0f32..1.0,
        prop::bool::weighted(0.15),
        any::<bool>(),
        prop::option::of(0u8..50),
    )
        .prop_map(|(document, similarity, is_toc, in_vector, lexical_position)| Row {
            document,
            similarity,
            is_toc,
            in_vector,
            lexical_position,
        })
}

fn build_legs(rows: &[Row]) -> (Vec<VectorHit>, Vec<LexicalHit>) {
    let passages: Vec<Passage> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut chunk = Chunk::new(format!("c{}", i), format!("d{}", r.document), i, "text");
            chunk.is_toc = r.is_toc;
            let document = Document::new(
                format!("d{}", r.document),
                format!("Document {}", r.document),
                "/corpus/doc.pdf",
            );
            Passage::new(Arc::new(chunk), Arc::new(document))
        })
        .collect();

    let mut vector: Vec<VectorHit> = rows
        .iter()
        .zip(&passages)
        .filter(|(r, _)| r.in_vector)
        .map(|(r, p)| VectorHit {
            passage: p.clone(),
            similarity: r.similarity,
        })
        .collect();
    vector.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    let mut lexical: Vec<(u8, usize, Passage)> = rows
        .iter()
        .zip(&passages)
        .enumerate()
        .filter_map(|(i, (r, p))| r.lexical_position.map(|pos| (pos, i, p.clone())))
        .collect();
    lexical.sort_by_key(|(pos, i, _)| (*pos, *i));
    let lexical = lexical
        .into_iter()
        .enumerate()
        .map(|(idx, (_, _, passage))| LexicalHit {
            passage,
            rank: idx + 1,
        })
        .collect();

    (vector, lexical)
}

proptest! {
    #[test]
    fn fused_candidates_are_exactly_the_filtered_hits(
        rows in prop::collection::vec(row(), 0..40),
        threshold in 0.0f32..0.8,
    ) {
        let (vector, lexical) = build_legs(&rows);
        let legs = CandidateFilter::new(threshold, true).apply(&vector, &lexical);
        let fused = reciprocal_rank_fusion(&legs, &FusionConfig::new(50.0).unwrap());

        let mut expected: HashSet<String> = HashSet::new();
        for hit in &vector {
            if hit.similarity >= threshold && !hit.passage.chunk.is_toc {
                expected.insert(hit.passage.chunk.id.clone());
            }
        }
        for hit in &lexical {
            if !hit.passage.chunk.is_toc {
                expected.insert(hit.passage.chunk.id.clone());
            }
        }

        let got: Vec<String> = fused.iter().map(|c| c.chunk_id().to_string()).collect();
        let unique: HashSet<String> = got.iter().cloned().collect();
        prop_assert_eq!(got.len(), unique.len());
        prop_assert_eq!(unique, expected);

        for candidate in &fused {
            prop_assert!(!candidate.passage.chunk.is_toc);
            if let Some(similarity) = candidate.vector_similarity {
                prop_assert!(similarity >= threshold);
            }
        }
    }

    #[test]
    fn fusion_is_deterministic_and_sorted(rows in prop::collection::vec(row(), 0..40)) {
        let (vector, lexical) = build_legs(&rows);
        let legs = CandidateFilter::new(0.2, true).apply(&vector, &lexical);
        let config = FusionConfig::new(60.0).unwrap();

        let first = reciprocal_rank_fusion(&legs, &config);
        let second = reciprocal_rank_fusion(&legs, &config);
        prop_assert_eq!(&first, &second);

        for pair in first.windows(2) {
            prop_assert!(pair[0].fused_score >= pair[1].fused_score);
        }
        for (idx, candidate) in first.iter().enumerate() {
            prop_assert_eq!(candidate.fused_rank, idx + 1);
            let expected = candidate.vector_rank.map_or(0.0, |r| 1.0 / (60.0 + r as f64))
                + candidate.lexical_rank.map_or(0.0, |r| 1.0 / (60.0 + r as f64));
            prop_assert!((candidate.fused_score - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn diversity_keeps_each_documents_best_chunks(
        rows in prop::collection::vec(row(), 0..40),
        cap in 1usize..4,
    ) {
        let (vector, lexical) = build_legs(&rows);
        let legs = CandidateFilter::new(0.0, false).apply(&vector, &lexical);
        let fused = reciprocal_rank_fusion(&legs, &FusionConfig::new(50.0).unwrap());
        let diverse = apply_diversity(&fused, cap);

        let mut per_document: HashMap<&str, usize> = HashMap::new();
        for candidate in &diverse {
            *per_document.entry(candidate.document_id()).or_default() += 1;
        }
        prop_assert!(per_document.values().all(|&n| n <= cap));

        // Kept chunks are a subsequence of the fused order
        let fused_ranks: Vec<usize> = diverse.iter().map(|c| c.fused_rank).collect();
        prop_assert!(fused_ranks.windows(2).all(|w| w[0] < w[1]));

        // And exactly the first `cap` chunks of every document
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let expected: Vec<usize> = fused
            .iter()
            .filter(|c| {
                let n = seen.entry(c.document_id()).or_default();
                *n += 1;
                *n <= cap
            })
            .map(|c| c.fused_rank)
            .collect();
        prop_assert_eq!(fused_ranks, expected);
    }

    #[test]
    fn resolved_citations_stay_in_bounds(
        rows in prop::collection::vec(row(), 1..20),
        numbers in prop::collection::vec(0usize..40, 0..12),
        filler in "[a-z ,.()\\[\\]]{0,40}",
    ) {
        let (vector, lexical) = build_legs(&rows);
        let legs = CandidateFilter::new(0.0, false).apply(&vector, &lexical);
        let ordered = reciprocal_rank_fusion(&legs, &FusionConfig::new(50.0).unwrap());

        let answer: String = numbers
            .iter()
            .map(|n| format!("{} [{}]", filler, n))
            .collect::<Vec<_>>()
            .join(" ");
        let cited = resolve_citations(&answer, &ordered);

        prop_assert!(cited.iter().all(|&i| i >= 1 && i <= ordered.len()));
        prop_assert!(cited.windows(2).all(|w| w[0] < w[1]));
    }
}
