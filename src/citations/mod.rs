//! Citation mapping
//!
//! Maps the bracketed numbers an answer cites (`[2]`) back to the ranked
//! passages of the response, and builds the deduplicated source list shown
//! next to the answer.

mod display;

pub use display::{build_display_sources, DisplayOptions, DisplayPassage, DisplaySource};

use crate::retrieval::RankedCandidate;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{info, warn};

fn citation_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\[(\d+)\]").ok())
        .as_ref()
}

/// Every numeric reference in `text`, ascending and unique
///
/// Skips markdown links (`[1](url)`), references glued to a word (`a[1]`) and
/// doubled brackets (`[[1]]`). Numbers too large to index anything are
/// ignored.
pub fn extract_citations(text: &str) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    let Some(pattern) = citation_pattern() else {
        return found;
    };

    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };

        let before = text[..whole.start()].chars().next_back();
        if before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '[') {
            continue;
        }

        let after = text[whole.end()..].chars().next();
        if matches!(after, Some('(') | Some(']')) {
            continue;
        }

        if let Some(index) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            found.insert(index);
        }
    }

    found
}

/// Citations of `answer_text` that point at a passage, ascending
///
/// Valid indices are `1..=ordered.len()`; anything else is dropped and
/// logged.
pub fn resolve_citations(answer_text: &str, ordered: &[RankedCandidate]) -> Vec<usize> {
    let (valid, out_of_range): (Vec<usize>, Vec<usize>) = extract_citations(answer_text)
        .into_iter()
        .partition(|&index| (1..=ordered.len()).contains(&index));

    if !out_of_range.is_empty() {
        warn!(
            ?out_of_range,
            available = ordered.len(),
            "Dropping citations outside the result list"
        );
    }
    if !valid.is_empty() {
        info!(?valid, "Resolved citations");
    }

    valid
}

/// Passage behind a 1-based citation index
pub fn citation_target(ordered: &[RankedCandidate], index: usize) -> Option<&RankedCandidate> {
    index.checked_sub(1).and_then(|i| ordered.get(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Chunk, Document, Passage};
    use std::sync::Arc;

    fn ordered(n: usize) -> Vec<RankedCandidate> {
        (1..=n)
            .map(|rank| RankedCandidate {
                passage: Passage::new(
                    Arc::new(Chunk::new(format!("c{}", rank), "doc", rank, "text")),
                    Arc::new(Document::new("doc", "Doc", "/doc.pdf")),
                ),
                vector_similarity: Some(0.8),
                vector_rank: Some(rank),
                lexical_rank: None,
                rrf_score: 1.0 / (50.0 + rank as f64),
                title_boost: 0.0,
                fused_score: 1.0 / (50.0 + rank as f64),
                fused_rank: rank,
                rank,
            })
            .collect()
    }

    #[test]
    fn test_extract_skips_links_words_and_doubled_brackets() {
        let text = "See [1] and [3], not [2](https://x.org), a[4] or [[5]]. Also ([6]).";
        let found: Vec<usize> = extract_citations(text).into_iter().collect();
        assert_eq!(found, vec![1, 3, 6]);
    }

    #[test]
    fn test_extract_deduplicates_and_sorts() {
        let found: Vec<usize> = extract_citations("[3] [1] [3] [10]").into_iter().collect();
        assert_eq!(found, vec![1, 3, 10]);
    }

    #[test]
    fn test_out_of_range_dropped() {
        let ordered = ordered(3);
        let answer = "The helmet is mandatory [2] and so is the harness [7], see also [0].";
        assert_eq!(resolve_citations(answer, &ordered), vec![2]);
    }

    #[test]
    fn test_citations_always_within_bounds() {
        let ordered = ordered(4);
        let answer = "[1][2][3][4][5][99999999999999999999999]";
        let valid = resolve_citations(answer, &ordered);
        assert_eq!(valid, vec![1, 2, 3, 4]);
        assert!(valid.iter().all(|&i| citation_target(&ordered, i).is_some()));
    }

    #[test]
    fn test_citation_target() {
        let ordered = ordered(2);
        assert_eq!(citation_target(&ordered, 1).unwrap().chunk_id(), "c1");
        assert!(citation_target(&ordered, 0).is_none());
        assert!(citation_target(&ordered, 3).is_none());
    }
}
