//! Source list shown next to an answer

use crate::retrieval::RankedCandidate;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// How the source list is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Entries shown at most, unless more documents are cited
    pub max_sources: usize,

    /// Group several chunks under one document instead of keeping the best one
    pub multi_chunk: bool,

    /// Chunks per document in multi-chunk mode (cited chunks always shown)
    pub max_chunks_per_document: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            max_sources: 5,
            multi_chunk: false,
            max_chunks_per_document: 3,
        }
    }
}

/// One chunk inside a display entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayPassage {
    /// Position in the ordered result list
    pub rank: usize,
    pub chunk_id: String,
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub cited: bool,
}

/// One source document as displayed to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySource {
    pub document_id: String,
    pub title: String,
    /// File path or URL the document was ingested from
    pub path: String,
    /// Best vector similarity among the shown or cited chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Page locator of the leading chunk (`p. 3` or `p. 3-5`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_locator: Option<String>,
    /// Original URL for scraped web content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Citation indices this entry covers, ascending
    pub citation_indices: Vec<usize>,
    pub passages: Vec<DisplayPassage>,
}

const PREVIEW_CHARS: usize = 200;

fn display_passage(candidate: &RankedCandidate, cited: bool) -> DisplayPassage {
    let chunk = &candidate.passage.chunk;
    DisplayPassage {
        rank: candidate.rank,
        chunk_id: chunk.id.clone(),
        preview: chunk.preview(PREVIEW_CHARS),
        page_locator: chunk.page.map(|p| p.to_string()),
        similarity: candidate.vector_similarity,
        cited,
    }
}

fn new_source(candidate: &RankedCandidate, cited: bool) -> DisplaySource {
    let document = &candidate.passage.document;
    DisplaySource {
        document_id: candidate.document_id().to_string(),
        title: document.title.clone(),
        path: document.source.clone(),
        similarity: candidate.vector_similarity,
        page_locator: candidate.passage.chunk.page.map(|p| p.to_string()),
        source_url: document.url().map(str::to_string),
        citation_indices: if cited {
            vec![candidate.rank]
        } else {
            Vec::new()
        },
        passages: vec![display_passage(candidate, cited)],
    }
}

fn best_similarity(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Fold another cited passage into an existing entry
fn merge_cited(source: &mut DisplaySource, candidate: &RankedCandidate, multi_chunk: bool) {
    source.citation_indices.push(candidate.rank);
    source.similarity = best_similarity(source.similarity, candidate.vector_similarity);

    if multi_chunk {
        source.passages.push(display_passage(candidate, true));
        return;
    }

    let replaces = source
        .passages
        .first()
        .map_or(true, |current| candidate.rank < current.rank);
    if replaces {
        source.passages = vec![display_passage(candidate, true)];
        source.page_locator = candidate.passage.chunk.page.map(|p| p.to_string());
    }
}

/// Build the source list for an answer
///
/// Every cited passage is represented, cited documents first in ascending
/// citation order. Remaining passages follow in rank (score) order until
/// `max_sources` entries exist. Entries are one per document: in the default
/// mode the best-ranked cited passage stands for the document and the others
/// add their citation index and similarity; in multi-chunk mode passages are
/// grouped under the document up to `max_chunks_per_document`, with cited
/// passages exempt from that cap.
pub fn build_display_sources(
    ordered: &[RankedCandidate],
    valid_indices: &[usize],
    options: &DisplayOptions,
) -> Vec<DisplaySource> {
    let per_document = if options.multi_chunk {
        options.max_chunks_per_document.max(1)
    } else {
        1
    };

    let mut indices = valid_indices.to_vec();
    indices.sort_unstable();
    indices.dedup();

    let mut sources: Vec<DisplaySource> = Vec::new();
    let mut position: AHashMap<&str, usize> = AHashMap::new();
    let mut cited = vec![false; ordered.len()];

    for index in indices {
        let Some(candidate) = index.checked_sub(1).and_then(|i| ordered.get(i)) else {
            continue;
        };
        cited[index - 1] = true;

        match position.get(candidate.document_id()) {
            Some(&at) => merge_cited(&mut sources[at], candidate, options.multi_chunk),
            None => {
                position.insert(candidate.document_id(), sources.len());
                sources.push(new_source(candidate, true));
            }
        }
    }

    for (idx, candidate) in ordered.iter().enumerate() {
        if cited[idx] {
            continue;
        }

        match position.get(candidate.document_id()) {
            Some(&at) => {
                let source = &mut sources[at];
                if options.multi_chunk && source.passages.len() < per_document {
                    source.passages.push(display_passage(candidate, false));
                    source.similarity =
                        best_similarity(source.similarity, candidate.vector_similarity);
                }
            }
            None if sources.len() < options.max_sources => {
                position.insert(candidate.document_id(), sources.len());
                sources.push(new_source(candidate, false));
            }
            None => {}
        }
    }

    for source in &mut sources {
        source.citation_indices.sort_unstable();
        source.passages.sort_by_key(|p| p.rank);
    }

    sources
}
