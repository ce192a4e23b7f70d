//! Corpus records and ranked candidate structures

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A source document owned by the ingestion side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// File path or URL the document was ingested from
    pub source: String,

    /// Free-form metadata (`url` is set for scraped web pages)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    /// Original URL for web content, if the ingestion step recorded one
    pub fn url(&self) -> Option<&str> {
        self.metadata.get("url").and_then(Value::as_str)
    }
}

/// Page span of a chunk inside a paginated source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLocator {
    pub start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

impl fmt::Display for PageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end != self.start => write!(f, "p. {}-{}", self.start, end),
            _ => write!(f, "p. {}", self.start),
        }
    }
}

/// A retrievable text chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk identifier
    pub id: String,

    /// Owning document
    pub document_id: String,

    /// Full chunk text
    pub content: String,

    /// Short preview prepared at ingestion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,

    /// Token count reported by the chunker
    #[serde(default)]
    pub token_count: usize,

    /// Table-of-contents or other structural chunk
    #[serde(default)]
    pub is_toc: bool,

    /// Free-form chunk metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Position of the chunk within its document
    pub chunk_index: usize,

    /// Page span for paginated sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageLocator>,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        chunk_index: usize,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            document_id: document_id.into(),
            token_count: content.split_whitespace().count(),
            content,
            content_preview: None,
            is_toc: false,
            metadata: HashMap::new(),
            chunk_index,
            page: None,
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if let Some(preview) = &self.content_preview {
            return preview.clone();
        }

        match self.content.char_indices().nth(max_chars) {
            None => self.content.clone(),
            Some((byte_idx, _)) => format!("{}...", &self.content[..byte_idx]),
        }
    }
}

/// A chunk together with the document it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub chunk: Arc<Chunk>,
    pub document: Arc<Document>,
}

impl Passage {
    pub fn new(chunk: Arc<Chunk>, document: Arc<Document>) -> Self {
        Self { chunk, document }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }

    pub fn title(&self) -> &str {
        &self.document.title
    }
}

/// One row of the semantic leg
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub passage: Passage,
    /// Cosine similarity to the query embedding
    pub similarity: f32,
}

/// One row of the lexical leg
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub passage: Passage,
    /// 1-based rank reported by the backend
    pub rank: usize,
}

/// A candidate flowing through fusion, diversity and reranking
///
/// Every stage builds new candidates; nothing is updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub passage: Passage,

    /// Raw similarity from the vector leg
    pub vector_similarity: Option<f32>,

    /// 1-based position in the filtered vector leg
    pub vector_rank: Option<usize>,

    /// 1-based position in the filtered lexical leg
    pub lexical_rank: Option<usize>,

    /// Reciprocal Rank Fusion score
    pub rrf_score: f64,

    /// Boost added by the title reranker
    #[serde(default)]
    pub title_boost: f64,

    /// Score used for ordering (`rrf_score + title_boost`)
    pub fused_score: f64,

    /// 1-based position straight after fusion
    pub fused_rank: usize,

    /// Final 1-based position; this is the citation index
    pub rank: usize,
}

impl RankedCandidate {
    pub fn chunk_id(&self) -> &str {
        self.passage.chunk_id()
    }

    pub fn document_id(&self) -> &str {
        self.passage.document_id()
    }

    /// Which legs contributed to this candidate
    pub fn match_kind(&self) -> MatchKind {
        match (self.vector_rank, self.lexical_rank) {
            (Some(_), Some(_)) => MatchKind::Hybrid,
            (Some(_), None) => MatchKind::Semantic,
            _ => MatchKind::Lexical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Hybrid,
    Semantic,
    Lexical,
}
