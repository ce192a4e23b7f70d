//! Corpus import
//!
//! Loads the JSON corpus produced by the ingestion step into the repository.
//! Chunks may carry pre-computed embeddings; the rest are embedded with the
//! configured provider in batches.

use crate::embedding::EmbeddingProvider;
use crate::error::{RaglineError, Result};
use crate::retrieval::{Chunk, Document, PageLocator};
use crate::storage::Database;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Texts per provider call when embedding missing vectors
const EMBED_BATCH_SIZE: usize = 32;

/// Top-level corpus file
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusFile {
    /// Model the stored vectors were produced with
    #[serde(default)]
    pub model: Option<String>,
    pub documents: Vec<CorpusDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub chunks: Vec<CorpusChunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusChunk {
    pub id: String,
    /// Defaults to the position in the document's chunk list
    #[serde(default)]
    pub chunk_index: Option<usize>,
    pub content: String,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub token_count: Option<usize>,
    #[serde(default)]
    pub is_toc: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub page_start: Option<u32>,
    #[serde(default)]
    pub page_end: Option<u32>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl CorpusFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RaglineError::Io {
            source: e,
            context: format!("Failed to read corpus file: {}", path.display()),
        })?;

        serde_json::from_str(&contents).map_err(|e| RaglineError::Json {
            source: e,
            context: format!("Failed to parse corpus file: {}", path.display()),
        })
    }

    /// Number of chunks without a pre-computed vector
    pub fn missing_embeddings(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|d| &d.chunks)
            .filter(|c| c.embedding.is_none())
            .count()
    }
}

impl CorpusDocument {
    fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            title: self.title.clone(),
            source: self.source.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn to_chunks(&self) -> Vec<Chunk> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(position, c)| {
                let mut chunk = Chunk::new(
                    c.id.clone(),
                    self.id.clone(),
                    c.chunk_index.unwrap_or(position),
                    c.content.clone(),
                );
                if let Some(tokens) = c.token_count {
                    chunk.token_count = tokens;
                }
                chunk.content_preview = c.content_preview.clone();
                chunk.is_toc = c.is_toc;
                chunk.metadata = c.metadata.clone();
                chunk.page = c.page_start.map(|start| PageLocator {
                    start,
                    end: c.page_end,
                });
                chunk
            })
            .collect()
    }
}

/// Import summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub documents: usize,
    pub chunks: usize,
    /// Vectors taken from the corpus file
    pub stored_embeddings: usize,
    /// Vectors computed during import
    pub computed_embeddings: usize,
}

/// Import a corpus, replacing any documents with the same ids
///
/// `provider` is only needed when some chunks lack embeddings. Vectors whose
/// length differs from `dimension` are rejected.
pub async fn import_corpus(
    db: &Database,
    corpus: &CorpusFile,
    model: &str,
    dimension: usize,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<ImportStats> {
    if let Some(corpus_model) = &corpus.model {
        if corpus_model != model {
            tracing::warn!(
                "Corpus vectors were produced with {}, storing them under {}",
                corpus_model,
                model
            );
        }
    }

    let mut stats = ImportStats::default();

    for doc in &corpus.documents {
        let chunks = doc.to_chunks();
        db.replace_document(&doc.to_document(), &chunks)?;
        stats.documents += 1;
        stats.chunks += chunks.len();

        let mut pending: Vec<&CorpusChunk> = Vec::new();
        for chunk in &doc.chunks {
            match &chunk.embedding {
                Some(vector) => {
                    check_dimension(&chunk.id, vector, dimension)?;
                    db.upsert_embedding(&chunk.id, model, vector)?;
                    stats.stored_embeddings += 1;
                }
                None => pending.push(chunk),
            }
        }

        if pending.is_empty() {
            continue;
        }

        let provider = provider.ok_or_else(|| {
            RaglineError::Config(format!(
                "Document {} has chunks without embeddings and no provider is available",
                doc.id
            ))
        })?;

        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = provider.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(RaglineError::Config(format!(
                    "Provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (chunk, vector) in batch.iter().zip(&vectors) {
                check_dimension(&chunk.id, vector, dimension)?;
                db.upsert_embedding(&chunk.id, model, vector)?;
                stats.computed_embeddings += 1;
            }
        }

        tracing::debug!(document = %doc.id, embedded = pending.len(), "Embedded chunks");
    }

    tracing::info!(
        "Imported {} documents ({} chunks, {} stored and {} computed embeddings)",
        stats.documents,
        stats.chunks,
        stats.stored_embeddings,
        stats.computed_embeddings
    );

    Ok(stats)
}

fn check_dimension(chunk_id: &str, vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(RaglineError::InvalidConfigValue {
            path: format!("chunks.{}.embedding", chunk_id),
            message: format!("expected {} dimensions, got {}", dimension, vector.len()),
        });
    }
    Ok(())
}
