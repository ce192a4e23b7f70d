//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use ragline::backend::{BackendError, SearchBackend};
use ragline::embedding::{
    EmbeddingCache, EmbeddingError, EmbeddingProvider, Embedder, RecordingSleeper, RetryPolicy,
};
use ragline::retrieval::{
    Chunk, Document, LexicalHit, Passage, PipelineLimits, Retriever, SearchConfig, VectorHit,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn passage(id: &str, document_id: &str, chunk_index: usize) -> Passage {
    titled(id, document_id, chunk_index, &format!("Document {}", document_id))
}

pub fn titled(id: &str, document_id: &str, chunk_index: usize, title: &str) -> Passage {
    let chunk = Chunk::new(id, document_id, chunk_index, format!("Text of {}", id));
    let document = Document::new(document_id, title, format!("/corpus/{}.pdf", document_id));
    Passage::new(Arc::new(chunk), Arc::new(document))
}

pub fn toc(id: &str, document_id: &str) -> Passage {
    let mut chunk = Chunk::new(id, document_id, 0, "Contents ..... 1");
    chunk.is_toc = true;
    let document = Document::new(document_id, "Contents", format!("/corpus/{}.pdf", document_id));
    Passage::new(Arc::new(chunk), Arc::new(document))
}

pub fn vector_hits(rows: &[(&Passage, f32)]) -> Vec<VectorHit> {
    rows.iter()
        .map(|(passage, similarity)| VectorHit {
            passage: (*passage).clone(),
            similarity: *similarity,
        })
        .collect()
}

pub fn lexical_hits(rows: &[&Passage]) -> Vec<LexicalHit> {
    rows.iter()
        .enumerate()
        .map(|(idx, passage)| LexicalHit {
            passage: (*passage).clone(),
            rank: idx + 1,
        })
        .collect()
}

/// What one leg of the scripted backend does
#[derive(Clone)]
pub enum LegScript<T> {
    Hits(Vec<T>),
    Fail(String),
    /// Never answers
    Hang,
}

/// Backend replaying fixed legs and recording the queries it saw
pub struct ScriptedBackend {
    vector: LegScript<VectorHit>,
    lexical: LegScript<LexicalHit>,
    pub lexical_queries: Mutex<Vec<String>>,
    pub vector_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(vector: LegScript<VectorHit>, lexical: LegScript<LexicalHit>) -> Self {
        Self {
            vector,
            lexical,
            lexical_queries: Mutex::new(Vec::new()),
            vector_calls: AtomicUsize::new(0),
        }
    }

    pub fn lexical_queries(&self) -> Vec<String> {
        self.lexical_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn vector_search(
        &self,
        _embedding: &[f32],
        limit: usize,
        _similarity_threshold: f32,
        _exclude_toc: bool,
    ) -> Result<Vec<VectorHit>, BackendError> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        match &self.vector {
            LegScript::Hits(hits) => Ok(hits.iter().take(limit).cloned().collect()),
            LegScript::Fail(reason) => Err(BackendError::Unavailable(reason.clone())),
            LegScript::Hang => std::future::pending().await,
        }
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        _exclude_toc: bool,
    ) -> Result<Vec<LexicalHit>, BackendError> {
        self.lexical_queries.lock().unwrap().push(query.to_string());
        match &self.lexical {
            LegScript::Hits(hits) => Ok(hits.iter().take(limit).cloned().collect()),
            LegScript::Fail(reason) => Err(BackendError::Unavailable(reason.clone())),
            LegScript::Hang => std::future::pending().await,
        }
    }
}

/// Provider returning a constant vector, optionally slowly or with an error
pub struct StubProvider {
    dimension: usize,
    delay: Option<Duration>,
    failure: Option<EmbeddingError>,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(dimension: usize, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(dimension)
        }
    }

    pub fn failing(dimension: usize, failure: EmbeddingError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(dimension)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deterministic vector derived from the text
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = text.bytes().fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        (0..self.dimension)
            .map(|i| ((seed.wrapping_add(i as u32 * 17) % 97) as f32 + 1.0) / 97.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(self.vector_for(text)),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

pub fn embedder(provider: Arc<StubProvider>) -> Arc<Embedder> {
    let retry = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
    Arc::new(
        Embedder::new(provider, Arc::new(EmbeddingCache::new(64, None)), retry)
            .with_sleeper(Arc::new(RecordingSleeper::new())),
    )
}

pub fn limits(leg_timeout_ms: u64) -> PipelineLimits {
    PipelineLimits {
        leg_timeout: Duration::from_millis(leg_timeout_ms),
        ..PipelineLimits::default()
    }
}

pub fn retriever(provider: Arc<StubProvider>, backend: Arc<ScriptedBackend>) -> Retriever {
    Retriever::new(embedder(provider), backend, limits(200))
}

/// Search settings with expansion and title rerank switched off
pub fn plain_search(rrf_k: f64) -> SearchConfig {
    SearchConfig {
        rrf_k,
        title_rerank_enabled: false,
        query_expansion_enabled: false,
        ..SearchConfig::default()
    }
}
