/// Query embedding
///
/// This module turns normalized query text into vectors.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - CompatibleProvider for OpenAI-compatible HTTP endpoints
/// - EmbeddingCache (LRU + TTL) and RetryPolicy wrapped by `Embedder`
mod cache;
mod compatible;
mod provider;
mod retry;

pub use cache::{CacheStats, Clock, EmbeddingCache, ManualClock, SystemClock};
pub use compatible::CompatibleProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Which embedding backend to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// OpenAI-compatible `/embeddings` endpoint
    Compatible {
        base_url: String,
        model: String,
        /// Environment variable holding the API key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        dimension: usize,
        #[serde(default = "default_request_timeout_ms")]
        timeout_ms: u64,
    },
    /// In-process FastEmbed model
    Local { model: String },
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Local {
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn model_name(&self) -> &str {
        match self {
            ProviderConfig::Compatible { model, .. } | ProviderConfig::Local { model } => model,
        }
    }
}

/// Instantiate the configured provider
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config {
        ProviderConfig::Compatible {
            base_url,
            model,
            api_key_env,
            dimension,
            timeout_ms,
        } => {
            let api_key = std::env::var(api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                warn!(
                    "{} is not set, calling {} without authentication",
                    api_key_env, base_url
                );
            }
            let provider = CompatibleProvider::new(
                base_url,
                model.clone(),
                api_key,
                *dimension,
                Duration::from_millis(*timeout_ms),
            )?;
            Ok(Arc::new(provider))
        }
        ProviderConfig::Local { model } => Ok(Arc::new(FastEmbedProvider::new(model)?)),
    }
}

/// Cached, retrying front end over an `EmbeddingProvider`
///
/// Safe to share between concurrent requests. The only shared state is the
/// cache; a call that is dropped before the provider answers leaves it
/// untouched.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Underlying provider, uncached
    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed one query
    ///
    /// Returns a cached vector when available. Otherwise calls the provider,
    /// retrying transient failures per the retry policy, checks the
    /// dimension and caches the result.
    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let model = self.provider.model_name();
        if let Some(vector) = self.cache.get(model, text) {
            debug!("Embedding cache hit");
            return Ok(vector);
        }

        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.provider.embed(text).await {
                Ok(vector) => {
                    let expected = self.provider.dimension();
                    if vector.len() != expected {
                        return Err(EmbeddingError::DimensionMismatch {
                            expected,
                            actual: vector.len(),
                        });
                    }

                    let vector = Arc::new(vector);
                    self.cache.insert(model, text, Arc::clone(&vector));
                    return Ok(vector);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding request failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider answering from a script, then with a fixed vector
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Vec<f32>, EmbeddingError>>>,
        calls: AtomicUsize,
        dimension: usize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Vec<f32>, EmbeddingError>>, dimension: usize) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                dimension,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0.5; self.dimension]))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn transient() -> EmbeddingError {
        EmbeddingError::RequestFailed {
            status: 503,
            message: "busy".to_string(),
        }
    }

    fn embedder(provider: Arc<ScriptedProvider>, sleeper: Arc<RecordingSleeper>) -> Embedder {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1));
        Embedder::new(provider, Arc::new(EmbeddingCache::new(8, None)), policy)
            .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_transient_failures_retried_with_backoff() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(transient()), Err(transient())], 3));
        let sleeper = Arc::new(RecordingSleeper::new());
        let embedder = embedder(provider.clone(), sleeper.clone());

        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_reported() {
        let provider = Arc::new(ScriptedProvider::new(
            vec![Err(transient()), Err(transient()), Err(transient())],
            3,
        ));
        let embedder = embedder(provider.clone(), Arc::new(RecordingSleeper::new()));

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RetriesExhausted { attempts: 3, .. }));
        assert!(embedder.cache().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(
            vec![Err(EmbeddingError::RequestFailed {
                status: 401,
                message: "bad key".to_string(),
            })],
            3,
        ));
        let embedder = embedder(provider.clone(), Arc::new(RecordingSleeper::new()));

        assert!(embedder.embed("hello").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_and_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![1.0, 2.0])], 3));
        let embedder = embedder(provider.clone(), Arc::new(RecordingSleeper::new()));

        let err = embedder.embed("hello").await.unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert!(embedder.cache().is_empty());
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let provider = Arc::new(ScriptedProvider::new(vec![], 3));
        let embedder = embedder(provider.clone(), Arc::new(RecordingSleeper::new()));

        embedder.embed("hello").await.unwrap();
        embedder.embed("hello").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![], 3));
        let embedder = embedder(provider.clone(), Arc::new(RecordingSleeper::new()));

        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_provider_config_tagged() {
        let config: ProviderConfig = toml::from_str(
            r#"
            type = "compatible"
            base_url = "https://api.openai.com/v1"
            model = "text-embedding-3-small"
            dimension = 1536
            "#,
        )
        .unwrap();

        assert_eq!(config.model_name(), "text-embedding-3-small");
        match config {
            ProviderConfig::Compatible {
                api_key_env,
                timeout_ms,
                ..
            } => {
                assert_eq!(api_key_env, "OPENAI_API_KEY");
                assert_eq!(timeout_ms, 10_000);
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }
}
