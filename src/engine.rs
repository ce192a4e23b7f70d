//! Wiring from configuration to a ready retriever

use crate::backend::SqliteBackend;
use crate::config::Config;
use crate::embedding::{build_provider, Embedder, EmbeddingProvider};
use crate::error::Result;
use crate::retrieval::{build_expander, RequestContext, RetrievalOutcome, Retriever, SearchConfig};
use crate::storage::Database;
use std::sync::Arc;

/// Repository, embedder and retriever built from one configuration
pub struct Engine {
    config: Config,
    db: Arc<Database>,
    embedder: Arc<Embedder>,
    retriever: Retriever,
}

impl Engine {
    /// Open the configured repository and embedding provider
    pub fn open(config: Config) -> Result<Self> {
        let path = config.database_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::error::RaglineError::Io {
                source: e,
                context: format!("Failed to create data directory: {:?}", parent),
            })?;
        }

        let db = Arc::new(Database::new(&path)?);
        let provider = build_provider(&config.embedding.provider)?;
        Ok(Self::from_parts(config, db, provider))
    }

    /// Assemble an engine around an existing repository and provider
    pub fn from_parts(
        config: Config,
        db: Arc<Database>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let cache = Arc::new(config.embedding.build_cache());
        let embedder = Arc::new(Embedder::new(
            provider,
            cache,
            config.embedding.retry_policy(),
        ));
        let backend = Arc::new(SqliteBackend::new(
            Arc::clone(&db),
            embedder.model_name().to_string(),
        ));

        let mut retriever = Retriever::new(
            Arc::clone(&embedder),
            backend,
            config.pipeline_limits(),
        );
        if config.search.query_expansion_enabled {
            retriever = retriever.with_expander(build_expander(&config.expansion));
        }

        tracing::debug!(
            model = embedder.model_name(),
            dimension = embedder.dimension(),
            "Engine ready"
        );

        Self {
            config,
            db,
            embedder,
            retriever,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieve with the configured search settings
    pub async fn query(&self, ctx: &RequestContext, query: &str) -> Result<RetrievalOutcome> {
        self.query_with(ctx, query, &self.config.search).await
    }

    /// Retrieve with explicit search settings
    pub async fn query_with(
        &self,
        ctx: &RequestContext,
        query: &str,
        search: &SearchConfig,
    ) -> Result<RetrievalOutcome> {
        Ok(self.retriever.retrieve(ctx, query, search).await?)
    }
}
