//! Configuration management for ragline
//!
//! Loads the TOML configuration, applies profiles and `RAGLINE_SECTION__KEY`
//! environment overrides, and validates the result before anything is built
//! from it.

use crate::citations::DisplayOptions;
use crate::embedding::{EmbeddingCache, ProviderConfig, RetryPolicy};
use crate::error::{RaglineError, Result};
use crate::retrieval::{ExpansionConfig, PipelineLimits, SearchConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Schema version written by `config init`
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub display: DisplayOptions,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite repository (`~/` is expanded)
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("~/.ragline/ragline.db"),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderConfig,
    /// Query vectors kept in memory (0 disables the cache)
    pub cache_max_size: usize,
    /// Seconds before a cached vector expires (0 keeps it until evicted)
    pub cache_ttl_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            cache_max_size: 200,
            cache_ttl_secs: 3600,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn build_cache(&self) -> EmbeddingCache {
        let ttl = (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs));
        EmbeddingCache::new(self.cache_max_size, ttl)
    }
}

/// Request-independent pipeline bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Budget for each backend leg
    pub leg_timeout_ms: u64,
    /// Longest accepted query, in characters
    pub max_query_chars: usize,
    /// Largest `search.match_count` accepted, profiles included
    pub max_limit: usize,
    /// Overrides `expansion.timeout_ms` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            leg_timeout_ms: 5_000,
            max_query_chars: 1_000,
            max_limit: 100,
            expansion_timeout_ms: None,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunks_per_document: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_expansion_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_toc: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_chunk: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RaglineError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RaglineError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::warn!(
            "Config file {} not found, using defaults. Run 'ragline config init' to create one.",
            path.display()
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RaglineError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RaglineError::ProfileNotFound {
                name: profile.to_string(),
            })?;

        if let Some(threshold) = overrides.similarity_threshold {
            self.search.similarity_threshold = threshold;
        }
        if let Some(count) = overrides.match_count {
            self.search.match_count = count;
        }
        if let Some(cap) = overrides.max_chunks_per_document {
            self.search.max_chunks_per_document = cap;
        }
        if let Some(enabled) = overrides.title_rerank_enabled {
            self.search.title_rerank_enabled = enabled;
        }
        if let Some(enabled) = overrides.query_expansion_enabled {
            self.search.query_expansion_enabled = enabled;
        }
        if let Some(exclude) = overrides.exclude_toc {
            self.search.exclude_toc = exclude;
        }
        if let Some(multi) = overrides.multi_chunk {
            self.display.multi_chunk = multi;
        }

        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGLINE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with("RAGLINE_"))
            .collect();
        self.apply_overrides(vars);
    }

    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("RAGLINE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATABASE_PATH" => self.storage.database_path = PathBuf::from(value),
            "EMBEDDING__CACHE_MAX_SIZE" => self.embedding.cache_max_size = parse(path, value)?,
            "EMBEDDING__MAX_RETRIES" => self.embedding.max_retries = parse(path, value)?,
            "SEARCH__SIMILARITY_THRESHOLD" => {
                self.search.similarity_threshold = parse(path, value)?
            }
            "SEARCH__MATCH_COUNT" => self.search.match_count = parse(path, value)?,
            "SEARCH__RRF_K" => self.search.rrf_k = parse(path, value)?,
            "SEARCH__MAX_CHUNKS_PER_DOCUMENT" => {
                self.search.max_chunks_per_document = parse(path, value)?
            }
            "SEARCH__TITLE_RERANK_ENABLED" => {
                self.search.title_rerank_enabled = parse(path, value)?
            }
            "SEARCH__QUERY_EXPANSION_ENABLED" => {
                self.search.query_expansion_enabled = parse(path, value)?
            }
            "SEARCH__EXCLUDE_TOC" => self.search.exclude_toc = parse(path, value)?,
            "EXPANSION__MODEL" => self.expansion.model = value.to_string(),
            "EXPANSION__BASE_URL" => self.expansion.base_url = value.to_string(),
            "PIPELINE__LEG_TIMEOUT_MS" => self.pipeline.leg_timeout_ms = parse(path, value)?,
            "PIPELINE__MAX_LIMIT" => self.pipeline.max_limit = parse(path, value)?,
            "DISPLAY__MAX_SOURCES" => self.display.max_sources = parse(path, value)?,
            "DISPLAY__MULTI_CHUNK" => self.display.multi_chunk = parse(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Bounds handed to the retriever
    pub fn pipeline_limits(&self) -> PipelineLimits {
        PipelineLimits {
            leg_timeout: Duration::from_millis(self.pipeline.leg_timeout_ms),
            max_query_chars: self.pipeline.max_query_chars,
            max_limit: self.pipeline.max_limit,
            expansion_timeout: Duration::from_millis(
                self.pipeline
                    .expansion_timeout_ms
                    .unwrap_or(self.expansion.timeout_ms),
            ),
        }
    }

    /// Repository path with `~/` expanded
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_path(&self.storage.database_path)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RaglineError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ragline").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            expansion: ExpansionConfig::default(),
            pipeline: PipelineConfig::default(),
            display: DisplayOptions::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse<T>(path: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    value
        .trim()
        .parse()
        .map_err(|_| RaglineError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RaglineError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RaglineError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.search, config.search);
        assert_eq!(parsed.embedding.provider, config.embedding.provider);
        assert_eq!(parsed.display, config.display);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[_meta]
schema_version = "1.0.0"

[search]
match_count = 12
rrf_k = 60.0

[embedding.provider]
type = "compatible"
base_url = "http://localhost:11434/v1"
model = "nomic-embed-text"
dimension = 768
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.search.match_count, 12);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.search.similarity_threshold, 0.25);
        assert_eq!(config.embedding.cache_max_size, 200);
        assert_eq!(config.embedding.provider.model_name(), "nomic-embed-text");
        match &config.embedding.provider {
            ProviderConfig::Compatible {
                api_key_env,
                timeout_ms,
                ..
            } => {
                assert_eq!(api_key_env, "OPENAI_API_KEY");
                assert_eq!(*timeout_ms, 10_000);
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            Config::load(&path),
            Err(RaglineError::ConfigNotFound { .. })
        ));
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.meta.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "precise".to_string(),
            ProfileOverrides {
                similarity_threshold: Some(0.5),
                match_count: Some(10),
                multi_chunk: Some(true),
                ..ProfileOverrides::default()
            },
        );

        config.apply_profile("precise").unwrap();
        assert_eq!(config.search.similarity_threshold, 0.5);
        assert_eq!(config.search.match_count, 10);
        assert!(config.display.multi_chunk);

        assert!(matches!(
            config.apply_profile("missing"),
            Err(RaglineError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_env_style_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("RAGLINE_SEARCH__MATCH_COUNT".to_string(), "7".to_string()),
            ("RAGLINE_SEARCH__EXCLUDE_TOC".to_string(), "false".to_string()),
            ("RAGLINE_DISPLAY__MAX_SOURCES".to_string(), "nope".to_string()),
            ("RAGLINE_UNKNOWN__KEY".to_string(), "1".to_string()),
        ]);

        assert_eq!(config.search.match_count, 7);
        assert!(!config.search.exclude_toc);
        assert_eq!(config.display.max_sources, 5);
    }

    #[test]
    fn test_pipeline_limits() {
        let mut config = Config::default();
        assert_eq!(
            config.pipeline_limits().expansion_timeout,
            Duration::from_millis(3_000)
        );

        config.pipeline.expansion_timeout_ms = Some(750);
        config.pipeline.leg_timeout_ms = 1_200;
        let limits = config.pipeline_limits();
        assert_eq!(limits.expansion_timeout, Duration::from_millis(750));
        assert_eq!(limits.leg_timeout, Duration::from_millis(1_200));
    }

    #[test]
    fn test_expand_path() {
        let plain = Path::new("/var/lib/ragline.db");
        assert_eq!(expand_path(plain).unwrap(), plain);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_path(Path::new("~/.ragline/ragline.db")).unwrap(),
                home.join(".ragline/ragline.db")
            );
        }
    }
}
