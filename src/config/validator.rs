use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::ProviderConfig;
use crate::error::{RaglineError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_expansion(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);
        Self::validate_display(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RaglineError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.provider.model_name().is_empty() {
            errors.push(ValidationError::new(
                "embedding.provider.model",
                "Model name cannot be empty",
            ));
        }

        if let ProviderConfig::Compatible {
            base_url,
            dimension,
            timeout_ms,
            ..
        } = &embedding.provider
        {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                errors.push(ValidationError::new(
                    "embedding.provider.base_url",
                    format!("Base URL must start with http:// or https://, got '{}'", base_url),
                ));
            }
            if *dimension == 0 {
                errors.push(ValidationError::new(
                    "embedding.provider.dimension",
                    "Dimension must be greater than 0",
                ));
            }
            if *timeout_ms == 0 {
                errors.push(ValidationError::new(
                    "embedding.provider.timeout_ms",
                    "Timeout must be greater than 0",
                ));
            }
        }

        if embedding.retry_base_delay_ms > embedding.retry_max_delay_ms {
            errors.push(ValidationError::new(
                "embedding.retry_base_delay_ms",
                format!(
                    "Base delay {}ms exceeds max delay {}ms",
                    embedding.retry_base_delay_ms, embedding.retry_max_delay_ms
                ),
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(message) = config.search.validate() {
            errors.push(ValidationError::new("search", message));
        }
        if config.search.match_count > config.pipeline.max_limit {
            errors.push(ValidationError::new(
                "search.match_count",
                format!(
                    "Match count {} exceeds pipeline.max_limit {}",
                    config.search.match_count, config.pipeline.max_limit
                ),
            ));
        }

        for (name, profile) in &config.profiles {
            let mut search = config.search.clone();
            if let Some(threshold) = profile.similarity_threshold {
                search.similarity_threshold = threshold;
            }
            if let Some(count) = profile.match_count {
                search.match_count = count;
            }
            if let Some(cap) = profile.max_chunks_per_document {
                search.max_chunks_per_document = cap;
            }
            if let Err(message) = search.validate() {
                errors.push(ValidationError::new(format!("profiles.{}", name), message));
            } else if search.match_count > config.pipeline.max_limit {
                errors.push(ValidationError::new(
                    format!("profiles.{}.match_count", name),
                    format!(
                        "Match count {} exceeds pipeline.max_limit {}",
                        search.match_count, config.pipeline.max_limit
                    ),
                ));
            }
        }
    }

    fn validate_expansion(config: &Config, errors: &mut Vec<ValidationError>) {
        let expansion = &config.expansion;

        let temp = expansion.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "expansion.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if expansion.max_tokens == 0 {
            errors.push(ValidationError::new(
                "expansion.max_tokens",
                "Max tokens must be greater than 0",
            ));
        }

        if expansion.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "expansion.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }

        if config.search.query_expansion_enabled && expansion.model.is_empty() {
            errors.push(ValidationError::new(
                "expansion.model",
                "Model name cannot be empty when expansion is enabled",
            ));
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.leg_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "pipeline.leg_timeout_ms",
                "Leg timeout must be greater than 0",
            ));
        }

        if config.pipeline.max_query_chars == 0 {
            errors.push(ValidationError::new(
                "pipeline.max_query_chars",
                "Max query length must be greater than 0",
            ));
        }

        if config.pipeline.max_limit == 0 {
            errors.push(ValidationError::new(
                "pipeline.max_limit",
                "Max limit must be greater than 0",
            ));
        }

        if config.pipeline.expansion_timeout_ms == Some(0) {
            errors.push(ValidationError::new(
                "pipeline.expansion_timeout_ms",
                "Expansion timeout must be greater than 0",
            ));
        }
    }

    fn validate_display(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.display.max_sources == 0 {
            errors.push(ValidationError::new(
                "display.max_sources",
                "Max sources must be greater than 0",
            ));
        }

        if config.display.max_chunks_per_document == 0 {
            errors.push(ValidationError::new(
                "display.max_chunks_per_document",
                "Max chunks per document must be greater than 0",
            ));
        }
    }
}
