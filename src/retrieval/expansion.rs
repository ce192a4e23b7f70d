//! Query expansion
//!
//! An optional LLM rewrite that appends synonyms and related technical terms
//! to the user query before both legs run. Failures never fail a request: the
//! pipeline falls back to the original query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Prompt used when no prompt file is configured
pub const DEFAULT_PROMPT: &str = "You are a query reformulation assistant for document retrieval.

Reformulate the following question by adding relevant synonyms and technical terms.
Keep the reformulation concise (max 40 words) on a single line.
Do not add question marks or formatting.

Question: {query}

Enriched reformulation:";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpansionError {
    #[error("Expansion request failed: {0}")]
    Request(String),

    #[error("Expansion endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Expansion response was empty")]
    EmptyResponse,
}

/// Rewrites a query to improve recall
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Expanded query text; the original query is always part of it
    async fn expand(&self, query: &str) -> Result<String, ExpansionError>;
}

/// Returns the query unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExpander;

#[async_trait]
impl QueryExpander for NoOpExpander {
    async fn expand(&self, query: &str) -> Result<String, ExpansionError> {
        Ok(query.to_string())
    }
}

/// Expansion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Chat model used for the rewrite
    pub model: String,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Budget for the whole expansion call
    pub timeout_ms: u64,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Prompt template file; `{query}` is replaced with the user query
    pub prompt_file: Option<PathBuf>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 3_000,
            max_tokens: 100,
            temperature: 0.3,
            prompt_file: None,
        }
    }
}

impl ExpansionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

/// Expander backed by an OpenAI-compatible chat completions endpoint
pub struct LlmExpander {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    prompt_template: String,
}

impl LlmExpander {
    pub fn new(
        config: &ExpansionConfig,
        api_key: String,
        prompt_template: String,
    ) -> Result<Self, ExpansionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExpansionError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            prompt_template,
        })
    }

    pub fn render_prompt(&self, query: &str) -> String {
        self.prompt_template.replace("{query}", query)
    }
}

/// Join the original query with the model output
fn combine(query: &str, expansion: &str) -> Result<String, ExpansionError> {
    let expansion = expansion.trim();
    if expansion.is_empty() {
        return Err(ExpansionError::EmptyResponse);
    }
    Ok(format!("{} {}", query, expansion))
}

#[async_trait]
impl QueryExpander for LlmExpander {
    async fn expand(&self, query: &str) -> Result<String, ExpansionError> {
        let prompt = self.render_prompt(query);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .send()
            .await
            .map_err(|e| ExpansionError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExpansionError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExpansionError::Request(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ExpansionError::EmptyResponse)?;

        let combined = combine(query, &content)?;
        info!(
            added_chars = combined.len() - query.len(),
            "Query expanded"
        );
        Ok(combined)
    }
}

/// Load the prompt template, falling back to the built-in one
pub fn load_prompt(prompt_file: Option<&std::path::Path>) -> String {
    if let Some(path) = prompt_file {
        match std::fs::read_to_string(path) {
            Ok(template) => {
                info!("Loaded query expansion prompt from: {}", path.display());
                return template;
            }
            Err(e) => warn!(
                "Failed to load prompt from {}: {}, using default",
                path.display(),
                e
            ),
        }
    }
    DEFAULT_PROMPT.to_string()
}

/// Build the configured expander
///
/// Falls back to `NoOpExpander` when no API key is available.
pub fn build_expander(config: &ExpansionConfig) -> Arc<dyn QueryExpander> {
    let api_key = match std::env::var(&config.api_key_env) {
        Ok(key) if !key.is_empty() => key,
        _ => {
            warn!(
                "{} is not set, query expansion disabled",
                config.api_key_env
            );
            return Arc::new(NoOpExpander);
        }
    };

    let prompt = load_prompt(config.prompt_file.as_deref());
    match LlmExpander::new(config, api_key, prompt) {
        Ok(expander) => Arc::new(expander),
        Err(e) => {
            warn!("Query expansion unavailable: {}", e);
            Arc::new(NoOpExpander)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_noop_returns_query() {
        assert_eq!(NoOpExpander.expand("type A").await.unwrap(), "type A");
    }

    #[test]
    fn test_combine_keeps_original_first() {
        assert_eq!(
            combine("type A", "  classification type A catégorie  ").unwrap(),
            "type A classification type A catégorie"
        );
        assert_eq!(combine("q", "   "), Err(ExpansionError::EmptyResponse));
    }

    #[test]
    fn test_render_prompt() {
        let expander = LlmExpander::new(
            &ExpansionConfig::default(),
            "key".to_string(),
            "Rewrite: {query}".to_string(),
        )
        .unwrap();
        assert_eq!(expander.render_prompt("casque"), "Rewrite: casque");
    }

    #[test]
    fn test_load_prompt_from_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Custom {{query}}").unwrap();
        assert_eq!(load_prompt(Some(file.path())), "Custom {query}");

        let missing = std::path::Path::new("/nonexistent/prompt.txt");
        assert_eq!(load_prompt(Some(missing)), DEFAULT_PROMPT);
        assert_eq!(load_prompt(None), DEFAULT_PROMPT);
    }

    #[test]
    fn test_response_parsing() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "casque protection"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            body.choices[0].message.content.as_deref(),
            Some("casque protection")
        );
    }
}
