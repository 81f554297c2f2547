//! LLM integration for persona-reply.
//!
//! The reply generator only depends on the `LlmProvider` trait. The shipped
//! backend is `OpenAiCompatProvider`, which speaks the OpenAI chat completions
//! protocol and therefore covers Ollama as well as hosted OpenAI.

mod openai_compat;
pub mod provider;

pub use openai_compat::{OpenAiCompatProvider, completions_url};
pub use provider::*;

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

/// Default API root (local Ollama).
pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";
/// Default model name.
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read `OPENAI_API_BASE`, `MODEL_NAME` and `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_key: SecretString::from(
                std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "ollama".to_string()),
            ),
            model: std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let key = if config.api_key.expose_secret().is_empty() {
        None
    } else {
        Some(config.api_key.clone())
    };
    let provider = OpenAiCompatProvider::new(&config.base_url, key, &config.model);
    tracing::info!(
        "Using OpenAI-compatible endpoint {} (model: {})",
        provider.endpoint(),
        config.model
    );
    Arc::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_reports_model() {
        let config = LlmConfig {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: SecretString::from("ollama"),
            model: "llama3".to_string(),
        };
        let provider = create_provider(&config);
        assert_eq!(provider.model_name(), "llama3");
    }
}
