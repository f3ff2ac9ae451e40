//! # Dossier Models
//!
//! Centralized LLM configuration types. Every section agent that talks to
//! a language model resolves its client through [`ModelConfig`], so the
//! provider choice lives in exactly one place.

use radkit::models::providers::{
    AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
};
use radkit::models::BaseLlm;
use serde::{Deserialize, Serialize};

/// Supported LLM providers.
///
/// Each provider loads its API key from the environment:
/// `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`,
/// `OPENROUTER_API_KEY`, `XAI_API_KEY`, `DEEPSEEK_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Display name for API responses and logs
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Whether this provider supports a custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }

    /// Default model for this provider when no override is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.0-flash-exp",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }
}

/// Configuration for LLM model selection.
///
/// Supports a global choice plus per-section overrides resolved by the
/// research configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: LlmProvider::Anthropic.default_model().to_string(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Create a new model config with the default provider (Anthropic)
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: model.into(),
            base_url: None,
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Create an LLM client based on the configured provider.
    ///
    /// Each provider uses `from_env()` to load API keys from environment
    /// variables.
    pub fn create_llm(&self) -> anyhow::Result<Box<dyn BaseLlm + Send + Sync>> {
        match self.provider {
            LlmProvider::Anthropic => Ok(Box::new(AnthropicLlm::from_env(&self.model)?)),
            LlmProvider::OpenAI => {
                let llm = if let Some(base_url) = &self.base_url {
                    OpenAILlm::from_env(&self.model)?.with_base_url(base_url)
                } else {
                    OpenAILlm::from_env(&self.model)?
                };
                Ok(Box::new(llm))
            }
            LlmProvider::Gemini => Ok(Box::new(GeminiLlm::from_env(&self.model)?)),
            LlmProvider::OpenRouter => Ok(Box::new(OpenRouterLlm::from_env(&self.model)?)),
            LlmProvider::Grok => Ok(Box::new(GrokLlm::from_env(&self.model)?)),
            LlmProvider::DeepSeek => Ok(Box::new(DeepSeekLlm::from_env(&self.model)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert!(config.model.contains("claude"));
    }

    #[test]
    fn test_base_url_support() {
        assert!(LlmProvider::OpenAI.supports_base_url());
        assert!(!LlmProvider::Anthropic.supports_base_url());
    }

    #[test]
    fn test_model_config_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("openai"));
        assert!(json.contains("gpt-4o"));
    }
}
