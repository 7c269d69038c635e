//! # LLM Client
//!
//! Provides the `Client` struct, the production [`ModelClient`]. It owns one pooled HTTP
//! client and the resolved provider configuration.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::config::ModelConfig;
use crate::domain::errors::ModelError;
use crate::domain::traits::{ModelClient, ModelRequest};
use crate::domain::types::ConversationItem;
use crate::infrastructure::llm::providers::{self, ProviderConfig};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Simple LLM client
pub struct Client {
    http: reqwest::Client,
    provider_config: ProviderConfig,
}

impl Client {
    /// Create a new client from the model section of the configuration
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let provider_config = ProviderConfig::from_model_config(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                provider_config.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| {
                ModelError::config(
                    provider_config.provider.as_str(),
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            http,
            provider_config,
        })
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider_config
    }
}

#[async_trait]
impl ModelClient for Client {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ConversationItem, ModelError> {
        providers::openai::chat(&self.http, &self.provider_config, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::llm::Provider;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(Provider::from_str("openai"), Some(Provider::OpenAI));
        assert_eq!(Provider::from_str("groq"), Some(Provider::Groq));
        assert_eq!(Provider::from_str("xai"), Some(Provider::XAI));
        assert_eq!(Provider::from_str("grok"), Some(Provider::XAI));
        assert_eq!(Provider::from_str("openrouter"), Some(Provider::OpenRouter));
        assert_eq!(Provider::from_str("custom"), Some(Provider::Custom));
        assert_eq!(Provider::from_str("unknown"), None);
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = ModelConfig {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            endpoint: None,
            api_key: None,
            api_key_env: None,
            timeout: None,
            temperature: None,
        };
        assert!(matches!(Client::new(&config), Err(ModelError::Config { .. })));
    }
}
