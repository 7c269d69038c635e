//! # LLM Providers
//!
//! Every supported provider speaks the OpenAI chat-completions dialect; they differ only in
//! base URL and credentials.

pub mod openai;

use crate::domain::config::ModelConfig;
use crate::domain::errors::ModelError;
use crate::infrastructure::llm::Provider;

/// Configuration for a provider
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    /// API key
    pub api_key: String,
    pub base_url: String,
    /// Timeout in seconds
    pub timeout: Option<u64>,
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    pub fn from_model_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let provider = Provider::from_str(&config.provider)
            .ok_or_else(|| ModelError::config(&config.provider, "Unknown provider"))?;

        let api_key = if let Some(key) = &config.api_key {
            key.clone()
        } else if let Some(env_var) = &config.api_key_env {
            std::env::var(env_var).map_err(|e| {
                ModelError::config(
                    &config.provider,
                    format!("API key env var {} not set: {}", env_var, e),
                )
            })?
        } else {
            return Err(ModelError::config(
                &config.provider,
                "No API key provided - set api_key or api_key_env",
            ));
        };

        let base_url = match (&config.endpoint, provider.default_base_url()) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(ModelError::config(
                    &config.provider,
                    "model.endpoint is required for custom providers",
                ));
            }
        };

        Ok(Self {
            provider,
            api_key,
            base_url,
            timeout: config.timeout,
            temperature: config.temperature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(provider: &str, endpoint: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model: "m".into(),
            endpoint: endpoint.map(String::from),
            api_key: Some("sk-test".into()),
            api_key_env: None,
            timeout: Some(30),
            temperature: None,
        }
    }

    #[test]
    fn test_default_base_urls() {
        let config = ProviderConfig::from_model_config(&model_config("groq", None)).unwrap();
        assert_eq!(config.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.provider, Provider::Groq);
    }

    #[test]
    fn test_endpoint_overrides_default() {
        let config = ProviderConfig::from_model_config(&model_config(
            "custom",
            Some("http://localhost:11434/v1/"),
        ))
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_custom_without_endpoint_fails() {
        assert!(ProviderConfig::from_model_config(&model_config("custom", None)).is_err());
        assert!(ProviderConfig::from_model_config(&model_config("nope", None)).is_err());
    }
}
