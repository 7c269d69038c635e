//! Provider catalogue for the OpenAI-compatible chat-completions API

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Groq,
    XAI,
    OpenRouter,
    /// Any OpenAI-compatible server reached through `model.endpoint`.
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Groq => "groq",
            Provider::XAI => "xai",
            Provider::OpenRouter => "openrouter",
            Provider::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "groq" => Some(Provider::Groq),
            "xai" | "grok" => Some(Provider::XAI),
            "openrouter" => Some(Provider::OpenRouter),
            "custom" | "openai-compatible" => Some(Provider::Custom),
            _ => None,
        }
    }

    /// Base URL used when the config does not set `endpoint`.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1"),
            Provider::Groq => Some("https://api.groq.com/openai/v1"),
            Provider::XAI => Some("https://api.x.ai/v1"),
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Provider::Custom => None,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
