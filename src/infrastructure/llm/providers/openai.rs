//! OpenAI-compatible API provider
//!
//! Maps the conversation history and tool registry onto `/chat/completions` and parses the
//! assistant message (text and tool calls) back out.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ProviderConfig;
use crate::domain::errors::ModelError;
use crate::domain::traits::ModelRequest;
use crate::domain::types::{ConversationItem, InputContent, ToolCallRequest, ToolDescriptor};
use crate::infrastructure::llm::TokenUsage;

/// OpenAI API request format
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAIMessage {
    System {
        content: String,
    },
    User {
        content: OpenAIUserContent,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<OpenAIToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIUserContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAIFunctionDef,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Execute a chat request using OpenAI-compatible API
pub async fn chat(
    http: &Client,
    config: &ProviderConfig,
    request: ModelRequest<'_>,
) -> Result<ConversationItem, ModelError> {
    let provider = config.provider.as_str();
    let url = format!("{}/chat/completions", config.base_url);
    let body = build_request(config, request).await?;

    let mut request_builder = http
        .post(&url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Content-Type", "application/json")
        .json(&body);

    if let Some(timeout_secs) = config.timeout {
        request_builder = request_builder.timeout(std::time::Duration::from_secs(timeout_secs));
    }

    let response = request_builder
        .send()
        .await
        .map_err(|e| ModelError::Transport {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        // Try to parse error message from response
        let message = serde_json::from_str::<serde_json::Value>(&error_text)
            .ok()
            .and_then(|json| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            })
            .unwrap_or(error_text);

        return Err(ModelError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    let text = response.text().await.map_err(|e| ModelError::Transport {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    parse_response(provider, &text)
}

async fn build_request(
    config: &ProviderConfig,
    request: ModelRequest<'_>,
) -> Result<OpenAIRequest, ModelError> {
    let mut messages = Vec::with_capacity(request.history.len() + 1);
    if !request.instructions.trim().is_empty() {
        messages.push(OpenAIMessage::System {
            content: request.instructions.to_string(),
        });
    }

    for item in request.history {
        let message = match item {
            ConversationItem::User { content } => OpenAIMessage::User {
                content: user_content(config, content).await?,
            },
            ConversationItem::Assistant { text, tool_calls } => OpenAIMessage::Assistant {
                content: text.clone(),
                tool_calls: tool_calls
                    .iter()
                    .map(|call| OpenAIToolCall {
                        id: call.id.clone(),
                        kind: function_type(),
                        function: OpenAIFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
            },
            ConversationItem::ToolResult(result) => OpenAIMessage::Tool {
                tool_call_id: result.call_id.clone(),
                content: result.content.clone(),
            },
        };
        messages.push(message);
    }

    Ok(OpenAIRequest {
        model: request.model.to_string(),
        messages,
        tools: request.tools.iter().map(tool_definition).collect(),
        temperature: config.temperature,
    })
}

fn tool_definition(tool: &ToolDescriptor) -> OpenAITool {
    OpenAITool {
        kind: "function",
        function: OpenAIFunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

async fn user_content(
    config: &ProviderConfig,
    content: &[InputContent],
) -> Result<OpenAIUserContent, ModelError> {
    if let [InputContent::Text { text }] = content {
        return Ok(OpenAIUserContent::Text(text.clone()));
    }

    let mut parts = Vec::with_capacity(content.len());
    for part in content {
        parts.push(match part {
            InputContent::Text { text } => OpenAIContentPart::Text { text: text.clone() },
            InputContent::Image { source } => OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl {
                    url: image_url(config, source).await?,
                },
            },
        });
    }
    Ok(OpenAIUserContent::Parts(parts))
}

/// Local paths are inlined as base64 data URLs; URLs pass through.
async fn image_url(config: &ProviderConfig, source: &str) -> Result<String, ModelError> {
    if source.starts_with("http://") || source.starts_with("https://") || source.starts_with("data:")
    {
        return Ok(source.to_string());
    }

    let bytes = tokio::fs::read(source).await.map_err(|e| {
        ModelError::config(
            config.provider.as_str(),
            format!("failed to read image {source}: {e}"),
        )
    })?;
    Ok(format!(
        "data:{};base64,{}",
        image_mime(Path::new(source)),
        BASE64.encode(bytes)
    ))
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn parse_response(provider: &str, body: &str) -> Result<ConversationItem, ModelError> {
    let response: OpenAIResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::malformed(provider, format!("Failed to parse response: {}", e)))?;

    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ModelError::malformed(provider, "No choices in response"));
    };

    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();
    tracing::debug!(
        provider,
        model = response.model.as_deref().unwrap_or("?"),
        finish_reason = choice.finish_reason.as_deref().unwrap_or("?"),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        "model response received"
    );

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(ConversationItem::Assistant {
        text: choice.message.content.filter(|text| !text.is_empty()),
        tool_calls,
    })
}
