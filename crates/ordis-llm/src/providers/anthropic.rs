use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Serialize;

use ordis_core::config::ProviderConfig;
use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::ModelProvider;
use ordis_core::types::*;

use crate::decode::{decode_stream, WireDialect};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    name: String,
    model: String,
    base_url: Option<String>,
    api_key: Option<String>,
    http: Client,
}

impl AnthropicProvider {
    pub fn new(name: &str, model: &str, config: &ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            http: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct MessagesBody {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

/// Split out the system prompt and convert the rest. Tool results travel as
/// user messages carrying `tool_result` blocks in this dialect.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
    let mut system = None;
    let mut out = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(msg.text());
            }
            Role::User => out.push(ApiMessage {
                role: "user",
                content: serde_json::Value::String(msg.text()),
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                let text = msg.text();
                if !text.is_empty() {
                    blocks.push(serde_json::json!({"type": "text", "text": text}));
                }
                for (id, name, input) in msg.tool_uses() {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }));
                }
                out.push(ApiMessage {
                    role: "assistant",
                    content: serde_json::Value::Array(blocks),
                });
            }
            Role::Tool => {
                let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                out.push(ApiMessage {
                    role: "user",
                    content: serde_json::json!([{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": msg.text(),
                    }]),
                });
            }
        }
    }

    (system, out)
}

impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn chat(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>> {
        Box::pin(async move {
            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| OrdisError::Config("Anthropic API key not set".into()))?;
            let base_url = self.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, messages) = convert_messages(&request.messages);
            let tools: Vec<ApiTool> = request
                .options
                .tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();

            let body = MessagesBody {
                model: self.model.clone(),
                max_tokens: request.options.max_tokens,
                temperature: if request.options.temperature > 0.0 {
                    Some(request.options.temperature)
                } else {
                    None
                },
                messages,
                system,
                stream: true,
                tools,
            };

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| OrdisError::transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(super::status_error(response).await);
            }

            Ok(decode_stream(
                WireDialect::AnthropicSse,
                response.bytes_stream(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_is_lifted_out() {
        let messages = vec![
            Message::system("You are Ordis."),
            Message::user("hello"),
        ];
        let (system, converted) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("You are Ordis."));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[test]
    fn tool_results_become_user_blocks() {
        let messages = vec![Message::tool_result("t1", "12:00")];
        let (_, converted) = convert_messages(&messages);
        assert_eq!(converted[0].role, "user");
        assert_eq!(converted[0].content[0]["type"], "tool_result");
        assert_eq!(converted[0].content[0]["tool_use_id"], "t1");
    }
}
