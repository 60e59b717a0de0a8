use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Serialize;

use ordis_core::config::ProviderConfig;
use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::ModelProvider;
use ordis_core::types::*;

use crate::decode::{decode_stream, WireDialect};

const OLLAMA_API_URL: &str = "http://localhost:11434/api/chat";

/// Local Ollama endpoint. Streams NDJSON; tool calls arrive fully formed.
pub struct OllamaProvider {
    name: String,
    model: String,
    base_url: Option<String>,
    http: Client,
}

impl OllamaProvider {
    pub fn new(name: &str, model: &str, config: &ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            base_url: config.base_url.clone(),
            http: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    options: Options,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct Options {
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_uses = msg.tool_uses();
            let tool_calls = if tool_uses.is_empty() {
                None
            } else {
                Some(
                    tool_uses
                        .iter()
                        .map(|(_, name, input)| {
                            serde_json::json!({
                                "function": {"name": name, "arguments": input}
                            })
                        })
                        .collect(),
                )
            };
            ApiMessage {
                role,
                content: msg.text(),
                tool_calls,
            }
        })
        .collect()
}

impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        // No credentials needed; reachability surfaces as a transport error.
        true
    }

    fn chat(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>> {
        Box::pin(async move {
            let base_url = self.base_url.as_deref().unwrap_or(OLLAMA_API_URL);

            let tools: Vec<serde_json::Value> = request
                .options
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();

            let body = ChatBody {
                model: self.model.clone(),
                messages: convert_messages(&request.messages),
                stream: true,
                tools,
                options: Options {
                    num_predict: request.options.max_tokens,
                    temperature: if request.options.temperature > 0.0 {
                        Some(request.options.temperature)
                    } else {
                        None
                    },
                },
            };

            let response = self
                .http
                .post(base_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| OrdisError::transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(super::status_error(response).await);
            }

            Ok(decode_stream(
                WireDialect::OllamaNdjson,
                response.bytes_stream(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_directly() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::tool_result("t1", "out"),
        ];
        let converted = convert_messages(&messages);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "tool");
    }
}
