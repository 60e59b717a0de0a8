use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Serialize;

use ordis_core::config::ProviderConfig;
use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::ModelProvider;
use ordis_core::types::*;

use crate::decode::{decode_stream, WireDialect};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Also serves Groq, OpenRouter, Together, vLLM,
/// and the other hosted presets via `base_url`.
pub struct OpenAiProvider {
    name: String,
    model: String,
    base_url: Option<String>,
    api_key: Option<String>,
    extra_headers: Vec<(String, String)>,
    http: Client,
}

impl OpenAiProvider {
    pub fn new(name: &str, model: &str, config: &ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            extra_headers: config.extra_headers.clone().into_iter().collect(),
            http: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct OaiToolCall {
    id: String,
    r#type: &'static str,
    function: OaiFunctionCall,
}

#[derive(Serialize)]
struct OaiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn convert_messages(messages: &[Message]) -> Vec<OaiMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => out.push(OaiMessage {
                role: "system",
                content: Some(msg.text()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::User => out.push(OaiMessage {
                role: "user",
                content: Some(msg.text()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let tool_uses = msg.tool_uses();
                let text = msg.text();
                let calls: Option<Vec<OaiToolCall>> = if tool_uses.is_empty() {
                    None
                } else {
                    Some(
                        tool_uses
                            .iter()
                            .map(|(id, name, input)| OaiToolCall {
                                id: id.to_string(),
                                r#type: "function",
                                function: OaiFunctionCall {
                                    name: name.to_string(),
                                    arguments: input.to_string(),
                                },
                            })
                            .collect(),
                    )
                };
                out.push(OaiMessage {
                    role: "assistant",
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: calls,
                    tool_call_id: None,
                });
            }
            Role::Tool => out.push(OaiMessage {
                role: "tool",
                content: Some(msg.text()),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            }),
        }
    }

    out
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

impl ModelProvider for OpenAiProvider {
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
            let base_url = self.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatBody {
                model: self.model.clone(),
                messages: convert_messages(&request.messages),
                max_tokens: request.options.max_tokens,
                temperature: if request.options.temperature > 0.0 {
                    Some(request.options.temperature)
                } else {
                    None
                },
                stream: true,
                tools: convert_tools(&request.options.tools),
            };

            let mut req = self.http.post(base_url).json(&body);
            if let Some(ref api_key) = self.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &self.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| OrdisError::transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(super::status_error(response).await);
            }

            Ok(decode_stream(
                WireDialect::OpenAiSse,
                response.bytes_stream(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_role_messages_carry_call_id() {
        let messages = vec![
            Message::user("what time is it?"),
            Message::assistant_with_tools(
                String::new(),
                vec![ToolCall {
                    id: "t1".into(),
                    name: "clock".into(),
                    input: serde_json::json!({}),
                }],
            ),
            Message::tool_result("t1", "{\"time\":\"12:00\"}"),
        ];
        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1].role, "assistant");
        assert!(converted[1].tool_calls.is_some());
        assert_eq!(converted[2].role, "tool");
        assert_eq!(converted[2].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn unavailable_without_api_key() {
        let config = ProviderConfig {
            kind: "openai".into(),
            base_url: None,
            api_key: None,
            extra_headers: Default::default(),
        };
        let provider = OpenAiProvider::new("openai", "gpt-4o", &config);
        assert!(!provider.is_available());
    }
}
