use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::Tool;
use ordis_core::types::{ToolContext, ToolResult};

const MAX_BODY_BYTES: usize = 100_000;

pub struct HttpFetchTool;

#[derive(Deserialize)]
struct FetchInput {
    url: String,
}

impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP GET and return status plus body text (truncated)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"}
            },
            "required": ["url"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: FetchInput = serde_json::from_value(input)
                .map_err(|e| OrdisError::InvalidArgs(e.to_string()))?;

            if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
                return Ok(ToolResult::error(format!(
                    "Only http/https URLs are supported: {}",
                    params.url
                )));
            }

            debug!(url = %params.url, "Fetching URL");

            let response = match reqwest::get(&params.url).await {
                Ok(r) => r,
                Err(e) => return Ok(ToolResult::error(format!("{}: {}", params.url, e))),
            };

            let status = response.status().as_u16();
            let mut body = match response.text().await {
                Ok(b) => b,
                Err(e) => return Ok(ToolResult::error(format!("read body: {}", e))),
            };
            if body.len() > MAX_BODY_BYTES {
                body.truncate(MAX_BODY_BYTES);
                body.push_str("\n... (truncated)");
            }

            let result = serde_json::json!({"status": status, "body": body}).to_string();
            if (200..300).contains(&status) {
                Ok(ToolResult::success(result))
            } else {
                Ok(ToolResult::error(result))
            }
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }
}
