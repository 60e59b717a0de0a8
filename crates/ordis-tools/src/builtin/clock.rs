use futures::future::BoxFuture;
use serde::Deserialize;

use ordis_core::error::Result;
use ordis_core::traits::Tool;
use ordis_core::types::{ToolContext, ToolResult};

pub struct ClockTool;

#[derive(Deserialize)]
struct ClockInput {
    #[serde(default)]
    format: Option<String>,
}

impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current date and time (UTC). Optionally pass a strftime format string."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "strftime format, e.g. %H:%M (default: RFC 3339)"
                }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: ClockInput = serde_json::from_value(input).unwrap_or(ClockInput {
                format: None,
            });
            let now = chrono::Utc::now();
            let time = match params.format {
                Some(fmt) => now.format(&fmt).to_string(),
                None => now.to_rfc3339(),
            };
            Ok(ToolResult::success(
                serde_json::json!({"time": time}).to_string(),
            ))
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(5)
    }
}
