use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, error};

use ordis_core::config::TimeoutsConfig;
use ordis_core::error::OrdisError;
use ordis_core::types::{ToolContext, ToolDefinition, ToolResult};
use ordis_eventlog::{EventLog, EventLogEntry};

use crate::registry::ToolRegistry;
use crate::validate::validate_args;

/// Outcome of one executor call: the tool result plus its wall-clock cost.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: ToolResult,
    pub duration_ms: u64,
}

/// Runs a named tool with validation, timeout, capture, and logging.
///
/// Every call (success, validation failure, timeout, or exception)
/// produces exactly one `tool_execution` entry in the event log. The
/// executor never retries; retry policy belongs to the caller.
pub struct ToolExecutor {
    registry: Arc<RwLock<ToolRegistry>>,
    event_log: Arc<EventLog>,
    timeouts: TimeoutsConfig,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<RwLock<ToolRegistry>>,
        event_log: Arc<EventLog>,
        timeouts: TimeoutsConfig,
    ) -> Self {
        Self {
            registry,
            event_log,
            timeouts,
        }
    }

    pub fn registry(&self) -> Arc<RwLock<ToolRegistry>> {
        Arc::clone(&self.registry)
    }

    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.read().await.definitions()
    }

    /// Execute `name` with `args`. Errors are textualized into the result,
    /// never propagated: a failing tool is data for the model, not a crash.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> ExecutionOutcome {
        let start = Instant::now();

        // Hold only a read reference for the duration of the call so the
        // registry can serve concurrent executions; removal waits for us.
        let tool = self.registry.read().await.get(name);
        let tool = match tool {
            Some(t) => t,
            None => {
                let result = ToolResult::error(format!("Tool not found: {}", name));
                return self.record(name, args, result, start, &ctx).await;
            }
        };

        let validated = match validate_args(&tool.input_schema(), args.clone()) {
            Ok(v) => v,
            Err(e) => {
                let result = ToolResult::error(e.to_string());
                return self.record(name, args, result, start, &ctx).await;
            }
        };

        let timeout = self.timeout_for(tool.timeout_secs(), tool.sandboxed());
        debug!(tool = name, timeout_secs = timeout.as_secs(), "Executing tool");

        let outcome =
            tokio::time::timeout(timeout, tool.execute(validated.clone(), ctx.clone())).await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(tool = name, error = %e, "Tool execution failed");
                ToolResult::error(e.to_string())
            }
            Err(_) => {
                let e = OrdisError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                error!(tool = name, timeout_secs = timeout.as_secs(), "Tool timed out");
                ToolResult::error(e.to_string())
            }
        };

        self.record(name, validated, result, start, &ctx).await
    }

    /// Sandboxed tools are capped at the sandbox limit regardless of their
    /// declared timeout.
    fn timeout_for(&self, declared: Option<u64>, sandboxed: bool) -> Duration {
        let secs = declared.unwrap_or(self.timeouts.tool_secs);
        let secs = if sandboxed {
            secs.min(self.timeouts.sandbox_secs)
        } else {
            secs
        };
        Duration::from_secs(secs)
    }

    async fn record(
        &self,
        name: &str,
        args: serde_json::Value,
        result: ToolResult,
        start: Instant,
        ctx: &ToolContext,
    ) -> ExecutionOutcome {
        let duration_ms = start.elapsed().as_millis() as u64;

        let (error, result_json) = if result.is_error {
            (Some(result.content.clone()), serde_json::Value::Null)
        } else {
            (
                None,
                serde_json::from_str(&result.content)
                    .unwrap_or(serde_json::Value::String(result.content.clone())),
            )
        };

        let entry = EventLogEntry::tool_execution(name, args, result_json, error, duration_ms)
            .with_agent(ctx.agent_id.clone())
            .with_session(ctx.session_id.0.clone())
            .with_channel(ctx.channel.clone());

        if let Err(e) = self.event_log.insert(entry) {
            error!(error = %e, "Failed to record tool execution");
        }

        ExecutionOutcome {
            result,
            duration_ms,
        }
    }
}
