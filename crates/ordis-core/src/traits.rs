use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::*;

/// A wrapper around one LLM endpoint. Participates in a fallback chain.
pub trait ModelProvider: Send + Sync + 'static {
    /// Provider name as recorded in attempts and fallback events.
    fn name(&self) -> &str;

    /// Model identifier this provider targets.
    fn model(&self) -> &str;

    /// Cheap liveness/configuration check. `false` skips the provider
    /// without counting a request against it.
    fn is_available(&self) -> bool;

    /// Send a chat request and receive the canonical chunk stream.
    fn chat(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>>;
}

/// Tool seam for extensible tool execution.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Declared timeout in seconds. `None` means the executor default applies.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }

    /// Whether this tool must run under the sandbox cap (forged skills).
    fn sandboxed(&self) -> bool {
        false
    }
}

/// Channel adapter: produces `ChannelMessage`s and consumes assistant output.
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Adapter name (e.g. "cli", "mail").
    fn name(&self) -> &str;

    /// Start receiving messages, sending them via the provided sender.
    fn start(&self, tx: mpsc::Sender<ChannelMessage>) -> BoxFuture<'_, Result<()>>;

    /// Deliver assistant output for a session.
    fn send(&self, session: &SessionId, content: &MessageContent) -> BoxFuture<'_, Result<()>>;

    /// Stop the adapter gracefully.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;
}
