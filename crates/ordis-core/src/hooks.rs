use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use crate::error::Result;
use crate::types::{ChatRequest, SessionId, StreamChunk, ToolResult};

/// Fixed context record handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub session_id: SessionId,
    pub agent_id: String,
    pub channel: String,
}

/// An interception point in the request pipeline.
///
/// Hooks form an ordered transformer chain: `pre_send` may rewrite the
/// outbound request (a privacy filter redacting fields is the canonical
/// implementation), `post_receive` observes inbound chunks without modifying
/// them, and `pre_tool`/`post_tool` wrap each tool execution symmetrically.
/// Default implementations pass values through untouched.
pub trait Hook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn pre_send<'a>(
        &'a self,
        request: ChatRequest,
        _ctx: &'a HookContext,
    ) -> BoxFuture<'a, Result<ChatRequest>> {
        Box::pin(async move { Ok(request) })
    }

    fn post_receive<'a>(
        &'a self,
        _chunk: &'a StreamChunk,
        _ctx: &'a HookContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn pre_tool<'a>(
        &'a self,
        _tool: &'a str,
        input: serde_json::Value,
        _ctx: &'a HookContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move { Ok(input) })
    }

    fn post_tool<'a>(
        &'a self,
        _tool: &'a str,
        _result: &'a ToolResult,
        _ctx: &'a HookContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Ordered hook chain with per-hook isolation.
///
/// A hook that returns an error or exceeds the per-hook timeout is logged and
/// skipped; the previous value keeps flowing. The pipeline is never broken by
/// a hook.
pub struct HookManager {
    hooks: Vec<Arc<dyn Hook>>,
    timeout: Duration,
}

impl HookManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hooks: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the pre-send chain. Each hook's return value replaces the prior
    /// value; failures keep the last good value.
    pub async fn pre_send(&self, mut request: ChatRequest, ctx: &HookContext) -> ChatRequest {
        for hook in &self.hooks {
            let candidate = request.clone();
            match tokio::time::timeout(self.timeout, hook.pre_send(candidate, ctx)).await {
                Ok(Ok(rewritten)) => request = rewritten,
                Ok(Err(e)) => {
                    warn!(hook = %hook.name(), error = %e, "pre_send hook failed, skipping");
                }
                Err(_) => {
                    warn!(hook = %hook.name(), "pre_send hook timed out, skipping");
                }
            }
        }
        request
    }

    /// Run the post-receive chain. Observers only; chunks are not modified.
    pub async fn post_receive(&self, chunk: &StreamChunk, ctx: &HookContext) {
        for hook in &self.hooks {
            match tokio::time::timeout(self.timeout, hook.post_receive(chunk, ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(hook = %hook.name(), error = %e, "post_receive hook failed");
                }
                Err(_) => {
                    warn!(hook = %hook.name(), "post_receive hook timed out");
                }
            }
        }
    }

    /// Run the pre-tool chain over the tool input.
    pub async fn pre_tool(
        &self,
        tool: &str,
        mut input: serde_json::Value,
        ctx: &HookContext,
    ) -> serde_json::Value {
        for hook in &self.hooks {
            let candidate = input.clone();
            match tokio::time::timeout(self.timeout, hook.pre_tool(tool, candidate, ctx)).await {
                Ok(Ok(rewritten)) => input = rewritten,
                Ok(Err(e)) => {
                    warn!(hook = %hook.name(), tool, error = %e, "pre_tool hook failed, skipping");
                }
                Err(_) => {
                    warn!(hook = %hook.name(), tool, "pre_tool hook timed out, skipping");
                }
            }
        }
        input
    }

    /// Run the post-tool chain over the tool result.
    pub async fn post_tool(&self, tool: &str, result: &ToolResult, ctx: &HookContext) {
        for hook in &self.hooks {
            match tokio::time::timeout(self.timeout, hook.post_tool(tool, result, ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(hook = %hook.name(), tool, error = %e, "post_tool hook failed");
                }
                Err(_) => {
                    warn!(hook = %hook.name(), tool, "post_tool hook timed out");
                }
            }
        }
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrdisError;
    use crate::types::{ChatOptions, Message};

    fn ctx() -> HookContext {
        HookContext {
            session_id: SessionId::from_string("s1"),
            agent_id: "default".into(),
            channel: "cli".into(),
        }
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user(text)],
            options: ChatOptions::default(),
        }
    }

    struct Redactor;

    impl Hook for Redactor {
        fn name(&self) -> &str {
            "redactor"
        }

        fn pre_send<'a>(
            &'a self,
            mut request: ChatRequest,
            _ctx: &'a HookContext,
        ) -> BoxFuture<'a, Result<ChatRequest>> {
            Box::pin(async move {
                for msg in &mut request.messages {
                    for block in &mut msg.content {
                        if let crate::types::ContentBlock::Text { text } = block {
                            *text = text.replace("secret", "[redacted]");
                        }
                    }
                }
                Ok(request)
            })
        }
    }

    struct Exploder;

    impl Hook for Exploder {
        fn name(&self) -> &str {
            "exploder"
        }

        fn pre_send<'a>(
            &'a self,
            _request: ChatRequest,
            _ctx: &'a HookContext,
        ) -> BoxFuture<'a, Result<ChatRequest>> {
            Box::pin(async { Err(OrdisError::Config("hook blew up".into())) })
        }
    }

    struct Sleeper;

    impl Hook for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        fn pre_tool<'a>(
            &'a self,
            _tool: &'a str,
            input: serde_json::Value,
            _ctx: &'a HookContext,
        ) -> BoxFuture<'a, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(input)
            })
        }
    }

    #[tokio::test]
    async fn pre_send_rewrites_payload() {
        let mut mgr = HookManager::default();
        mgr.register(Arc::new(Redactor));
        let out = mgr.pre_send(request("my secret token"), &ctx()).await;
        assert_eq!(out.messages[0].text(), "my [redacted] token");
    }

    #[tokio::test]
    async fn failing_hook_keeps_prior_value() {
        let mut mgr = HookManager::default();
        mgr.register(Arc::new(Exploder));
        mgr.register(Arc::new(Redactor));
        let out = mgr.pre_send(request("secret"), &ctx()).await;
        // Exploder is skipped, Redactor still applies.
        assert_eq!(out.messages[0].text(), "[redacted]");
    }

    #[tokio::test]
    async fn slow_hook_times_out_and_is_skipped() {
        let mut mgr = HookManager::new(Duration::from_millis(20));
        mgr.register(Arc::new(Sleeper));
        let input = serde_json::json!({"city": "Oslo"});
        let out = mgr.pre_tool("weather", input.clone(), &ctx()).await;
        assert_eq!(out, input);
    }
}
