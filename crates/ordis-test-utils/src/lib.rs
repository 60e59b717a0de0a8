//! Test doubles shared across Ordis crates: a scripted model provider, a
//! configurable tool, and a capturing channel adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::{ChannelAdapter, ModelProvider, Tool};
use ordis_core::types::*;

/// A provider that replays scripted canonical chunk sequences, one per call.
/// Records every request it receives. When the script runs dry it answers
/// with a plain "ok" + stop.
pub struct MockProvider {
    name: String,
    responses: Mutex<VecDeque<Vec<Result<StreamChunk>>>>,
    requests: Mutex<Vec<ChatRequest>>,
    available: bool,
    fail_with_status: Option<u16>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            available: true,
            fail_with_status: None,
        }
    }

    /// A provider whose every call fails with the given HTTP status.
    pub fn failing(name: &str, status: u16) -> Self {
        Self {
            fail_with_status: Some(status),
            ..Self::new(name)
        }
    }

    /// A provider whose `is_available()` returns false.
    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    /// Queue one response: the chunk sequence a future call will stream.
    pub fn push_response(&self, chunks: Vec<StreamChunk>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(chunks.into_iter().map(Ok).collect());
    }

    /// Queue a response that ends with a stream-level error.
    pub fn push_failing_stream(&self, chunks: Vec<StreamChunk>, error: &str) {
        let mut items: Vec<Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
        items.push(Err(OrdisError::StreamDecode(error.to_string())));
        self.responses.lock().unwrap().push_back(items);
    }

    /// Convenience script: a single text reply.
    pub fn push_text(&self, text: &str) {
        self.push_response(vec![
            StreamChunk::TextDelta { text: text.into() },
            StreamChunk::MessageStop,
        ]);
    }

    /// Convenience script: one completed tool call.
    pub fn push_tool_call(&self, id: &str, name: &str, input: serde_json::Value) {
        self.push_response(vec![
            StreamChunk::ToolUseStart {
                id: id.into(),
                name: name.into(),
            },
            StreamChunk::ToolUseDelta {
                id: id.into(),
                partial: input.to_string(),
            },
            StreamChunk::ToolUseEnd {
                id: id.into(),
                input,
            },
            StreamChunk::MessageStop,
        ]);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn chat(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>> {
        self.requests.lock().unwrap().push(request);
        let scripted = self.responses.lock().unwrap().pop_front();
        let fail_with_status = self.fail_with_status;

        Box::pin(async move {
            if let Some(status) = fail_with_status {
                return Err(OrdisError::Provider {
                    status: Some(status),
                    message: "scripted failure".into(),
                });
            }
            let items = scripted.unwrap_or_else(|| {
                vec![
                    Ok(StreamChunk::TextDelta { text: "ok".into() }),
                    Ok(StreamChunk::MessageStop),
                ]
            });
            Ok(Box::pin(futures::stream::iter(items)) as BoxStream<'static, Result<StreamChunk>>)
        })
    }
}

/// A provider whose stream never ends; used to exercise cancellation.
pub struct HangingProvider {
    name: String,
    preamble: Vec<StreamChunk>,
}

impl HangingProvider {
    pub fn new(name: &str, preamble: Vec<StreamChunk>) -> Self {
        Self {
            name: name.to_string(),
            preamble,
        }
    }
}

impl ModelProvider for HangingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn chat(
        &self,
        _request: ChatRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>> {
        let preamble = self.preamble.clone();
        Box::pin(async move {
            let head = futures::stream::iter(preamble.into_iter().map(Ok));
            let tail = futures::stream::pending::<Result<StreamChunk>>();
            Ok(Box::pin(head.chain(tail)) as BoxStream<'static, Result<StreamChunk>>)
        })
    }
}

/// A tool returning a fixed JSON payload, counting invocations.
pub struct MockTool {
    name: String,
    response: serde_json::Value,
    fail: bool,
    calls: AtomicUsize,
}

impl MockTool {
    pub fn new(name: &str, response: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            response,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            response: serde_json::Value::String(error.to_string()),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.response.clone();
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Ok(ToolResult::error(
                    response.as_str().unwrap_or("failure").to_string(),
                ))
            } else {
                Ok(ToolResult::success(response.to_string()))
            }
        })
    }
}

/// An adapter that records everything sent through it.
pub struct MockAdapter {
    name: String,
    pub sent: Mutex<Vec<(SessionId, String)>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

impl ChannelAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, _tx: mpsc::Sender<ChannelMessage>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn send(&self, session: &SessionId, content: &MessageContent) -> BoxFuture<'_, Result<()>> {
        let text = match content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Streaming { delta, .. } => delta.clone(),
        };
        self.sent.lock().unwrap().push((session.clone(), text));
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
