use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Deterministic session key for a `(channel, sender)` pair.
    pub fn for_pair(channel: &str, sender: &str) -> Self {
        Self(format!("{}:{}", channel, sender))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Metadata attached to synthetic messages (compaction lineage).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    /// `sessionId:timestamp` of every message absorbed into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_id_chain: Vec<String>,
}

/// A chat message. Immutable once created; timestamps are non-decreasing
/// within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Utc::now(),
            tool_call_id: None,
            session_id: None,
            metadata: None,
        }
    }

    /// An assistant message carrying streamed text plus any tool calls.
    pub fn assistant_with_tools(text: String, calls: Vec<ToolCall>) -> Self {
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        for call in calls {
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.name,
                input: call.input,
            });
        }
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            tool_call_id: None,
            session_id: None,
            metadata: None,
        }
    }

    /// A tool-role message carrying one tool result.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::Text {
                text: content.into(),
            }],
            timestamp: Utc::now(),
            tool_call_id: Some(tool_call_id.into()),
            session_id: None,
            metadata: None,
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// An incoming message from any channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub sender: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A channel message resolved to an agent, queued for processing.
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub message: ChannelMessage,
    pub agent_id: String,
    pub session_id: SessionId,
    pub received_at: DateTime<Utc>,
}

/// Content for outgoing messages.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Streaming { delta: String, done: bool },
}

/// Canonical streaming event. Every provider dialect is normalized into
/// exactly this shape by the stream decoder, so downstream code is oblivious
/// to the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A chunk of assistant text.
    TextDelta { text: String },

    /// A tool call opened by the model.
    ToolUseStart { id: String, name: String },

    /// A fragment of the open tool call's input JSON.
    ToolUseDelta { id: String, partial: String },

    /// The tool call is complete; `input` is the parsed argument object.
    ToolUseEnd {
        id: String,
        input: serde_json::Value,
    },

    /// The message is complete.
    MessageStop,
}

/// A completed tool call collected from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub agent_id: String,
    pub channel: String,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId, agent_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            session_id,
            agent_id: agent_id.into(),
            channel: channel.into(),
            working_dir: std::env::temp_dir(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Generation options passed to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub tools: Vec<ToolDefinition>,
    pub session_id: Option<SessionId>,
    pub channel: Option<String>,
}

/// A chat request: the assembled message list plus generation options.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

/// One provider invocation inside a fallback chain, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Forge lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeEventKind {
    GapDetected,
    BuildStarted,
    BuildCompleted,
    TestPassed,
    TestFailed,
    Promoted,
    Quarantined,
}

impl ForgeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GapDetected => "gap_detected",
            Self::BuildStarted => "build_started",
            Self::BuildCompleted => "build_completed",
            Self::TestPassed => "test_passed",
            Self::TestFailed => "test_failed",
            Self::Promoted => "promoted",
            Self::Quarantined => "quarantined",
        }
    }
}

/// Runtime event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A turn started for a session.
    TurnStarted { session_id: SessionId },
    /// Text streaming from the model.
    TextDelta { session_id: SessionId, text: String },
    /// Tool execution started.
    ToolStart {
        session_id: SessionId,
        name: String,
        input: serde_json::Value,
    },
    /// Tool execution completed.
    ToolEnd {
        session_id: SessionId,
        name: String,
        result: ToolResult,
    },
    /// The turn finished; the assistant message is appended.
    TurnComplete {
        session_id: SessionId,
        rounds: usize,
    },
    /// The turn ended in error; the session stays usable.
    TurnError { session_id: SessionId, error: String },
    /// A queued channel message was dropped on overflow.
    MessageDropped { channel: String, sender: String },
    /// A scheduled task handler requests outside work.
    TaskExecute {
        task_id: String,
        payload: serde_json::Value,
    },
    /// A scheduled task handler finished.
    TaskCompleted { task_id: String },
    /// A scheduled task handler failed.
    TaskError { task_id: String, error: String },
    /// A firing was skipped because the previous run is still in progress.
    TaskSkipped { task_id: String },
    /// Forge lifecycle event (gap detected, promoted, quarantined, ...).
    Forge {
        kind: ForgeEventKind,
        detail: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_flattens_blocks() {
        let msg = Message::assistant_with_tools(
            "checking".into(),
            vec![ToolCall {
                id: "t1".into(),
                name: "clock".into(),
                input: serde_json::json!({}),
            }],
        );
        assert_eq!(msg.text(), "checking");
        assert_eq!(msg.tool_uses().len(), 1);
        assert_eq!(msg.tool_uses()[0].1, "clock");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("t1", "{\"time\":\"12:00\"}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn session_id_for_pair_is_deterministic() {
        assert_eq!(
            SessionId::for_pair("cli", "alice"),
            SessionId::for_pair("cli", "alice")
        );
        assert_ne!(
            SessionId::for_pair("cli", "alice"),
            SessionId::for_pair("mail", "alice")
        );
    }

    #[test]
    fn forge_event_kind_strings() {
        assert_eq!(ForgeEventKind::GapDetected.as_str(), "gap_detected");
        assert_eq!(ForgeEventKind::Quarantined.as_str(), "quarantined");
    }
}
