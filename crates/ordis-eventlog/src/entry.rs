use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordis_core::types::ForgeEventKind;

/// Event log entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolExecution,
    Fallback,
    ForgeEvent,
    Error,
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolExecution => "tool_execution",
            Self::Fallback => "fallback",
            Self::ForgeEvent => "forge_event",
            Self::Error => "error",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_execution" => Some(Self::ToolExecution),
            "fallback" => Some(Self::Fallback),
            "forge_event" => Some(Self::ForgeEvent),
            "error" => Some(Self::Error),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One append-only record of runtime activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Unique id; assigned on insert when empty.
    #[serde(default)]
    pub id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Tool name or capability label.
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EventLogEntry {
    fn base(kind: EventKind, tool: impl Into<String>, success: bool) -> Self {
        Self {
            id: String::new(),
            kind,
            timestamp: Utc::now(),
            tool: tool.into(),
            args: serde_json::Value::Null,
            result: serde_json::Value::Null,
            error: None,
            duration_ms: 0,
            agent_id: None,
            session_id: None,
            channel: None,
            success,
            tags: Vec::new(),
        }
    }

    /// A completed tool call (success or failure).
    pub fn tool_execution(
        tool: impl Into<String>,
        args: serde_json::Value,
        result: serde_json::Value,
        error: Option<String>,
        duration_ms: u64,
    ) -> Self {
        let success = error.is_none();
        Self {
            args,
            result,
            error,
            duration_ms,
            ..Self::base(EventKind::ToolExecution, tool, success)
        }
    }

    /// A recorded provider switch inside a fallback chain.
    pub fn fallback(from: &str, to: &str, reason: &str) -> Self {
        Self {
            args: serde_json::json!({
                "failedProvider": from,
                "succeededProvider": to,
                "reason": reason,
            }),
            tags: vec!["fallback".into()],
            ..Self::base(EventKind::Fallback, "provider_chain", true)
        }
    }

    /// A forge lifecycle event.
    pub fn forge(kind: ForgeEventKind, capability: impl Into<String>, detail: serde_json::Value) -> Self {
        let success = !matches!(kind, ForgeEventKind::TestFailed | ForgeEventKind::Quarantined);
        Self {
            args: detail,
            tags: vec!["forge".into(), kind.as_str().into()],
            ..Self::base(EventKind::ForgeEvent, capability, success)
        }
    }

    /// A runtime error outside tool execution.
    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::base(EventKind::Error, source, false)
        }
    }

    /// An operational record (queue drop, task skip, ...).
    pub fn system(source: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            args: detail,
            ..Self::base(EventKind::System, source, true)
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Query filter; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub kind: Option<EventKind>,
    pub tool: Option<String>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_execution_success_tracks_error() {
        let ok = EventLogEntry::tool_execution(
            "clock",
            serde_json::json!({}),
            serde_json::json!({"time": "12:00"}),
            None,
            3,
        );
        assert!(ok.success);

        let failed = EventLogEntry::tool_execution(
            "csv_to_json",
            serde_json::json!({"path": "/tmp/x.csv"}),
            serde_json::Value::Null,
            Some("not supported".into()),
            12,
        );
        assert!(!failed.success);
        assert_eq!(failed.kind, EventKind::ToolExecution);
    }

    #[test]
    fn fallback_entry_carries_both_providers() {
        let entry = EventLogEntry::fallback("A", "B", "HTTP 500");
        assert_eq!(entry.kind, EventKind::Fallback);
        assert_eq!(entry.args["failedProvider"], "A");
        assert_eq!(entry.args["succeededProvider"], "B");
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            EventKind::ToolExecution,
            EventKind::Fallback,
            EventKind::ForgeEvent,
            EventKind::Error,
            EventKind::System,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("bogus"), None);
    }
}
