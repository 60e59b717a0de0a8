use thiserror::Error;

use crate::types::ProviderAttempt;

#[derive(Debug, Error)]
pub enum OrdisError {
    // Provider errors
    #[error("Provider request failed{}: {message}", status_suffix(.status))]
    Provider {
        /// HTTP status of the failed request. `Some(0)` marks a transport
        /// failure (connect error, timeout); `None` means the error did not
        /// come from an HTTP exchange at all.
        status: Option<u16>,
        message: String,
    },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("All providers failed ({} attempts)", .attempts.len())]
    FallbackChain { attempts: Vec<ProviderAttempt> },

    #[error("Stream decode error: {0}")]
    StreamDecode(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArgs(String),

    // Turn errors
    #[error("Turn exceeded tool loop bound ({0})")]
    ToolLoop(usize),

    #[error("Turn cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Channel errors
    #[error("Channel error: {channel}: {message}")]
    Channel { channel: String, message: String },

    // Scheduler errors
    #[error("Schedule error: {0}")]
    Schedule(String),

    // Skill errors
    #[error("Skill error: {0}")]
    Skill(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(0) => " (transport)".to_string(),
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

impl OrdisError {
    /// Convenience constructor for a transport-level provider failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Provider {
            status: Some(0),
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// 401/403 short-circuit the whole fallback chain.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self.http_status(), Some(401) | Some(403))
    }
}

pub type Result<T> = std::result::Result<T, OrdisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_auth_statuses() {
        let unauthorized = OrdisError::Provider {
            status: Some(401),
            message: "bad key".into(),
        };
        let forbidden = OrdisError::Provider {
            status: Some(403),
            message: "no access".into(),
        };
        let server = OrdisError::Provider {
            status: Some(500),
            message: "boom".into(),
        };
        assert!(unauthorized.is_fatal_auth());
        assert!(forbidden.is_fatal_auth());
        assert!(!server.is_fatal_auth());
        assert!(!OrdisError::Cancelled.is_fatal_auth());
    }

    #[test]
    fn transport_status_is_zero() {
        let e = OrdisError::transport("connection reset");
        assert_eq!(e.http_status(), Some(0));
        assert!(e.to_string().contains("transport"));
    }
}
