//! Structured error taxonomy for the remote-operation surface.
//!
//! Every recoverable failure is returned to the caller as a payload carrying
//! a stable `kind` string and a human-readable message. Nothing in this
//! module is allowed to crash the server; the dispatch loop converts these
//! into error tool-results.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by remote operations and session control.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A required argument was missing or malformed.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The key name is neither a control combination, a named key, nor a
    /// single character.
    #[error("unknown key {0:?}")]
    UnknownKey(String),

    /// No target session could be resolved through the focus chain.
    #[error("no session available; create one with run_tui or create_process")]
    NoSession,

    /// The requested terminal ID is not present in the registry.
    #[error("unknown terminal id {id:?} ({})", describe_available(.available))]
    UnknownSession {
        /// The ID the caller asked for.
        id: String,
        /// The IDs that do exist, to help the caller recover.
        available: Vec<String>,
    },

    /// The operation requires a live child, but the session has exited.
    #[error("session is not running")]
    NotRunning,

    /// Spawning the child process failed.
    #[error("failed to spawn {command:?}: {cause}")]
    SpawnFailed {
        /// The command that could not be spawned.
        command: String,
        /// The underlying cause, rendered with its context chain.
        cause: String,
    },

    /// `start` was called while the child is still running.
    #[error("session is already running")]
    AlreadyRunning,

    /// The launch recipe has no command to execute.
    #[error("no command configured for this session")]
    InvalidCommand,
}

impl ServerError {
    /// Stable kind identifier for the structured error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgs(_) => "invalid_args",
            Self::UnknownKey(_) => "unknown_key",
            Self::NoSession => "no_session",
            Self::UnknownSession { .. } => "unknown_session",
            Self::NotRunning => "not_running",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::AlreadyRunning => "already_running",
            Self::InvalidCommand => "invalid_command",
        }
    }

    /// Serialize into the `{kind, message}` payload the protocol returns.
    pub fn to_payload(&self) -> Value {
        json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

/// Render the available-ID list for [`ServerError::UnknownSession`].
fn describe_available(available: &[String]) -> String {
    if available.is_empty() {
        "no sessions exist".to_string()
    } else {
        format!("available: {}", available.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_lists_candidates() {
        let err = ServerError::UnknownSession {
            id: "9".to_string(),
            available: vec!["1".to_string(), "2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"9\""));
        assert!(msg.contains("available: 1, 2"));
    }

    #[test]
    fn unknown_session_empty_registry() {
        let err = ServerError::UnknownSession {
            id: "1".to_string(),
            available: vec![],
        };
        assert!(err.to_string().contains("no sessions exist"));
    }

    #[test]
    fn payload_carries_kind_and_message() {
        let err = ServerError::NotRunning;
        let payload = err.to_payload();
        assert_eq!(payload["kind"], "not_running");
        assert_eq!(payload["message"], "session is not running");
    }

    #[test]
    fn kinds_are_distinct() {
        let errs = [
            ServerError::InvalidArgs(String::new()),
            ServerError::UnknownKey(String::new()),
            ServerError::NoSession,
            ServerError::NotRunning,
            ServerError::AlreadyRunning,
            ServerError::InvalidCommand,
        ];
        let mut kinds: Vec<&str> = errs.iter().map(ServerError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errs.len());
    }
}
