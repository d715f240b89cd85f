//! Request log: one line per tool call, one per result.
//!
//! Observability must never throttle the control path, so every write error
//! here is swallowed. The file is opened once at startup; if it cannot be
//! opened the log is silently disabled.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

/// Append-only request log with ISO-8601 UTC timestamps.
#[derive(Debug)]
pub struct CallLog {
    file: Option<Mutex<File>>,
}

impl CallLog {
    /// Open the log at `path`, or create a disabled log for `None`.
    pub fn new(path: Option<&Path>) -> Self {
        let file = path.and_then(|p| {
            match OpenOptions::new().create(true).append(true).open(p) {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    log::warn!("could not open request log {}: {e}", p.display());
                    None
                }
            }
        });
        Self { file }
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Record an incoming tool call.
    pub fn call(&self, tool: &str, arguments: &Value) {
        self.write_line(
            "TOOL_CALL",
            &serde_json::json!({ "tool": tool, "arguments": arguments }),
        );
    }

    /// Record a tool result or error.
    pub fn result(&self, tool: &str, is_error: bool, summary: &str) {
        self.write_line(
            "TOOL_RESULT",
            &serde_json::json!({ "tool": tool, "is_error": is_error, "summary": summary }),
        );
    }

    fn write_line(&self, kind: &str, body: &Value) {
        let Some(file) = &self.file else { return };
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let mut file = match file.lock() {
            Ok(f) => f,
            Err(_) => return,
        };
        let _ = writeln!(file, "{timestamp} {kind} {body}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_is_silent() {
        let log = CallLog::disabled();
        log.call("wait", &serde_json::json!({"ms": 100}));
        log.result("wait", false, "waited 100ms");
    }

    #[test]
    fn records_calls_and_results_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let log = CallLog::new(Some(path.as_path()));
        log.call("press_key", &serde_json::json!({"key": "enter"}));
        log.result("press_key", false, "pressed enter");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("TOOL_CALL"));
        assert!(lines[1].contains("TOOL_RESULT"));
        // ISO-8601 UTC timestamp prefix.
        for line in lines {
            let stamp = line.split_whitespace().next().unwrap();
            assert!(stamp.ends_with('Z'), "timestamp not UTC: {stamp}");
            assert_eq!(&stamp[4..5], "-");
            assert_eq!(&stamp[10..11], "T");
        }
    }

    #[test]
    fn unopenable_path_disables_the_log() {
        let log = CallLog::new(Some(Path::new("/nonexistent-dir/requests.log")));
        // Must not panic or error.
        log.call("wait", &serde_json::json!({}));
    }
}
