//! MCP stdio server loop.
//!
//! Translates JSON-RPC 2.0 on stdin/stdout into tool dispatches. stdin is
//! drained by a blocking reader thread feeding an unbounded channel so the
//! async loop can `select!` between incoming requests and the shutdown flag;
//! stdout carries exactly one JSON response per line.
//!
//! Launched by an MCP client as: `tuipilot [flags] [command args…]`

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};

use crate::calllog::CallLog;
use crate::ops::{self, LastCall, SharedState};

/// How often the dispatch loop re-checks the shutdown flag while idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Run the dispatch loop until stdin closes or the shutdown flag is raised.
///
/// Returns cleanly in both cases; the caller owns final teardown (killing
/// sessions, restoring the live sinks).
pub async fn run(
    state: SharedState,
    call_log: Arc<CallLog>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    // Blocking stdin reader thread; lives for the process lifetime.
    let (stdin_tx, mut stdin_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(l) if !l.trim().is_empty() => {
                    if stdin_tx.send(l).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    let mut stdout = io::stdout();
    let mut poll = tokio::time::interval(SHUTDOWN_POLL);

    loop {
        tokio::select! {
            msg = stdin_rx.recv() => {
                let Some(line) = msg else {
                    log::info!("stdin closed, shutting down");
                    return Ok(());
                };
                let parsed: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("invalid JSON on stdin: {e}");
                        continue;
                    }
                };
                handle_message(&state, &call_log, &parsed, &mut stdout).await?;
            }
            _ = poll.tick() => {
                if shutdown.load(Ordering::Relaxed) {
                    log::info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle one JSON-RPC message; notifications produce no response.
async fn handle_message(
    state: &SharedState,
    call_log: &CallLog,
    message: &Value,
    stdout: &mut io::Stdout,
) -> Result<()> {
    let method = message.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = message.get("id").cloned();

    match method {
        "initialize" => {
            let response = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {
                        "tools": {}
                    },
                    "serverInfo": {
                        "name": "tuipilot",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }
            });
            writeln!(stdout, "{response}")?;
            stdout.flush()?;
        }

        "notifications/initialized" => {
            // Notification — no response required.
        }

        "tools/list" => {
            let response = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": ops::tool_specs() }
            });
            writeln!(stdout, "{response}")?;
            stdout.flush()?;
        }

        "tools/call" => {
            let params = message.get("params").cloned().unwrap_or(json!({}));
            let tool = params
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string();
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

            call_log.call(&tool, &arguments);
            {
                let mut state = state.lock().expect("state lock poisoned");
                state.last_call = Some(LastCall {
                    tool: tool.clone(),
                    at: Instant::now(),
                });
            }

            let (content, is_error) = match ops::dispatch_tool(state, &tool, &arguments).await {
                Ok(value) => (render_result(&value), false),
                Err(e) => {
                    log::info!("tool {tool} failed: {e}");
                    (e.to_payload().to_string(), true)
                }
            };
            call_log.result(&tool, is_error, &content);

            if let Some(id) = id {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{ "type": "text", "text": content }],
                        "isError": is_error
                    }
                });
                writeln!(stdout, "{response}")?;
                stdout.flush()?;
            }
        }

        _ => {
            // Unknown method — respond with an error for requests, silently
            // ignore notifications.
            if let Some(id) = id {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("Method not found: {method}")
                    }
                });
                writeln!(stdout, "{response}")?;
                stdout.flush()?;
            }
        }
    }

    Ok(())
}

/// Render a tool result as the text content of the response. Strings pass
/// through; structured records are serialized as JSON.
fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_result_passes_strings_through() {
        assert_eq!(render_result(&json!("waited 100ms")), "waited 100ms");
    }

    #[test]
    fn render_result_serializes_records() {
        let rendered = render_result(&json!({ "cols": 80, "rows": 24 }));
        assert!(rendered.contains("\"cols\":80"));
    }
}
