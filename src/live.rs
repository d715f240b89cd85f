//! Live mirroring of the focused session's screen.
//!
//! Subscribes to the registry event bus and repaints the focused grid onto
//! stderr (when it is a terminal and `--live` is set) and/or into a file
//! (`--live-file`), coalescing bursts with a short debounce. Rendering is
//! write-only observability: file errors are swallowed and no back-pressure
//! ever reaches the reader threads.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::SessionEvent;
use crate::ops::{focused_session, SharedState};
use crate::session::ScreenSnapshot;

/// Debounce for coalescing redraws under bursty output.
const REDRAW_DEBOUNCE: Duration = Duration::from_millis(16);

/// Where the mirror draws.
#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Repaint stderr in place.
    pub terminal: bool,
    /// Rewrite this file on every redraw.
    pub file: Option<PathBuf>,
}

impl LiveOptions {
    /// Whether any sink is configured.
    pub fn enabled(&self) -> bool {
        self.terminal || self.file.is_some()
    }
}

/// Start the renderer task. It runs until the event bus closes.
pub fn spawn(
    state: SharedState,
    mut rx: broadcast::Receiver<SessionEvent>,
    opts: LiveOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut winch = signal(SignalKind::window_change()).ok();
        let mut deadline: Option<Instant> = None;

        loop {
            // A far-future target keeps the select arm well-formed while no
            // redraw is pending; the `if` guard stops it from firing.
            let target = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => {
                        if event.redraws_screen() && is_focused(&state, event.terminal_id()) {
                            deadline.get_or_insert_with(|| Instant::now() + REDRAW_DEBOUNCE);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("live renderer lagged {skipped} events");
                        deadline.get_or_insert_with(|| Instant::now() + REDRAW_DEBOUNCE);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = recv_winch(&mut winch) => {
                    deadline.get_or_insert_with(|| Instant::now() + REDRAW_DEBOUNCE);
                }
                () = tokio::time::sleep_until(tokio::time::Instant::from_std(target)),
                    if deadline.is_some() =>
                {
                    deadline = None;
                    redraw(&state, &opts);
                }
            }
        }
    })
}

async fn recv_winch(winch: &mut Option<tokio::signal::unix::Signal>) {
    match winch {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Final teardown: one last file frame, then restore the terminal sink.
pub fn shutdown(state: &SharedState, opts: &LiveOptions) {
    if opts.file.is_some() {
        redraw(state, opts);
    }
    if opts.terminal {
        restore_terminal();
    }
}

/// Show the cursor and reset attributes on stderr.
pub fn restore_terminal() {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(b"\x1b[0m\x1b[?25h\n");
    let _ = stderr.flush();
}

fn is_focused(state: &SharedState, terminal_id: &str) -> bool {
    let state = state.lock().expect("state lock poisoned");
    focused_session(&state).is_some_and(|s| s.id() == terminal_id)
}

fn redraw(state: &SharedState, opts: &LiveOptions) {
    let (snapshot, status) = {
        let state = state.lock().expect("state lock poisoned");
        let Some(session) = focused_session(&state) else {
            return;
        };
        let status = status_line(
            session.id(),
            state.last_call.as_ref().map(|c| (c.tool.as_str(), c.at)),
        );
        (session.screen(), status)
    };

    if opts.terminal {
        let width = crossterm::terminal::size()
            .map(|(w, _)| w as usize)
            .unwrap_or(80);
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(render_terminal_frame(&snapshot, &status, width).as_bytes());
        let _ = stderr.flush();
    }
    if let Some(path) = &opts.file {
        // Swallowed on purpose: the mirror must never throttle the server.
        let _ = std::fs::write(path, render_file_frame(&snapshot, &status));
    }
}

/// The status bar content: focused ID plus the most recent tool call and
/// how long ago it arrived.
fn status_line(terminal_id: &str, last_call: Option<(&str, Instant)>) -> String {
    match last_call {
        Some((tool, at)) => format!(
            "[{terminal_id}] last call: {tool} ({:.1}s ago)",
            at.elapsed().as_secs_f64()
        ),
        None => format!("[{terminal_id}] waiting for first call"),
    }
}

/// In-place stderr repaint: cursor hidden and homed, bordered grid, status.
fn render_terminal_frame(snapshot: &ScreenSnapshot, status: &str, width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    out.push_str("\x1b[?25l\x1b[H");
    out.push_str(&"─".repeat(width));
    out.push_str("\r\n");
    for line in &snapshot.lines {
        out.push_str(&fit(line, width));
        out.push_str("\r\n");
    }
    out.push_str(&"─".repeat(width));
    out.push_str("\r\n");
    out.push_str(&fit(status, width));
    out
}

/// Box-drawn frame for the file sink, rewritten whole on each redraw.
fn render_file_frame(snapshot: &ScreenSnapshot, status: &str) -> String {
    let inner = snapshot.cols as usize;
    let mut out = String::new();
    out.push('┌');
    out.push_str(&"─".repeat(inner));
    out.push_str("┐\n");
    for line in &snapshot.lines {
        out.push('│');
        out.push_str(&fit(line, inner));
        out.push_str("│\n");
    }
    out.push('└');
    out.push_str(&"─".repeat(inner));
    out.push_str("┘\n");
    out.push_str(status);
    out.push('\n');
    out
}

/// Truncate or pad a line to exactly `width` characters.
fn fit(line: &str, width: usize) -> String {
    let mut out: String = line.chars().take(width).collect();
    let len = out.chars().count();
    out.push_str(&" ".repeat(width - len));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(lines: &[&str], cols: u16) -> ScreenSnapshot {
        ScreenSnapshot {
            lines: lines.iter().map(|l| fit(l, cols as usize)).collect(),
            text: lines.join("\n"),
            cursor_row: 0,
            cursor_col: 0,
            cols,
            rows: lines.len() as u16,
        }
    }

    #[test]
    fn fit_truncates_and_pads() {
        assert_eq!(fit("abcdef", 4), "abcd");
        assert_eq!(fit("ab", 4), "ab  ");
        assert_eq!(fit("", 3), "   ");
    }

    #[test]
    fn file_frame_is_boxed() {
        let snap = snapshot(&["hello", "world"], 7);
        let frame = render_file_frame(&snap, "[1] waiting for first call");
        let lines: Vec<&str> = frame.lines().collect();
        assert_eq!(lines[0], format!("┌{}┐", "─".repeat(7)));
        assert_eq!(lines[1], "│hello  │");
        assert_eq!(lines[2], "│world  │");
        assert_eq!(lines[3], format!("└{}┘", "─".repeat(7)));
        assert!(lines[4].contains("waiting"));
    }

    #[test]
    fn terminal_frame_homes_and_hides_cursor() {
        let snap = snapshot(&["x"], 3);
        let frame = render_terminal_frame(&snap, "[1] waiting for first call", 10);
        assert!(frame.starts_with("\x1b[?25l\x1b[H"));
        // Border, one grid row, border, status.
        assert_eq!(frame.matches("\r\n").count(), 3);
        assert!(frame.contains(&"─".repeat(10)));
    }

    #[test]
    fn status_line_reports_last_call() {
        let line = status_line("2", Some(("view_screen", Instant::now())));
        assert!(line.starts_with("[2] last call: view_screen"));
        assert!(line.ends_with("s ago)"));
        assert_eq!(status_line("1", None), "[1] waiting for first call");
    }
}
