//! Session events for pub/sub broadcasting.
//!
//! Every session publishes its lifecycle and output onto one registry-wide
//! `tokio::sync::broadcast` channel, tagged with the session's terminal ID.
//! Subscribers (the live renderer, tests) filter by variant and ID without
//! the registry knowing who is listening.

use tokio::sync::broadcast;

/// Capacity of the registry event bus. Bursty TUI output produces many
/// `Data` events; slow subscribers observe `Lagged` rather than applying
/// back-pressure to the reader threads.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Events broadcast on the registry bus, tagged with their session ID.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The child wrote a chunk of output.
    Data {
        /// Session that produced the chunk.
        terminal_id: String,
        /// The raw bytes, exactly as read from the PTY.
        bytes: Vec<u8>,
    },

    /// A session's child was spawned and its reader started.
    Start {
        /// Session that started.
        terminal_id: String,
    },

    /// A session's child exited and the exit record was captured.
    Exit {
        /// Session that exited.
        terminal_id: String,
        /// Exit code, −1 when none was available.
        exit_code: i32,
        /// Terminating signal name, when the child was signalled.
        signal: Option<String>,
    },

    /// A session was created in the registry.
    Created {
        /// The freshly allocated ID.
        terminal_id: String,
        /// The command the session will run.
        command: String,
    },

    /// A session was removed from the registry.
    Killed {
        /// The removed ID.
        terminal_id: String,
    },
}

impl SessionEvent {
    /// The terminal ID this event pertains to.
    pub fn terminal_id(&self) -> &str {
        match self {
            Self::Data { terminal_id, .. }
            | Self::Start { terminal_id }
            | Self::Exit { terminal_id, .. }
            | Self::Created { terminal_id, .. }
            | Self::Killed { terminal_id } => terminal_id,
        }
    }

    /// Whether this event should trigger a live-mirror redraw.
    pub fn redraws_screen(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::Exit { .. })
    }
}

/// Publishing handle a session uses to emit tagged events upward.
///
/// The registry hands one of these to each session at creation, so sessions
/// publish without holding a reference back to the registry.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    /// Wrap a broadcast sender.
    pub fn new(tx: broadcast::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// A sink whose events go nowhere. Useful for tests.
    pub fn disconnected() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Publish an event. Send failures mean nobody is subscribed, which is
    /// fine.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}
