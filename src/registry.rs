//! Multi-session registry: ID allocation, lookup, and event fan-out.
//!
//! The registry owns every session. IDs are successive positive integers
//! rendered in decimal starting at 1 and are never reused; the optional
//! `legacy` session (created from the server command line) lives in a slot
//! beside the map, participating in listing and lookup but never produced by
//! the allocator.
//!
//! All session events flow through one broadcast bus, tagged with their
//! terminal ID, so subscribers filter without the registry tracking them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ServerError;
use crate::events::{EventSink, SessionEvent, EVENT_BUS_CAPACITY};
use crate::session::{LaunchRecipe, Session};

/// Fixed ID of the session created from the server command line.
pub const LEGACY_ID: &str = "legacy";

/// One row of `list_tabs` output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Terminal ID.
    pub id: String,
    /// The command the session runs.
    pub command: String,
    /// Whether the child is alive.
    pub running: bool,
    /// Grid width.
    pub cols: u16,
    /// Grid height.
    pub rows: u16,
}

/// Owner of all sessions, keyed by decimal ID.
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<Session>>,
    next_id: u64,
    legacy: Option<Arc<Session>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry with a fresh event bus.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            legacy: None,
            events_tx,
        }
    }

    /// Subscribe to the tagged event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Allocate the next ID, construct and start a session, and insert it.
    ///
    /// The ID is consumed even when the spawn fails, preserving the
    /// never-reused invariant.
    pub fn create(&mut self, recipe: LaunchRecipe) -> Result<Arc<Session>, ServerError> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let command = recipe.command.clone();
        let session = Arc::new(Session::new(
            id.clone(),
            recipe,
            EventSink::new(self.events_tx.clone()),
        ));
        session.start()?;
        self.sessions.insert(id.clone(), Arc::clone(&session));
        let _ = self.events_tx.send(SessionEvent::Created {
            terminal_id: id,
            command,
        });
        Ok(session)
    }

    /// Create and start the `legacy` singleton from the server command line.
    pub fn attach_legacy(&mut self, recipe: LaunchRecipe) -> Result<Arc<Session>, ServerError> {
        let command = recipe.command.clone();
        let session = Arc::new(Session::new(
            LEGACY_ID,
            recipe,
            EventSink::new(self.events_tx.clone()),
        ));
        session.start()?;
        self.legacy = Some(Arc::clone(&session));
        let _ = self.events_tx.send(SessionEvent::Created {
            terminal_id: LEGACY_ID.to_string(),
            command,
        });
        Ok(session)
    }

    /// Look up a session by ID, including `legacy`.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        if id == LEGACY_ID {
            return self.legacy.clone();
        }
        self.sessions.get(id).cloned()
    }

    /// The legacy session, if one was attached.
    pub fn legacy(&self) -> Option<Arc<Session>> {
        self.legacy.clone()
    }

    /// Summaries of every session, numeric IDs ascending, legacy last.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = Vec::with_capacity(self.sessions.len() + 1);
        let mut ids: Vec<&String> = self.sessions.keys().collect();
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        for id in ids {
            out.push(summarize(&self.sessions[id.as_str()]));
        }
        if let Some(legacy) = &self.legacy {
            out.push(summarize(legacy));
        }
        out
    }

    /// Numeric IDs ascending, legacy last when present.
    pub fn ids(&self) -> Vec<String> {
        self.list().into_iter().map(|s| s.id).collect()
    }

    /// Number of sessions, counting legacy.
    pub fn count(&self) -> usize {
        self.sessions.len() + usize::from(self.legacy.is_some())
    }

    /// Whether any session exists.
    pub fn has(&self) -> bool {
        self.count() > 0
    }

    /// The largest numeric ID currently present. Survives out-of-order
    /// deletions, which is what the focus-fallback chain relies on.
    pub fn last_id(&self) -> Option<String> {
        self.sessions
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map(|id| id.to_string())
    }

    /// Terminate and remove a session. Returns `false` for unknown IDs and
    /// for `legacy`, which only `stop_tui` may stop.
    pub fn kill(&mut self, id: &str) -> bool {
        let Some(session) = self.sessions.remove(id) else {
            return false;
        };
        session.stop_and_join();
        let _ = self.events_tx.send(SessionEvent::Killed {
            terminal_id: id.to_string(),
        });
        true
    }

    /// Terminate every session, including legacy. Used at shutdown.
    pub fn kill_all(&mut self) {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.kill(&id);
        }
        if let Some(legacy) = &self.legacy {
            legacy.stop_and_join();
        }
    }

    /// Remove sessions that have exited after being flagged by `stop_tui`.
    ///
    /// Crash-exited sessions are kept so the client can still read the
    /// screen and the raw tail; only explicitly stopped ones are reaped.
    pub fn reap_exited(&mut self) {
        let reapable: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_running() && s.is_discarded())
            .map(|(id, _)| id.clone())
            .collect();
        for id in reapable {
            log::debug!("reaping exited session {id}");
            self.kill(&id);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("count", &self.count())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

fn summarize(session: &Arc<Session>) -> SessionSummary {
    let (cols, rows) = session.size();
    SessionSummary {
        id: session.id().to_string(),
        command: session.command(),
        running: session.is_running(),
        cols,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_recipe() -> LaunchRecipe {
        LaunchRecipe::new("cat")
    }

    #[test]
    fn ids_are_monotone_and_never_reused() {
        let mut registry = SessionRegistry::new();
        let a = registry.create(cat_recipe()).unwrap();
        let b = registry.create(cat_recipe()).unwrap();
        assert_eq!(a.id(), "1");
        assert_eq!(b.id(), "2");

        assert!(registry.kill("1"));
        let c = registry.create(cat_recipe()).unwrap();
        assert_eq!(c.id(), "3");
        registry.kill_all();
    }

    #[test]
    fn failed_spawn_still_consumes_the_id() {
        let mut registry = SessionRegistry::new();
        assert!(registry
            .create(LaunchRecipe::new("/nonexistent/not-a-binary"))
            .is_err());
        let session = registry.create(cat_recipe()).unwrap();
        assert_eq!(session.id(), "2");
        registry.kill_all();
    }

    #[test]
    fn kill_removes_and_reports_unknown() {
        let mut registry = SessionRegistry::new();
        registry.create(cat_recipe()).unwrap();
        assert!(registry.get("1").is_some());
        assert!(registry.kill("1"));
        assert!(registry.get("1").is_none());
        assert!(registry.ids().is_empty());
        // Idempotent: a second kill is a clean false.
        assert!(!registry.kill("1"));
        assert!(!registry.kill("99"));
    }

    #[test]
    fn last_id_survives_out_of_order_deletion() {
        let mut registry = SessionRegistry::new();
        registry.create(cat_recipe()).unwrap();
        registry.create(cat_recipe()).unwrap();
        registry.create(cat_recipe()).unwrap();
        assert_eq!(registry.last_id(), Some("3".to_string()));
        registry.kill("3");
        assert_eq!(registry.last_id(), Some("2".to_string()));
        registry.kill("1");
        assert_eq!(registry.last_id(), Some("2".to_string()));
        registry.kill_all();
        assert_eq!(registry.last_id(), None);
    }

    #[test]
    fn legacy_participates_in_lookup_but_not_allocation() {
        let mut registry = SessionRegistry::new();
        registry.attach_legacy(cat_recipe()).unwrap();
        assert!(registry.get(LEGACY_ID).is_some());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.last_id(), None);

        let session = registry.create(cat_recipe()).unwrap();
        assert_eq!(session.id(), "1");
        let ids = registry.ids();
        assert_eq!(ids, vec!["1".to_string(), LEGACY_ID.to_string()]);
        // kill() refuses the legacy slot.
        assert!(!registry.kill(LEGACY_ID));
        assert!(registry.get(LEGACY_ID).is_some());
        registry.kill_all();
    }

    #[test]
    fn list_orders_numerically() {
        let mut registry = SessionRegistry::new();
        for _ in 0..11 {
            registry.create(cat_recipe()).unwrap();
        }
        let ids = registry.ids();
        // String ordering would put "10" before "2"; numeric ordering must not.
        assert_eq!(ids[1], "2");
        assert_eq!(ids[9], "10");
        assert_eq!(ids[10], "11");
        registry.kill_all();
    }

    #[test]
    fn created_and_killed_events_are_tagged() {
        let mut registry = SessionRegistry::new();
        let mut rx = registry.subscribe();
        registry.create(cat_recipe()).unwrap();

        // Start then Created arrive for session 1 (start emits first because
        // create starts the session before inserting).
        let mut saw_created = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Created {
                terminal_id,
                command,
            } = event
            {
                assert_eq!(terminal_id, "1");
                assert_eq!(command, "cat");
                saw_created = true;
            }
        }
        assert!(saw_created);

        registry.kill("1");
        let mut saw_killed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::Killed { ref terminal_id } if terminal_id == "1") {
                saw_killed = true;
            }
        }
        assert!(saw_killed);
    }
}
