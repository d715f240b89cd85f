//! The remote operations the server exports as MCP tools.
//!
//! Operation names and semantics are contractual; the transport (JSON-RPC on
//! stdio) lives in [`crate::serve`]. Every operation resolves its target
//! session through the focus chain: explicit ID → current focus → largest
//! registry ID → legacy (if running) → `NoSession`.
//!
//! The dispatcher is the only mutator of the shared state; session mutexes
//! are never held across an await point.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{expand_path, ServerConfig};
use crate::error::ServerError;
use crate::registry::{SessionRegistry, LEGACY_ID};
use crate::session::{RecipeUpdate, Session};

/// Pause after injecting input so the child's reaction reaches the grid
/// before most callers look at it. Callers needing more use `wait`.
const INPUT_SETTLE: Duration = Duration::from_millis(50);

/// Pause after spawning so a full-screen TUI gets its first render out
/// before the confirmation returns.
const SPAWN_SETTLE: Duration = Duration::from_millis(500);

/// Default duration for the `wait` operation.
const DEFAULT_WAIT_MS: u64 = 100;

/// The most recent tool invocation, displayed by the live renderer.
#[derive(Debug, Clone)]
pub struct LastCall {
    /// Tool name.
    pub tool: String,
    /// When the request was received.
    pub at: Instant,
}

/// Mutable server state shared between the dispatcher and the live renderer.
#[derive(Debug)]
pub struct ServerState {
    /// All sessions.
    pub registry: SessionRegistry,
    /// The session targeted when requests omit an explicit ID.
    pub focus: Option<String>,
    /// Startup settings.
    pub config: ServerConfig,
    /// Most recent tool invocation, for the live status bar.
    pub last_call: Option<LastCall>,
}

impl ServerState {
    /// Fresh state around a registry and startup config.
    pub fn new(registry: SessionRegistry, config: ServerConfig) -> Self {
        Self {
            registry,
            focus: None,
            config,
            last_call: None,
        }
    }
}

/// Shared handle to the server state.
pub type SharedState = Arc<Mutex<ServerState>>;

#[derive(Debug, Deserialize)]
struct ViewScreenArgs {
    terminal_id: Option<String>,
    include_metadata: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TypeTextArgs {
    terminal_id: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct PressKeyArgs {
    terminal_id: Option<String>,
    key: String,
}

#[derive(Debug, Deserialize)]
struct TargetArgs {
    terminal_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaitArgs {
    #[allow(dead_code, reason = "accepted for interface symmetry")]
    terminal_id: Option<String>,
    ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    command: String,
    args: Option<Vec<String>>,
    cwd: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct KillArgs {
    terminal_id: String,
}

/// Dispatch one tool call by name.
///
/// # Errors
///
/// Every [`ServerError`] kind the §7 taxonomy names, surfaced to the
/// transport as an error payload; nothing here panics or kills the server.
pub async fn dispatch_tool(
    state: &SharedState,
    name: &str,
    args: &Value,
) -> Result<Value, ServerError> {
    match name {
        "view_screen" => view_screen(state, parse(args)?),
        "type_text" => type_text(state, parse(args)?).await,
        "press_key" => press_key(state, parse(args)?).await,
        "get_screen_size" => get_screen_size(state, parse(args)?),
        "wait" => wait(parse(args)?).await,
        "run_tui" => run_tui(state, parse(args)?).await,
        "stop_tui" => stop_tui(state),
        "create_process" => create_process(state, parse(args)?).await,
        "kill_process" => kill_process(state, parse(args)?),
        "list_tabs" => list_tabs(state),
        other => Err(ServerError::InvalidArgs(format!("unknown tool {other:?}"))),
    }
}

fn parse<T: DeserializeOwned>(args: &Value) -> Result<T, ServerError> {
    serde_json::from_value(args.clone()).map_err(|e| ServerError::InvalidArgs(e.to_string()))
}

/// Resolve the target session: explicit ID → focus → last ID → running
/// legacy → `NoSession`.
fn resolve_target(
    state: &ServerState,
    explicit: Option<&str>,
) -> Result<Arc<Session>, ServerError> {
    if let Some(id) = explicit {
        return state
            .registry
            .get(id)
            .ok_or_else(|| ServerError::UnknownSession {
                id: id.to_string(),
                available: state.registry.ids(),
            });
    }
    if let Some(focus) = &state.focus {
        if let Some(session) = state.registry.get(focus) {
            return Ok(session);
        }
    }
    if let Some(last) = state.registry.last_id() {
        if let Some(session) = state.registry.get(&last) {
            return Ok(session);
        }
    }
    if let Some(legacy) = state.registry.legacy() {
        if legacy.is_running() {
            return Ok(legacy);
        }
    }
    Err(ServerError::NoSession)
}

/// The session the live mirror should draw: the same chain requests use
/// when they omit an explicit ID.
pub(crate) fn focused_session(state: &ServerState) -> Option<Arc<Session>> {
    resolve_target(state, None).ok()
}

/// Remove stopped-and-exited sessions and repair the focus slot.
fn reap(state: &mut ServerState) {
    state.registry.reap_exited();
    if let Some(focus) = &state.focus {
        if state.registry.get(focus).is_none() {
            state.focus = state.registry.last_id();
        }
    }
}

fn view_screen(state: &SharedState, args: ViewScreenArgs) -> Result<Value, ServerError> {
    let mut state = state.lock().expect("state lock poisoned");
    reap(&mut state);
    let session = resolve_target(&state, args.terminal_id.as_deref())?;
    let snapshot = session.screen();
    if args.include_metadata.unwrap_or(false) {
        Ok(json!({
            "terminal_id": session.id(),
            "screen": snapshot.text,
            "cursor": { "row": snapshot.cursor_row, "col": snapshot.cursor_col },
            "size": { "cols": snapshot.cols, "rows": snapshot.rows },
        }))
    } else {
        Ok(Value::String(snapshot.text))
    }
}

async fn type_text(state: &SharedState, args: TypeTextArgs) -> Result<Value, ServerError> {
    let confirmation = {
        let mut state = state.lock().expect("state lock poisoned");
        reap(&mut state);
        let session = resolve_target(&state, args.terminal_id.as_deref())?;
        session.type_text(args.text.as_bytes())?;
        format!(
            "typed {} bytes to terminal {}",
            args.text.len(),
            session.id()
        )
    };
    tokio::time::sleep(INPUT_SETTLE).await;
    Ok(Value::String(confirmation))
}

async fn press_key(state: &SharedState, args: PressKeyArgs) -> Result<Value, ServerError> {
    let confirmation = {
        let mut state = state.lock().expect("state lock poisoned");
        reap(&mut state);
        let session = resolve_target(&state, args.terminal_id.as_deref())?;
        session.press_key(&args.key)?;
        format!("pressed {} on terminal {}", args.key.trim(), session.id())
    };
    tokio::time::sleep(INPUT_SETTLE).await;
    Ok(Value::String(confirmation))
}

fn get_screen_size(state: &SharedState, args: TargetArgs) -> Result<Value, ServerError> {
    let mut state = state.lock().expect("state lock poisoned");
    reap(&mut state);
    let session = resolve_target(&state, args.terminal_id.as_deref())?;
    let (cols, rows) = session.size();
    Ok(json!({
        "terminal_id": session.id(),
        "cols": cols,
        "rows": rows,
    }))
}

async fn wait(args: WaitArgs) -> Result<Value, ServerError> {
    let ms = args.ms.unwrap_or(DEFAULT_WAIT_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(Value::String(format!("waited {ms}ms")))
}

/// Start a TUI: restart the focused session in place (preserving its ID)
/// when focus is set, otherwise create a new session and focus it.
async fn run_tui(state: &SharedState, args: RunArgs) -> Result<Value, ServerError> {
    let confirmation = {
        let mut state = state.lock().expect("state lock poisoned");
        reap(&mut state);
        let cwd = args.cwd.as_deref().map(expand_path);
        let focused = state
            .focus
            .clone()
            .and_then(|id| state.registry.get(&id));
        if let Some(session) = focused {
            let update = RecipeUpdate {
                command: Some(args.command.clone()),
                args: Some(args.args.unwrap_or_default()),
                cwd,
                env: None,
                cols: args.cols,
                rows: args.rows,
            };
            session.restart(&update)?;
            format!(
                "restarted terminal {} with {}",
                session.id(),
                args.command
            )
        } else {
            let recipe = state.config.recipe(
                args.command.clone(),
                args.args.unwrap_or_default(),
                cwd,
                args.cols,
                args.rows,
            );
            let session = state.registry.create(recipe)?;
            state.focus = Some(session.id().to_string());
            format!("launched {} in terminal {}", args.command, session.id())
        }
    };
    tokio::time::sleep(SPAWN_SETTLE).await;
    Ok(Value::String(confirmation))
}

/// Stop the focused session and fall back to the most recent remaining one.
fn stop_tui(state: &SharedState) -> Result<Value, ServerError> {
    let mut state = state.lock().expect("state lock poisoned");
    reap(&mut state);
    let session = resolve_target(&state, None)?;
    let id = session.id().to_string();
    session.stop();
    if id != LEGACY_ID {
        // Flag for reaping once the exit is observed.
        session.mark_discarded();
    }
    state.focus = state
        .registry
        .ids()
        .into_iter()
        .filter(|other| other != &id && other != LEGACY_ID)
        .filter_map(|other| other.parse::<u64>().ok())
        .max()
        .map(|n| n.to_string());
    Ok(Value::String(format!("stopped terminal {id}")))
}

/// Always create a new session and focus it.
async fn create_process(state: &SharedState, args: RunArgs) -> Result<Value, ServerError> {
    let result = {
        let mut state = state.lock().expect("state lock poisoned");
        reap(&mut state);
        let recipe = state.config.recipe(
            args.command.clone(),
            args.args.unwrap_or_default(),
            args.cwd.as_deref().map(expand_path),
            args.cols,
            args.rows,
        );
        let session = state.registry.create(recipe)?;
        let id = session.id().to_string();
        state.focus = Some(id.clone());
        json!({
            "terminal_id": id,
            "command": args.command,
            "message": format!("created terminal {id} running {}", args.command),
        })
    };
    tokio::time::sleep(SPAWN_SETTLE).await;
    Ok(result)
}

fn kill_process(state: &SharedState, args: KillArgs) -> Result<Value, ServerError> {
    if args.terminal_id == LEGACY_ID {
        return Err(ServerError::InvalidArgs(
            "the legacy session cannot be killed with kill_process; use stop_tui".to_string(),
        ));
    }
    let mut state = state.lock().expect("state lock poisoned");
    reap(&mut state);
    if !state.registry.kill(&args.terminal_id) {
        return Err(ServerError::UnknownSession {
            id: args.terminal_id,
            available: state.registry.ids(),
        });
    }
    if state.focus.as_deref() == Some(args.terminal_id.as_str()) {
        state.focus = state.registry.last_id();
    }
    Ok(Value::String(format!(
        "killed terminal {}",
        args.terminal_id
    )))
}

fn list_tabs(state: &SharedState) -> Result<Value, ServerError> {
    let mut state = state.lock().expect("state lock poisoned");
    reap(&mut state);
    let terminals = state.registry.list();
    let mut result = json!({
        "terminals": terminals,
        "focused": state.focus,
    });
    if terminals_is_empty(&result) {
        result["hint"] =
            Value::String("no sessions; create one with run_tui or create_process".to_string());
    }
    Ok(result)
}

fn terminals_is_empty(result: &Value) -> bool {
    result["terminals"].as_array().is_some_and(Vec::is_empty)
}

/// Tool definitions advertised by `tools/list`.
pub fn tool_specs() -> Vec<Value> {
    let terminal_id = json!({
        "type": "string",
        "description": "Target terminal ID; defaults to the focused session"
    });
    vec![
        json!({
            "name": "view_screen",
            "description": "Read the current screen of a terminal session",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "terminal_id": terminal_id.clone(),
                    "include_metadata": {
                        "type": "boolean",
                        "description": "Return a structured record with cursor and size"
                    }
                }
            }
        }),
        json!({
            "name": "type_text",
            "description": "Write text to a terminal session verbatim",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "terminal_id": terminal_id.clone(),
                    "text": { "type": "string", "description": "Bytes to transmit" }
                },
                "required": ["text"]
            }
        }),
        json!({
            "name": "press_key",
            "description": "Send a symbolic key (enter, up, ctrl+c, f7, pageup, ...)",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "terminal_id": terminal_id.clone(),
                    "key": { "type": "string", "description": "Symbolic key name" }
                },
                "required": ["key"]
            }
        }),
        json!({
            "name": "get_screen_size",
            "description": "Report a terminal session's dimensions",
            "inputSchema": {
                "type": "object",
                "properties": { "terminal_id": terminal_id.clone() }
            }
        }),
        json!({
            "name": "wait",
            "description": "Pause so a TUI can react to earlier input",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "terminal_id": terminal_id.clone(),
                    "ms": { "type": "number", "description": "Milliseconds to wait (default 100)" }
                }
            }
        }),
        json!({
            "name": "run_tui",
            "description": "Launch a TUI: restarts the focused session or creates a new one",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "args": { "type": "array", "items": { "type": "string" } },
                    "cwd": { "type": "string" },
                    "cols": { "type": "number" },
                    "rows": { "type": "number" }
                },
                "required": ["command"]
            }
        }),
        json!({
            "name": "stop_tui",
            "description": "Stop the focused session and refocus the most recent remaining one",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "create_process",
            "description": "Create a new terminal session and focus it",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "args": { "type": "array", "items": { "type": "string" } },
                    "cwd": { "type": "string" },
                    "cols": { "type": "number" },
                    "rows": { "type": "number" }
                },
                "required": ["command"]
            }
        }),
        json!({
            "name": "kill_process",
            "description": "Terminate a terminal session by ID",
            "inputSchema": {
                "type": "object",
                "properties": { "terminal_id": terminal_id.clone() },
                "required": ["terminal_id"]
            }
        }),
        json!({
            "name": "list_tabs",
            "description": "List all terminal sessions and the focused ID",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> SharedState {
        Arc::new(Mutex::new(ServerState::new(
            SessionRegistry::new(),
            ServerConfig::default(),
        )))
    }

    async fn call(state: &SharedState, name: &str, args: Value) -> Result<Value, ServerError> {
        dispatch_tool(state, name, &args).await
    }

    fn shutdown(state: &SharedState) {
        state.lock().unwrap().registry.kill_all();
    }

    #[tokio::test]
    async fn wait_reports_duration() {
        let state = fresh_state();
        let out = call(&state, "wait", json!({ "ms": 5 })).await.unwrap();
        assert_eq!(out, json!("waited 5ms"));
        let out = call(&state, "wait", json!({})).await.unwrap();
        assert_eq!(out, json!("waited 100ms"));
    }

    #[tokio::test]
    async fn view_screen_with_no_sessions_is_no_session() {
        let state = fresh_state();
        assert!(matches!(
            call(&state, "view_screen", json!({})).await,
            Err(ServerError::NoSession)
        ));
    }

    #[tokio::test]
    async fn missing_required_arguments_are_invalid() {
        let state = fresh_state();
        assert!(matches!(
            call(&state, "type_text", json!({})).await,
            Err(ServerError::InvalidArgs(_))
        ));
        assert!(matches!(
            call(&state, "run_tui", json!({})).await,
            Err(ServerError::InvalidArgs(_))
        ));
        assert!(matches!(
            call(&state, "kill_process", json!({})).await,
            Err(ServerError::InvalidArgs(_))
        ));
        assert!(matches!(
            call(&state, "no_such_tool", json!({})).await,
            Err(ServerError::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn create_process_assigns_ids_and_focus() {
        let state = fresh_state();
        let first = call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        assert_eq!(first["terminal_id"], "1");
        let second = call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        assert_eq!(second["terminal_id"], "2");
        assert_eq!(state.lock().unwrap().focus.as_deref(), Some("2"));

        let tabs = call(&state, "list_tabs", json!({})).await.unwrap();
        assert_eq!(tabs["terminals"].as_array().unwrap().len(), 2);
        assert_eq!(tabs["focused"], "2");
        shutdown(&state);
    }

    #[tokio::test]
    async fn stop_tui_falls_back_to_previous_session() {
        let state = fresh_state();
        call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        let out = call(&state, "stop_tui", json!({})).await.unwrap();
        assert_eq!(out, json!("stopped terminal 2"));
        assert_eq!(state.lock().unwrap().focus.as_deref(), Some("1"));

        // Once the stop is observed, the discarded session is reaped.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let tabs = call(&state, "list_tabs", json!({})).await.unwrap();
            let ids: Vec<String> = tabs["terminals"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["id"].as_str().unwrap().to_string())
                .collect();
            if ids == ["1".to_string()] {
                break;
            }
            assert!(Instant::now() < deadline, "session 2 never reaped: {ids:?}");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shutdown(&state);
    }

    #[tokio::test]
    async fn kill_process_requires_known_id_and_refuses_legacy() {
        let state = fresh_state();
        call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        assert!(matches!(
            call(&state, "kill_process", json!({ "terminal_id": "42" })).await,
            Err(ServerError::UnknownSession { .. })
        ));
        assert!(matches!(
            call(&state, "kill_process", json!({ "terminal_id": "legacy" })).await,
            Err(ServerError::InvalidArgs(_))
        ));
        let out = call(&state, "kill_process", json!({ "terminal_id": "1" }))
            .await
            .unwrap();
        assert_eq!(out, json!("killed terminal 1"));
        assert_eq!(state.lock().unwrap().focus, None);
        shutdown(&state);
    }

    #[tokio::test]
    async fn run_tui_restarts_the_focused_session_in_place() {
        let state = fresh_state();
        call(&state, "create_process", json!({ "command": "cat" }))
            .await
            .unwrap();
        let out = call(&state, "run_tui", json!({ "command": "cat", "args": ["-u"] }))
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(text.contains("restarted terminal 1"), "{text}");
        // Still the same ID; no new session was allocated.
        let tabs = call(&state, "list_tabs", json!({})).await.unwrap();
        assert_eq!(tabs["terminals"].as_array().unwrap().len(), 1);
        assert_eq!(tabs["terminals"][0]["id"], "1");
        shutdown(&state);
    }

    #[tokio::test]
    async fn run_tui_creates_when_focus_is_vacant() {
        let state = fresh_state();
        let out = call(&state, "run_tui", json!({ "command": "cat" }))
            .await
            .unwrap();
        assert!(out.as_str().unwrap().contains("terminal 1"));
        assert_eq!(state.lock().unwrap().focus.as_deref(), Some("1"));
        shutdown(&state);
    }

    #[tokio::test]
    async fn empty_listing_carries_a_hint() {
        let state = fresh_state();
        let tabs = call(&state, "list_tabs", json!({})).await.unwrap();
        assert!(tabs["terminals"].as_array().unwrap().is_empty());
        assert!(tabs["hint"].as_str().unwrap().contains("run_tui"));
    }

    #[tokio::test]
    async fn get_screen_size_reports_dimensions() {
        let state = fresh_state();
        call(
            &state,
            "create_process",
            json!({ "command": "cat", "cols": 100, "rows": 30 }),
        )
        .await
        .unwrap();
        let size = call(&state, "get_screen_size", json!({})).await.unwrap();
        assert_eq!(size["cols"], 100);
        assert_eq!(size["rows"], 30);
        assert_eq!(size["terminal_id"], "1");
        shutdown(&state);
    }

    #[test]
    fn tool_specs_cover_the_contract() {
        let specs = tool_specs();
        let names: Vec<&str> = specs
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        for expected in [
            "view_screen",
            "type_text",
            "press_key",
            "get_screen_size",
            "wait",
            "run_tui",
            "stop_tui",
            "create_process",
            "kill_process",
            "list_tabs",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }
}
