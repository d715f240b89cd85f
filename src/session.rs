//! PTY session management.
//!
//! Each session owns one child process running under a pseudo-terminal, the
//! terminal emulator fed by its output, a bounded raw-output ring, and a
//! reader thread. Handlers query the emulator and ring through snapshots;
//! only the reader mutates them.
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── recipe: LaunchRecipe        (command, args, cwd, env, cols × rows)
//! ├── master: MasterPty           (for resizing)
//! ├── writer: Write               (for input)
//! ├── killer: ChildKiller         (for stop)
//! ├── parser: TermParser          (terminal emulation)
//! ├── ring: RawRing               (raw output tail)
//! └── reader_thread               (PTY bytes → parser + ring + events)
//! ```
//!
//! # Lifecycle
//!
//! Fresh → Running (successful `start`) → Exited (EOF observed, exit record
//! captured). `restart` maps Running or Exited back to Running with a fresh
//! emulator and ring.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;

use crate::error::ServerError;
use crate::events::{EventSink, SessionEvent};
use crate::keys::encode_key;
use crate::ring::{RawRing, DEFAULT_RING_CAPACITY};
use crate::term::TermParser;

/// Everything needed to spawn (or respawn) a session's child.
#[derive(Debug, Clone)]
pub struct LaunchRecipe {
    /// Program to execute. Empty means the recipe is not launchable yet.
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory; `None` inherits the server's.
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the server's environment and
    /// the terminal defaults.
    pub env: HashMap<String, String>,
    /// Initial PTY width.
    pub cols: u16,
    /// Initial PTY height.
    pub rows: u16,
}

impl LaunchRecipe {
    /// Recipe for `command` with default 80×24 dimensions.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        }
    }

    /// Builder-style argument list.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Builder-style working directory.
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Builder-style dimensions.
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

/// Partial recipe for `restart`: provided fields replace the stored ones.
#[derive(Debug, Clone, Default)]
pub struct RecipeUpdate {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl RecipeUpdate {
    /// Apply the provided fields over `recipe`.
    pub fn apply(&self, recipe: &mut LaunchRecipe) {
        if let Some(command) = &self.command {
            recipe.command = command.clone();
        }
        if let Some(args) = &self.args {
            recipe.args = args.clone();
        }
        if let Some(cwd) = &self.cwd {
            recipe.cwd = Some(cwd.clone());
        }
        if let Some(env) = &self.env {
            recipe.env = env.clone();
        }
        if let Some(cols) = self.cols {
            recipe.cols = cols;
        }
        if let Some(rows) = self.rows {
            recipe.rows = rows;
        }
    }
}

/// Captured when the child exits.
#[derive(Debug, Clone, Serialize)]
pub struct ExitRecord {
    /// Exit code; −1 when no status was available.
    pub exit_code: i32,
    /// Terminating signal name, when the child was signalled.
    pub signal: Option<String>,
}

/// Read-only snapshot of a session's screen.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenSnapshot {
    /// Every grid row, untrimmed, exactly `cols` characters each.
    pub lines: Vec<String>,
    /// The text form: trailing spaces and trailing blank rows trimmed.
    pub text: String,
    /// Cursor row, 0-indexed.
    pub cursor_row: usize,
    /// Cursor column, 0-indexed.
    pub cursor_col: usize,
    /// Grid width.
    pub cols: u16,
    /// Grid height.
    pub rows: u16,
}

/// One child process plus its PTY, emulator, ring, and reader.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    recipe: Mutex<LaunchRecipe>,
    parser: Arc<Mutex<TermParser>>,
    ring: Arc<Mutex<RawRing>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    exit: Arc<Mutex<Option<ExitRecord>>>,
    /// Set by `stop_tui` so the registry reaps this session once it exits.
    discarded: AtomicBool,
    events: EventSink,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the Fresh state. Nothing is spawned until
    /// [`Session::start`].
    pub fn new(id: impl Into<String>, recipe: LaunchRecipe, events: EventSink) -> Self {
        let (cols, rows) = (recipe.cols, recipe.rows);
        Self {
            id: id.into(),
            created_at: Utc::now(),
            recipe: Mutex::new(recipe),
            parser: Arc::new(Mutex::new(TermParser::new(rows, cols))),
            ring: Arc::new(Mutex::new(RawRing::new(DEFAULT_RING_CAPACITY))),
            master: Mutex::new(None),
            writer: Mutex::new(None),
            killer: Mutex::new(None),
            reader_thread: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            exit: Arc::new(Mutex::new(None)),
            discarded: AtomicBool::new(false),
            events,
        }
    }

    /// Stable session ID (decimal integer, or `legacy`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session entity was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the child is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The exit record, once the child has exited.
    pub fn exit_record(&self) -> Option<ExitRecord> {
        self.exit.lock().expect("exit lock poisoned").clone()
    }

    /// The command this session runs.
    pub fn command(&self) -> String {
        self.recipe.lock().expect("recipe lock poisoned").command.clone()
    }

    /// Current grid dimensions as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        let parser = self.parser.lock().expect("parser lock poisoned");
        let grid = parser.screen();
        (grid.cols() as u16, grid.rows() as u16)
    }

    /// Whether `stop_tui` has flagged this session for reaping.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Flag this session for removal once its child exits.
    pub fn mark_discarded(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }

    /// Spawn the child under a fresh PTY and start the reader.
    ///
    /// The child's environment is the server's, with `TERM=xterm-256color`
    /// and `COLORTERM=truecolor` layered on, and recipe overrides layered on
    /// top of those. The emulator and ring are reinitialised so a restarted
    /// session starts from a blank screen.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyRunning`] when the child is alive,
    /// [`ServerError::InvalidCommand`] when the recipe has no command, and
    /// [`ServerError::SpawnFailed`] for PTY or spawn failures.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        // A previous reader may still be draining; wait for it so the fresh
        // emulator is not fed stale bytes.
        self.join_reader();

        let recipe = self.recipe.lock().expect("recipe lock poisoned").clone();
        if recipe.command.is_empty() {
            return Err(ServerError::InvalidCommand);
        }
        let spawn_err = |e: anyhow::Error| ServerError::SpawnFailed {
            command: recipe.command.clone(),
            cause: format!("{e:#}"),
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: recipe.rows,
                cols: recipe.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(e.context("failed to open PTY")))?;

        let mut cmd = CommandBuilder::new(&recipe.command);
        cmd.args(&recipe.args);
        if let Some(cwd) = &recipe.cwd {
            cmd.cwd(cwd);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &recipe.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(e.context("failed to spawn command")))?;
        drop(pair.slave);

        let killer = child.clone_killer();
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(e.context("failed to take PTY writer")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(e.context("failed to clone PTY reader")))?;

        // Fresh screen and ring for every launch.
        *self.parser.lock().expect("parser lock poisoned") =
            TermParser::new(recipe.rows, recipe.cols);
        *self.ring.lock().expect("ring lock poisoned") = RawRing::new(DEFAULT_RING_CAPACITY);
        *self.exit.lock().expect("exit lock poisoned") = None;
        self.discarded.store(false, Ordering::SeqCst);

        *self.master.lock().expect("master lock poisoned") = Some(pair.master);
        *self.writer.lock().expect("writer lock poisoned") = Some(writer);
        *self.killer.lock().expect("killer lock poisoned") = Some(killer);
        self.running.store(true, Ordering::SeqCst);

        let id = self.id.clone();
        let parser = Arc::clone(&self.parser);
        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.running);
        let exit = Arc::clone(&self.exit);
        let events = self.events.clone();

        let handle = thread::Builder::new()
            .name(format!("pty-reader-{id}"))
            .spawn(move || {
                log::debug!("pty reader {id} started");
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            {
                                let mut parser = parser.lock().expect("parser lock poisoned");
                                parser.process(&buf[..n]);
                            }
                            {
                                let mut ring = ring.lock().expect("ring lock poisoned");
                                ring.extend(&buf[..n]);
                            }
                            events.emit(SessionEvent::Data {
                                terminal_id: id.clone(),
                                bytes: buf[..n].to_vec(),
                            });
                        }
                        Err(e) => {
                            // Any read failure is treated as early EOF.
                            log::debug!("pty reader {id}: read error, treating as EOF: {e}");
                            break;
                        }
                    }
                }

                let record = match child.wait() {
                    Ok(status) => ExitRecord {
                        exit_code: status.exit_code() as i32,
                        signal: status.signal().map(str::to_string),
                    },
                    Err(e) => {
                        log::warn!("pty reader {id}: child wait failed: {e}");
                        ExitRecord {
                            exit_code: -1,
                            signal: None,
                        }
                    }
                };
                log::info!(
                    "session {id} exited with code {} (signal: {:?})",
                    record.exit_code,
                    record.signal
                );
                *exit.lock().expect("exit lock poisoned") = Some(record.clone());
                running.store(false, Ordering::SeqCst);
                events.emit(SessionEvent::Exit {
                    terminal_id: id,
                    exit_code: record.exit_code,
                    signal: record.signal,
                });
            })
            .map_err(|e| spawn_err(anyhow!(e).context("failed to spawn reader thread")))?;

        *self.reader_thread.lock().expect("reader lock poisoned") = Some(handle);
        self.events.emit(SessionEvent::Start {
            terminal_id: self.id.clone(),
        });
        log::info!(
            "session {} started: {} {:?} ({}x{})",
            self.id,
            recipe.command,
            recipe.args,
            recipe.cols,
            recipe.rows
        );
        Ok(())
    }

    /// Write raw bytes to the child's input.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotRunning`] when the child has exited; input is never
    /// buffered for a future launch.
    pub fn type_text(&self, bytes: &[u8]) -> Result<(), ServerError> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let writer = writer.as_mut().ok_or(ServerError::NotRunning)?;
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|_| ServerError::NotRunning)
    }

    /// Encode a symbolic key name and transmit it.
    pub fn press_key(&self, key: &str) -> Result<(), ServerError> {
        let bytes = encode_key(key)?;
        self.type_text(&bytes)
    }

    /// Resize the PTY window and the emulator grid together.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), ServerError> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        // Hold the parser lock across the PTY resize so no output chunk is
        // interpreted against mismatched dimensions.
        let mut parser = self.parser.lock().expect("parser lock poisoned");
        let master = self.master.lock().expect("master lock poisoned");
        if let Some(master) = master.as_ref() {
            let _ = master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
        parser.set_size(rows, cols);
        drop(parser);
        let mut recipe = self.recipe.lock().expect("recipe lock poisoned");
        recipe.cols = cols;
        recipe.rows = rows;
        Ok(())
    }

    /// Signal the child to terminate. Idempotent; does not wait beyond the
    /// underlying process API. The session transitions to Exited when the
    /// reader observes EOF.
    pub fn stop(&self) {
        let mut killer = self.killer.lock().expect("killer lock poisoned");
        if let Some(killer) = killer.as_mut() {
            if let Err(e) = killer.kill() {
                log::debug!("session {}: kill: {e}", self.id);
            }
        }
    }

    /// Stop the child and wait for the reader to shut down.
    pub fn stop_and_join(&self) {
        self.stop();
        self.join_reader();
    }

    /// Stop, apply the update over the stored recipe, and start again.
    /// The grid and raw ring are cleared by the new launch.
    pub fn restart(&self, update: &RecipeUpdate) -> Result<(), ServerError> {
        self.stop_and_join();
        update.apply(&mut self.recipe.lock().expect("recipe lock poisoned"));
        self.start()
    }

    /// Snapshot the screen: rows, text form, cursor, and dimensions.
    pub fn screen(&self) -> ScreenSnapshot {
        let parser = self.parser.lock().expect("parser lock poisoned");
        let grid = parser.screen();
        let (cursor_row, cursor_col) = grid.cursor();
        ScreenSnapshot {
            lines: grid.lines(),
            text: grid.text(),
            cursor_row,
            cursor_col,
            cols: grid.cols() as u16,
            rows: grid.rows() as u16,
        }
    }

    /// The screen's text form alone.
    pub fn screen_text(&self) -> String {
        self.parser.lock().expect("parser lock poisoned").screen().text()
    }

    /// The last `n` newline-separated lines of raw child output.
    pub fn last_output(&self, n: usize) -> String {
        self.ring.lock().expect("ring lock poisoned").tail_lines(n)
    }

    fn join_reader(&self) {
        let handle = self.reader_thread.lock().expect("reader lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
