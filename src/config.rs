//! Server configuration assembled from the command line.

use std::path::PathBuf;

use crate::session::LaunchRecipe;

/// Settings the server runs with, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default PTY width for new sessions.
    pub cols: u16,
    /// Default PTY height for new sessions.
    pub rows: u16,
    /// Default working directory for children; `None` inherits the server's.
    pub cwd: Option<PathBuf>,
    /// Mirror the focused screen to stderr when it is a terminal.
    pub live: bool,
    /// Mirror the focused screen into this file, rewritten per redraw.
    pub live_file: Option<PathBuf>,
    /// Request log (`TOOL_CALL` / `TOOL_RESULT` lines).
    pub log_file: Option<PathBuf>,
    /// Command plus arguments for the eager `legacy` session.
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            cwd: None,
            live: false,
            live_file: None,
            log_file: None,
            command: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Build a launch recipe, filling gaps with the server defaults.
    pub fn recipe(
        &self,
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> LaunchRecipe {
        LaunchRecipe::new(command)
            .with_args(args)
            .with_cwd(cwd.or_else(|| self.cwd.clone()))
            .with_size(cols.unwrap_or(self.cols), rows.unwrap_or(self.rows))
    }

    /// Recipe for the `legacy` session named on the server command line,
    /// when one was given.
    pub fn legacy_recipe(&self) -> Option<LaunchRecipe> {
        let (command, args) = self.command.split_first()?;
        Some(self.recipe(
            command.clone(),
            args.to_vec(),
            None,
            None,
            None,
        ))
    }
}

/// Expand `~` and environment references in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
