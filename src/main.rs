//! Tuipilot server binary.
//!
//! Serves MCP over stdin/stdout, so all diagnostics go to a log file and the
//! optional live mirror goes to stderr or a file. A command given after the
//! flags is launched eagerly as the `legacy` session.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;

use tuipilot::calllog::CallLog;
use tuipilot::config::expand_path;
use tuipilot::live::{self, LiveOptions};
use tuipilot::{serve, ServerConfig, ServerState, SessionRegistry};

/// Global flag for signal-triggered shutdown (as Arc for signal-hook
/// compatibility).
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

#[derive(Parser)]
#[command(name = "tuipilot")]
#[command(version)]
#[command(about = "Drive interactive terminal applications over MCP stdio")]
struct Cli {
    /// Default terminal width for new sessions.
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Default terminal height for new sessions.
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Default working directory for children.
    #[arg(long)]
    cwd: Option<String>,

    /// Mirror the focused screen to stderr (when stderr is a terminal).
    #[arg(long)]
    live: bool,

    /// Mirror the focused screen into this file, rewritten on each redraw.
    #[arg(long)]
    live_file: Option<PathBuf>,

    /// Request log: one TOOL_CALL and one TOOL_RESULT line per operation.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Command (plus arguments) to launch eagerly as the `legacy` session.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = ServerConfig {
        cols: cli.cols,
        rows: cli.rows,
        cwd: cli.cwd.as_deref().map(expand_path),
        live: cli.live,
        live_file: cli.live_file,
        log_file: cli.log_file,
        command: cli.command,
    };

    // Graceful shutdown on the usual signals; the dispatch loop polls the
    // flag and returns so teardown runs on the normal path.
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    signal_hook::flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    signal_hook::flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(run_server(config))
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let mut registry = SessionRegistry::new();

    // A command on the server command line becomes the legacy session,
    // eagerly launched so the client can drive it without a create call.
    // Failing to launch it is a startup failure.
    if let Some(recipe) = config.legacy_recipe() {
        registry
            .attach_legacy(recipe)
            .with_context(|| format!("failed to launch {:?}", config.command))?;
        log::info!("legacy session launched: {:?}", config.command);
    }

    let call_log = Arc::new(CallLog::new(config.log_file.as_deref()));
    let live_opts = LiveOptions {
        terminal: config.live && atty::is(atty::Stream::Stderr),
        file: config.live_file.clone(),
    };

    let events_rx = registry.subscribe();
    let state: tuipilot::SharedState =
        Arc::new(Mutex::new(ServerState::new(registry, config)));

    let renderer = live_opts
        .enabled()
        .then(|| live::spawn(Arc::clone(&state), events_rx, live_opts.clone()));

    log::info!("tuipilot v{} serving on stdio", env!("CARGO_PKG_VERSION"));
    let served = serve::run(
        Arc::clone(&state),
        call_log,
        Arc::clone(&*SHUTDOWN_FLAG),
    )
    .await;

    // Teardown runs for both clean EOF and signal shutdown: the file sink
    // gets a final frame while screens still exist, the terminal sink is
    // restored, then every child is killed.
    if let Some(renderer) = renderer {
        renderer.abort();
    }
    live::shutdown(&state, &live_opts);
    state
        .lock()
        .expect("state lock poisoned")
        .registry
        .kill_all();
    log::info!("shutdown complete");

    served
}

/// Route diagnostics to a file so stdout stays pure protocol and stderr
/// stays available for the live mirror.
fn init_logging() {
    let log_path = std::env::var("TUIPILOT_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("tuipilot.log"));
    match std::fs::File::create(&log_path) {
        Ok(log_file) => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .format_timestamp_secs()
            .init();
        }
        Err(_) => {
            // No log file, no logging: stderr belongs to the live mirror.
            env_logger::Builder::new()
                .filter_level(log::LevelFilter::Off)
                .init();
        }
    }
}
