//! Tuipilot — a headless control server for driving interactive terminal
//! applications.
//!
//! Children run under pseudo-terminals; their output streams through a
//! terminal emulator into per-session character grids, which the client
//! inspects and drives through a small set of MCP tools over stdio.
//!
//! # Architecture
//!
//! ```text
//! stdin (JSON-RPC) → serve → ops ─┬→ SessionRegistry ─┬→ Session 1 ─ PTY ─ child
//!                                 │   (IDs, events)   └→ Session N ─ PTY ─ child
//!                                 └→ focus chain
//! child bytes → TermParser (grid) + RawRing + Data events → live mirror
//! ```

pub mod calllog;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod live;
pub mod ops;
pub mod registry;
pub mod ring;
pub mod serve;
pub mod session;
pub mod term;

pub use config::ServerConfig;
pub use error::ServerError;
pub use ops::{ServerState, SharedState};
pub use registry::SessionRegistry;
pub use session::{LaunchRecipe, Session};
