//! # Game Server Console Library
//!
//! Remote console (RCON) client for a fleet of game server instances. Each
//! instance gets at most one long-lived, authenticated session; commands are
//! sent over it one at a time and their (possibly fragmented) responses are
//! reassembled into a single string.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! One socket to one server:
//! - Login handshake with the console password
//! - Buffered reads that tolerate frames split across socket reads
//! - Response reassembly using a trailing empty command as the end marker
//! - Per-command timeouts; any mid-command failure marks the session broken
//!
//! ### Registry Module (`registry`)
//! The only owner of sessions:
//! - Maps instance names to sessions, one per instance
//! - Per-instance locking so unrelated consoles never wait on each other
//! - Busy handling, either rejecting or queueing concurrent commands
//! - Records every command in the history ledger
//!
//! ### History Module (`history`)
//! Bounded per-instance log of commands and their output, oldest first.
//!
//! ### Commands Module (`commands`)
//! Typed builders for the common admin actions (broadcast, save, kick, ...).
//!
//! ### Mock Module (`mock`, feature `mock-server`)
//! An in-process console endpoint for tests and local experiments.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use console::{ConnectionRegistry, ConsoleConfig, Credential};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ConnectionRegistry::new(ConsoleConfig::default());
//!
//!     registry
//!         .connect("island", "127.0.0.1", 32330, Credential::new("admin"))
//!         .await?;
//!     let players = registry.execute("island", "listplayers").await?;
//!     println!("{}", players);
//!
//!     for record in registry.history().get("island").await {
//!         println!("{} -> {}", record.command, record.response);
//!     }
//!     registry.disconnect("island").await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod history;
#[cfg(any(test, feature = "mock-server"))]
pub mod mock;
pub mod registry;
pub mod session;

pub use commands::AdminCommand;
pub use config::{BusyPolicy, Completion, ConsoleConfig, Credential};
pub use error::{ConsoleError, ExchangeFailure};
pub use history::{CommandRecord, HistoryLedger};
pub use registry::ConnectionRegistry;
pub use session::{Connector, Session, TcpConnector};
