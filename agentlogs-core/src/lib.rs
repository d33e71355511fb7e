//! # agentlogs-core
//!
//! Transcript normalization and session discovery for local AI coding
//! agents (Claude Code, Codex, OpenCode).
//!
//! This library provides:
//! - A canonical entry model shared by every provider
//! - Per-provider normalizers, including Claude tool-call/result merging
//!   and OpenCode reassembly from fragmented storage
//! - Session discovery across the registry, plan archives, live transcripts
//!   and OpenCode storage, with specifier resolution
//! - An incremental monitor with a SQLite message store
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentlogs_core::{Config, EntryStream, Scanner};
//!
//! let config = Config::load().expect("failed to load config");
//! let scanner = Scanner::from_config(&config);
//!
//! let session = scanner.resolve("demo/01-setup.md").expect("no such session");
//! for entry in EntryStream::open(&session.log_path, session.provider).expect("unreadable") {
//!     println!("{}: {}", entry.role.as_str(), entry.text());
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use monitor::{Monitor, MonitorHandle, OffsetTracker, RecentlyActive};
pub use session::Scanner;
pub use store::SqliteStore;
pub use transcript::{read_entries, EntryStream, Normalizer};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod opencode;
pub mod session;
pub mod store;
pub mod transcript;
pub mod types;
