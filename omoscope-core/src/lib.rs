//! # omoscope-core
//!
//! Read-only derivation engine for OpenCode / oh-my-opencode agent sessions.
//!
//! This library provides:
//! - Storage backends over OpenCode's JSON file tree and SQLite database
//! - Pure derivations: active session, live status, background tasks,
//!   activity histogram, token usage, tool-call listing
//! - Plan progress from `.sisyphus/boulder.json`
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! - **Storage:** [`StorageBackend`] answers five raw queries and drops
//!   malformed records. Tool inputs are discarded during validation.
//! - **Derivation:** functions in [`derive`] turn raw rows plus an injected
//!   `now` into serializable views.
//! - **Snapshot:** [`Dashboard`] runs every derivation and falls back to a
//!   second backend when the first is unavailable.
//!
//! Nothing in this crate writes to session storage.
//!
//! ## Example
//!
//! ```rust,no_run
//! use omoscope_core::{Config, Dashboard};
//!
//! let config = Config::load().expect("failed to load config");
//! let dashboard = Dashboard::from_config(&config.storage, config.dashboard.clone());
//! let now = chrono::Utc::now().timestamp_millis();
//! let snapshot = dashboard
//!     .snapshot(std::path::Path::new("."), now)
//!     .expect("failed to build snapshot");
//! println!("{}", snapshot.main_session.status);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use derive::{
    derive_background_tasks, derive_time_series_activity, derive_token_usage, derive_tool_calls,
    get_main_session_view, pick_active_session_id,
};
pub use error::{Error, Result, StorageFailure, StorageFailureKind};
pub use snapshot::{Dashboard, DashboardSnapshot, PlanSummary};
pub use storage::{select_backend, BackendKind, StorageBackend};
pub use types::*;

// Public modules
pub mod boulder;
pub mod config;
pub mod derive;
pub mod error;
pub mod format;
pub mod guard;
pub mod logging;
pub mod snapshot;
pub mod storage;
pub mod types;
