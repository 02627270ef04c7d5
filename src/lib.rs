//! volley - Bulk message dispatcher with account rotation
//!
//! A dispatch engine that delivers bulk messages through a rotating pool of
//! sender accounts, each bound to an external messaging network with rate
//! limits, transient failures and account-level restrictions.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures (jobs, targets, accounts, proxies)
//! - [`storage`] - Persistence behind repository traits (SQLite, in-memory)
//! - [`proxy`] - Proxy pool with least-used selection and auto-retirement
//! - [`client`] - Session catalog, gateway transport and connection leasing
//! - [`health`] - Account health monitoring with a TTL probe cache
//! - [`sender`] - Single-attempt sending with outcome classification
//! - [`dispatch`] - Job orchestration, mode executors and cancellation
//! - [`server`] - HTTP status/metrics surface
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use volley::config::Config;
//! use volley::storage::Stores;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let stores = Stores::sqlite(&config.database.sqlite_path)?;
//!     // build the engine and start jobs; see volley::commands::run
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod proxy;
pub mod sender;
pub mod server;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatch::{DispatchEngine, JobHandle};
    pub use crate::error::{Error, ErrorCategory, Result, VolleyErrorTrait};
    pub use crate::models::{
        Account, AccountStatus, ExecMode, FinalReport, Job, JobStatus, ProgressSnapshot, Proxy,
        Target,
    };
    pub use crate::sender::{FailureKind, SendOutcome};
    pub use crate::storage::Stores;
}

// Direct re-exports for convenience
pub use models::{Account, AccountStatus, ExecMode, Job, JobStatus, Proxy, Target};
