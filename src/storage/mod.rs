//! Persistence layer: repository traits, SQLite store, in-memory store
//!
//! All shared engine state (jobs, targets, accounts, proxies, attempt log)
//! lives behind these traits; executors re-read records at loop checkpoints
//! and treat the store as the single source of truth.

pub mod memory;
pub mod repository;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

pub use memory::MemoryStore;
pub use repository::{
    AccountRepository, JobRepository, ProxyRepository, SendLogRepository, SqliteStore,
    TargetRepository,
};

/// Bundle of repository handles shared across the engine
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub targets: Arc<dyn TargetRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub proxies: Arc<dyn ProxyRepository>,
    pub log: Arc<dyn SendLogRepository>,
}

impl Stores {
    /// Open a SQLite-backed store bundle
    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(path)?);
        Ok(Self::from_shared(store))
    }

    /// Create an in-memory store bundle
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(MemoryStore::new()))
    }

    /// Build a bundle from one object implementing every repository trait
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: JobRepository
            + TargetRepository
            + AccountRepository
            + ProxyRepository
            + SendLogRepository
            + 'static,
    {
        Self {
            jobs: store.clone(),
            targets: store.clone(),
            accounts: store.clone(),
            proxies: store.clone(),
            log: store,
        }
    }
}
