//! Account health monitoring with a TTL probe cache
//!
//! Live health probes are expensive: they acquire a connection and query the
//! network's well-known health-check peer. The monitor caches probe results
//! for five minutes per account and serializes the read-check-write sequence
//! behind a mutex, so a burst of concurrent senders reacting to the same
//! rate-limit signal produces at most one live probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::ClientLease;
use crate::metrics;
use crate::models::{AccountStatus, Job};
use crate::storage::AccountRepository;
use crate::utils::error::LeaseError;

/// How long a probe result stays fresh
pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(300);

lazy_static! {
    /// Markers that mean the account is permanently gone
    static ref BANNED_MARKERS: Regex =
        Regex::new(r"(?i)\b(banned|deactivated|terminated)\b").unwrap();

    /// Markers that mean the account is temporarily restricted
    static ref LIMITED_MARKERS: Regex =
        Regex::new(r"(?i)\b(restricted|limited|flood|spam)\b").unwrap();
}

/// Classify a health-check response into an account status
pub fn classify_probe_response(text: &str) -> AccountStatus {
    if BANNED_MARKERS.is_match(text) {
        AccountStatus::Banned
    } else if LIMITED_MARKERS.is_match(text) {
        AccountStatus::Limited
    } else {
        AccountStatus::Active
    }
}

struct CacheEntry {
    status: AccountStatus,
    checked_at: Instant,
}

/// Why a job has to stop: every assigned account is disqualified
#[derive(Debug, Clone)]
pub struct StopReason {
    /// Each disqualified account with the status that disqualified it
    pub disqualified: Vec<(String, AccountStatus)>,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no active accounts remain")?;
        if self.disqualified.is_empty() {
            return Ok(());
        }
        write!(f, ": ")?;
        for (i, (id, status)) in self.disqualified.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}={status}")?;
        }
        Ok(())
    }
}

/// Determines whether accounts are currently usable, probing lazily
pub struct AccountHealthMonitor {
    accounts: Arc<dyn AccountRepository>,
    lease: Arc<ClientLease>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl AccountHealthMonitor {
    pub fn new(accounts: Arc<dyn AccountRepository>, lease: Arc<ClientLease>) -> Self {
        Self {
            accounts,
            lease,
            cache: Mutex::new(HashMap::new()),
            ttl: STATUS_CACHE_TTL,
        }
    }

    /// Override the cache TTL (tests)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Determine the account's real status, probing the network on a cache
    /// miss.
    ///
    /// The cache lock is held across the probe: concurrent callers for the
    /// same account wait for the first probe instead of issuing their own.
    pub async fn check_real_status(&self, account_id: &str) -> AccountStatus {
        let mut cache = self.cache.lock().await;

        if let Some(entry) = cache.get(account_id) {
            if entry.checked_at.elapsed() < self.ttl {
                debug!(account_id, status = %entry.status, "Health cache hit");
                return entry.status;
            }
        }

        let status = self.probe(account_id).await;
        cache.insert(
            account_id.to_string(),
            CacheEntry {
                status,
                checked_at: Instant::now(),
            },
        );
        status
    }

    /// Drop a cached status so the next check probes again
    pub async fn invalidate(&self, account_id: &str) {
        self.cache.lock().await.remove(account_id);
    }

    /// Check whether the job can continue: `None` while at least one
    /// assigned account is still Active, otherwise the disqualification
    /// breakdown.
    pub fn should_stop_job(&self, job: &Job) -> Option<StopReason> {
        let accounts = match self.accounts.accounts_by_ids(&job.account_ids) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to load accounts for stop check");
                return None;
            }
        };

        if accounts.iter().any(|a| a.status == AccountStatus::Active) {
            return None;
        }

        Some(StopReason {
            disqualified: accounts
                .into_iter()
                .map(|a| (a.id, a.status))
                .collect(),
        })
    }

    /// Perform one live probe and write the result through to the store.
    ///
    /// Probe failures are not cached as a status change: the persisted
    /// status keeps ruling until a probe actually reaches the network.
    async fn probe(&self, account_id: &str) -> AccountStatus {
        metrics::health_probe();

        let lease = match self.lease.acquire(account_id).await {
            Ok(lease) => lease,
            Err(LeaseError::SessionInvalid(_)) => {
                info!(account_id, "Health probe found invalid session");
                self.persist_status(account_id, AccountStatus::Inactive);
                return AccountStatus::Inactive;
            }
            Err(e) => {
                warn!(account_id, error = %e, "Health probe could not connect");
                return self.persisted_status(account_id);
            }
        };

        match lease.conn.probe_health().await {
            Ok(text) => {
                let status = classify_probe_response(&text);
                info!(account_id, status = %status, "Health probe completed");
                self.persist_status(account_id, status);
                status
            }
            Err(e) => {
                warn!(account_id, error = %e, "Health probe request failed");
                self.persisted_status(account_id)
            }
        }
    }

    fn persisted_status(&self, account_id: &str) -> AccountStatus {
        match self.accounts.get_account(account_id) {
            Ok(Some(account)) => account.status,
            _ => AccountStatus::Inactive,
        }
    }

    fn persist_status(&self, account_id: &str, status: AccountStatus) {
        if let Err(e) = self.accounts.set_status(account_id, status) {
            warn!(account_id, error = %e, "Failed to persist account status");
        }
    }
}
