//! Proxy pool with least-used selection and failure-based retirement
//!
//! The pool hands out the active proxy with the lowest success count so load
//! spreads toward the least-used endpoints. Outcome reports mutate persisted
//! counters; three failures retire a proxy permanently (only an external
//! re-import can reactivate it). Two concurrent leases may race on the same
//! proxy's counters; lost updates are tolerated, only crossing the disable
//! threshold matters.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::metrics;
use crate::models::Proxy;
use crate::storage::ProxyRepository;

/// Selects proxies for connection attempts and records their outcomes
#[derive(Clone)]
pub struct ProxyPool {
    repo: Arc<dyn ProxyRepository>,
}

impl ProxyPool {
    pub fn new(repo: Arc<dyn ProxyRepository>) -> Self {
        Self { repo }
    }

    /// Pick the active proxy with the lowest success count.
    ///
    /// Returns `None` when the pool is empty or every proxy has been
    /// retired; the caller must fall back to a direct connection.
    pub fn acquire(&self) -> Option<Proxy> {
        let candidates = match self.repo.active_proxies() {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to list proxies, falling back to direct");
                return None;
            }
        };

        let picked = candidates
            .into_iter()
            .min_by_key(|p| p.success_count)?;

        debug!(proxy_id = %picked.id, success_count = picked.success_count, "Proxy acquired");
        Some(picked)
    }

    /// Look up a proxy by id, only if it is still active
    pub fn get_active(&self, id: &str) -> Option<Proxy> {
        match self.repo.get_proxy(id) {
            Ok(Some(p)) if p.active => Some(p),
            Ok(_) => None,
            Err(e) => {
                warn!(proxy_id = %id, error = %e, "Failed to load proxy");
                None
            }
        }
    }

    /// Record a connection outcome for a proxy.
    ///
    /// Returns the updated proxy record; `active == false` on the returned
    /// value means this (or an earlier) report retired it.
    pub fn report_outcome(&self, id: &str, success: bool) -> Option<Proxy> {
        let mut proxy = match self.repo.get_proxy(id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(proxy_id = %id, "Outcome reported for unknown proxy");
                return None;
            }
            Err(e) => {
                warn!(proxy_id = %id, error = %e, "Failed to load proxy for outcome report");
                return None;
            }
        };

        let disabled_now = proxy.record_outcome(success);
        if let Err(e) = self.repo.save_proxy(&proxy) {
            warn!(proxy_id = %id, error = %e, "Failed to persist proxy outcome");
        }

        if disabled_now {
            metrics::proxy_disabled();
            warn!(
                proxy_id = %id,
                failures = proxy.failure_count,
                "Proxy disabled after repeated failures"
            );
        }

        Some(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn pool_with(proxies: &[Proxy]) -> ProxyPool {
        let store = Arc::new(MemoryStore::new());
        for p in proxies {
            store.upsert_proxy(p).unwrap();
        }
        ProxyPool::new(store)
    }

    #[test]
    fn test_acquire_prefers_least_used() {
        let mut busy = Proxy::new("p1", "socks5://a:1080");
        busy.success_count = 10;
        let idle = Proxy::new("p2", "socks5://b:1080");

        let pool = pool_with(&[busy, idle]);
        assert_eq!(pool.acquire().unwrap().id, "p2");
    }

    #[test]
    fn test_acquire_empty_pool() {
        let pool = pool_with(&[]);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_acquire_skips_disabled() {
        let mut dead = Proxy::new("p1", "socks5://a:1080");
        dead.active = false;
        let pool = pool_with(&[dead]);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_report_success_increments() {
        let pool = pool_with(&[Proxy::new("p1", "socks5://a:1080")]);
        let updated = pool.report_outcome("p1", true).unwrap();
        assert_eq!(updated.success_count, 1);
        assert!(updated.active);
    }

    #[test]
    fn test_third_failure_disables_and_never_returned() {
        let pool = pool_with(&[Proxy::new("p1", "socks5://a:1080")]);

        assert!(pool.report_outcome("p1", false).unwrap().active);
        assert!(pool.report_outcome("p1", false).unwrap().active);

        let retired = pool.report_outcome("p1", false).unwrap();
        assert!(!retired.active);
        assert_eq!(retired.failure_count, 3);

        assert!(pool.acquire().is_none());
        assert!(pool.get_active("p1").is_none());
    }

    #[test]
    fn test_report_unknown_proxy() {
        let pool = pool_with(&[]);
        assert!(pool.report_outcome("ghost", true).is_none());
    }
}
