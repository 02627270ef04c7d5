//! Connection leasing for sender accounts
//!
//! A lease ties together the session catalog, the proxy pool and the
//! transport: the account's assigned proxy is tried first under a hard
//! bound, the outcome is reported back to the pool, and a direct connection
//! is the fallback. Release is automatic: dropping the lease drops the
//! underlying connection on every exit path.

pub mod session;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::Proxy;
use crate::proxy::ProxyPool;
use crate::storage::AccountRepository;
use crate::utils::error::{LeaseError, SessionError, TransportError};

pub use session::{FileSessionStore, SessionHandle, SessionStore};
pub use transport::{Connection, HttpTransport, Transport, DEFAULT_PROXY_TIMEOUT};

/// A live, scoped account connection
///
/// The connection is released when the lease is dropped; callers never
/// release explicitly.
pub struct Lease {
    /// The live connection
    pub conn: Box<dyn Connection>,

    /// Id of the proxy the connection went through, if any
    pub via_proxy: Option<String>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("account_id", &self.conn.account_id())
            .field("via_proxy", &self.via_proxy)
            .finish()
    }
}

/// Acquires connections for accounts, proxy-first with direct fallback
pub struct ClientLease {
    transport: Arc<dyn Transport>,
    sessions: Arc<dyn SessionStore>,
    proxies: ProxyPool,
    accounts: Arc<dyn AccountRepository>,
    proxy_timeout: Duration,
}

impl ClientLease {
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<dyn SessionStore>,
        proxies: ProxyPool,
        accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        Self {
            transport,
            sessions,
            proxies,
            accounts,
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }

    /// Override the bound on proxied connection attempts
    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    /// Acquire a connection for the account.
    ///
    /// Tries the account's assigned proxy (acquiring and persisting one if
    /// none is assigned), reports the proxy outcome, clears the assignment
    /// when the proxy was just retired, and falls back to a direct
    /// connection. `LeaseError::SessionInvalid` means the account's
    /// credentials are unusable and must not be retried.
    pub async fn acquire(&self, account_id: &str) -> Result<Lease, LeaseError> {
        let session = self.sessions.open(account_id).map_err(|e| match e {
            SessionError::Corrupted(_) | SessionError::Missing(_) => {
                LeaseError::SessionInvalid(account_id.to_string())
            }
            SessionError::Io(io) => {
                warn!(account_id, error = %io, "Session read failed");
                LeaseError::SessionInvalid(account_id.to_string())
            }
        })?;

        if let Some(proxy) = self.resolve_proxy(account_id) {
            match self
                .transport
                .connect(&session, Some(&proxy), Some(self.proxy_timeout))
                .await
            {
                Ok(conn) => {
                    self.proxies.report_outcome(&proxy.id, true);
                    debug!(account_id, proxy_id = %proxy.id, "Connected via proxy");
                    return Ok(Lease {
                        conn,
                        via_proxy: Some(proxy.id),
                    });
                }
                Err(e) => {
                    warn!(account_id, proxy_id = %proxy.id, error = %e, "Proxy connection failed");
                    let updated = self.proxies.report_outcome(&proxy.id, false);
                    if matches!(updated, Some(ref p) if !p.active) {
                        if let Err(e) = self.accounts.clear_proxy(account_id) {
                            warn!(account_id, error = %e, "Failed to clear retired proxy assignment");
                        }
                    }
                    // Fall through to the direct attempt
                }
            }
        }

        match self.transport.connect(&session, None, None).await {
            Ok(conn) => {
                debug!(account_id, "Connected directly");
                Ok(Lease {
                    conn,
                    via_proxy: None,
                })
            }
            Err(source) => Err(LeaseError::Unreachable {
                account_id: account_id.to_string(),
                source,
            }),
        }
    }

    /// Work out which proxy, if any, to try for this account.
    ///
    /// An assigned, still-active proxy wins. A stale assignment (retired
    /// proxy) is cleared. Without an assignment, one is acquired from the
    /// pool and persisted before the attempt so concurrent leases for the
    /// same account converge on one proxy.
    fn resolve_proxy(&self, account_id: &str) -> Option<Proxy> {
        let assigned = match self.accounts.get_account(account_id) {
            Ok(Some(account)) => account.proxy_id,
            Ok(None) => None,
            Err(e) => {
                warn!(account_id, error = %e, "Failed to load account for proxy lookup");
                None
            }
        };

        if let Some(proxy_id) = assigned {
            if let Some(proxy) = self.proxies.get_active(&proxy_id) {
                return Some(proxy);
            }
            if let Err(e) = self.accounts.clear_proxy(account_id) {
                warn!(account_id, error = %e, "Failed to clear stale proxy assignment");
            }
        }

        let proxy = self.proxies.acquire()?;
        if let Err(e) = self.accounts.assign_proxy(account_id, &proxy.id) {
            warn!(account_id, proxy_id = %proxy.id, error = %e, "Failed to persist proxy assignment");
        }
        Some(proxy)
    }
}

/// Convenience for tests and callers that only need the error kind
pub fn is_session_invalid(err: &LeaseError) -> bool {
    matches!(err, LeaseError::SessionInvalid(_))
}

/// Check whether an unreachable lease came down to a timeout on both paths
pub fn is_timeout(err: &LeaseError) -> bool {
    matches!(
        err,
        LeaseError::Unreachable {
            source: TransportError::Timeout,
            ..
        }
    )
}
