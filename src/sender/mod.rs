//! Single-attempt message sending with outcome classification
//!
//! The sender performs one send for one (account, target) pair and maps
//! every possible failure into a fixed taxonomy. It never raises an error
//! to the executor above it: every attempt comes back as `Sent`,
//! `Retryable(kind)` or `Fatal(kind)`, with target/account side effects
//! already applied.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tracing::{debug, warn};

use crate::client::ClientLease;
use crate::health::AccountHealthMonitor;
use crate::metrics;
use crate::models::{AccountStatus, Job, SendRecord};
use crate::storage::{AccountRepository, SendLogRepository, TargetRepository};
use crate::utils::error::{LeaseError, TransportError};

/// Classified failure kind, mirrored in reports and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Identity permanently banned by the network
    AccountBlocked,
    /// Target's privacy settings reject this sender
    PrivacyRestricted,
    /// Network requires a prior bidirectional relationship
    MutualContactRequired,
    /// Backoff requested, with the signalled wait
    RateLimited { retry_after: Duration },
    /// Broad sending restriction signalled
    PeerFlood,
    /// Recipient identifier invalid or deleted
    TargetNotFound,
    /// Account credentials unreadable or corrupt
    SessionInvalid,
    /// Network/proxy unreachable on both paths
    ConnectionTimeout,
    /// Anything else
    Unclassified,
}

impl FailureKind {
    /// Stable label used in the attempt log, reports and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::AccountBlocked => "account_blocked",
            Self::PrivacyRestricted => "privacy_restricted",
            Self::MutualContactRequired => "mutual_contact_required",
            Self::RateLimited { .. } => "rate_limited",
            Self::PeerFlood => "peer_flood",
            Self::TargetNotFound => "target_not_found",
            Self::SessionInvalid => "session_invalid",
            Self::ConnectionTimeout => "connection_timeout",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Outcome of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivery confirmed
    Sent,
    /// Failed, but the condition may clear
    Retryable(FailureKind),
    /// Failed for good, for this pair or this account
    Fatal(FailureKind),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Sent => None,
            Self::Retryable(kind) | Self::Fatal(kind) => Some(*kind),
        }
    }

    /// Backoff requested by the network, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind() {
            Some(FailureKind::RateLimited { retry_after }) => Some(retry_after),
            _ => None,
        }
    }
}

/// Map a transport error into an outcome.
///
/// `prior_failures` is the target's failure count before this attempt; it
/// drives the retry-once rule for unknown errors and the ignore-threshold
/// for mutual-contact requirements.
pub fn classify_transport_error(
    err: &TransportError,
    prior_failures: u32,
    mutual_ignore_threshold: u32,
) -> SendOutcome {
    match err {
        TransportError::Blocked => SendOutcome::Fatal(FailureKind::AccountBlocked),
        TransportError::PrivacyRestricted => SendOutcome::Fatal(FailureKind::PrivacyRestricted),
        TransportError::MutualContactRequired => {
            if prior_failures < mutual_ignore_threshold {
                SendOutcome::Retryable(FailureKind::MutualContactRequired)
            } else {
                SendOutcome::Fatal(FailureKind::MutualContactRequired)
            }
        }
        TransportError::FloodWait(wait) => SendOutcome::Retryable(FailureKind::RateLimited {
            retry_after: *wait,
        }),
        TransportError::PeerFlood => SendOutcome::Retryable(FailureKind::PeerFlood),
        TransportError::TargetNotFound(_) => SendOutcome::Fatal(FailureKind::TargetNotFound),
        TransportError::Timeout => SendOutcome::Retryable(FailureKind::ConnectionTimeout),
        // Unknown failures get exactly one more chance, then the pair is
        // abandoned so unknown errors cannot loop forever
        TransportError::Http(_) | TransportError::Gateway { .. } => {
            if prior_failures == 0 {
                SendOutcome::Retryable(FailureKind::Unclassified)
            } else {
                SendOutcome::Fatal(FailureKind::Unclassified)
            }
        }
    }
}

/// Performs send attempts and reports health signals upward
pub struct MessageSender {
    lease: Arc<ClientLease>,
    targets: Arc<dyn TargetRepository>,
    accounts: Arc<dyn AccountRepository>,
    log: Arc<dyn SendLogRepository>,
    health: Arc<AccountHealthMonitor>,
    pacer: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl MessageSender {
    /// Create a sender. `messages_per_second == 0` disables the global
    /// pacer; per-mode inter-send delays still apply.
    pub fn new(
        lease: Arc<ClientLease>,
        targets: Arc<dyn TargetRepository>,
        accounts: Arc<dyn AccountRepository>,
        log: Arc<dyn SendLogRepository>,
        health: Arc<AccountHealthMonitor>,
        messages_per_second: u32,
    ) -> Self {
        let pacer = NonZeroU32::new(messages_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            lease,
            targets,
            accounts,
            log,
            health,
            pacer,
        }
    }

    /// Perform one send attempt for the pair.
    ///
    /// All bookkeeping happens here: the target record, the account's daily
    /// counter, the attempt log and metrics reflect the outcome before it
    /// is returned. Never panics and never surfaces a raw error.
    pub async fn send(&self, job: &Job, account_id: &str, target_id: &str) -> SendOutcome {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
        metrics::attempt(job.mode.as_str());

        let prior_failures = self
            .targets
            .get_target(&job.id, target_id)
            .ok()
            .flatten()
            .map(|t| t.retry_count)
            .unwrap_or(0);

        let lease = match self.lease.acquire(account_id).await {
            Ok(lease) => lease,
            Err(LeaseError::SessionInvalid(_)) => {
                // Corrupt credentials: retire the account outright, nothing
                // network-related to retry
                warn!(account_id, "Session invalid, retiring account");
                self.set_account_status(account_id, AccountStatus::Inactive)
                    .await;
                let outcome = SendOutcome::Fatal(FailureKind::SessionInvalid);
                self.record_failure(job, account_id, target_id, FailureKind::SessionInvalid);
                return outcome;
            }
            Err(LeaseError::Unreachable { source, .. }) => {
                let outcome =
                    classify_transport_error(&source, prior_failures, job.mutual_ignore_threshold);
                self.apply_failure(job, account_id, target_id, outcome).await;
                return outcome;
            }
        };

        match lease.conn.send_message(target_id, &job.message).await {
            Ok(()) => {
                self.record_success(job, account_id, target_id);
                debug!(account_id, target_id, "Message delivered");
                SendOutcome::Sent
            }
            Err(err) => {
                let outcome =
                    classify_transport_error(&err, prior_failures, job.mutual_ignore_threshold);
                debug!(account_id, target_id, error = %err, outcome = ?outcome, "Send failed");
                self.apply_failure(job, account_id, target_id, outcome).await;
                outcome
            }
        }
    }

    /// Apply the account-level consequences of a classified failure, then
    /// record the pair failure.
    async fn apply_failure(
        &self,
        job: &Job,
        account_id: &str,
        target_id: &str,
        outcome: SendOutcome,
    ) {
        match outcome.kind() {
            Some(FailureKind::AccountBlocked) => {
                self.set_account_status(account_id, AccountStatus::Banned)
                    .await;
            }
            Some(FailureKind::RateLimited { .. }) | Some(FailureKind::PeerFlood) => {
                self.spawn_health_recheck(account_id);
            }
            _ => {}
        }

        if let Some(kind) = outcome.kind() {
            self.record_failure(job, account_id, target_id, kind);
        }
    }

    /// Detached health re-check so the account's status reflects reality
    /// before the next attempt against it. Failures are logged inside the
    /// monitor and never reach the caller.
    fn spawn_health_recheck(&self, account_id: &str) {
        let health = self.health.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            let status = health.check_real_status(&account_id).await;
            debug!(account_id = %account_id, status = %status, "Background health re-check finished");
        });
    }

    async fn set_account_status(&self, account_id: &str, status: AccountStatus) {
        if let Err(e) = self.accounts.set_status(account_id, status) {
            warn!(account_id, error = %e, "Failed to update account status");
        }
        self.health.invalidate(account_id).await;
    }

    fn record_success(&self, job: &Job, account_id: &str, target_id: &str) {
        if let Err(e) = self
            .targets
            .record_target_success(&job.id, target_id, account_id)
        {
            warn!(target_id, error = %e, "Failed to persist target success");
        }

        if let Err(e) = self.accounts.record_delivery(account_id) {
            warn!(account_id, error = %e, "Failed to bump daily counter");
        }
        if let Err(e) = self
            .log
            .append(&SendRecord::success(&job.id, account_id, target_id))
        {
            warn!(error = %e, "Failed to append send log");
        }
        metrics::message_sent();
    }

    fn record_failure(&self, job: &Job, account_id: &str, target_id: &str, kind: FailureKind) {
        if let Err(e) =
            self.targets
                .record_target_failure(&job.id, target_id, account_id, kind.label())
        {
            warn!(target_id, error = %e, "Failed to persist target failure");
        }

        if let Err(e) = self.log.append(&SendRecord::failure(
            &job.id,
            account_id,
            target_id,
            kind.label(),
        )) {
            warn!(error = %e, "Failed to append send log");
        }
        metrics::send_failure(kind.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fatal_kinds() {
        assert_eq!(
            classify_transport_error(&TransportError::Blocked, 0, 1),
            SendOutcome::Fatal(FailureKind::AccountBlocked)
        );
        assert_eq!(
            classify_transport_error(&TransportError::PrivacyRestricted, 0, 1),
            SendOutcome::Fatal(FailureKind::PrivacyRestricted)
        );
        assert_eq!(
            classify_transport_error(&TransportError::TargetNotFound("x".into()), 0, 1),
            SendOutcome::Fatal(FailureKind::TargetNotFound)
        );
    }

    #[test]
    fn test_classify_rate_limit_carries_wait() {
        let outcome = classify_transport_error(
            &TransportError::FloodWait(Duration::from_secs(42)),
            0,
            1,
        );
        assert_eq!(outcome.retry_after(), Some(Duration::from_secs(42)));
        assert!(matches!(outcome, SendOutcome::Retryable(_)));
    }

    #[test]
    fn test_classify_mutual_contact_threshold() {
        let err = TransportError::MutualContactRequired;

        // Under the threshold: worth retrying
        assert!(matches!(
            classify_transport_error(&err, 0, 2),
            SendOutcome::Retryable(FailureKind::MutualContactRequired)
        ));
        assert!(matches!(
            classify_transport_error(&err, 1, 2),
            SendOutcome::Retryable(FailureKind::MutualContactRequired)
        ));

        // At the threshold: failure for this pair
        assert!(matches!(
            classify_transport_error(&err, 2, 2),
            SendOutcome::Fatal(FailureKind::MutualContactRequired)
        ));
    }

    #[test]
    fn test_classify_unknown_retried_once() {
        let err = TransportError::Gateway {
            status: 500,
            message: "boom".into(),
        };
        assert!(matches!(
            classify_transport_error(&err, 0, 1),
            SendOutcome::Retryable(FailureKind::Unclassified)
        ));
        assert!(matches!(
            classify_transport_error(&err, 1, 1),
            SendOutcome::Fatal(FailureKind::Unclassified)
        ));
    }

    #[test]
    fn test_classify_timeout_retryable() {
        assert!(matches!(
            classify_transport_error(&TransportError::Timeout, 5, 1),
            SendOutcome::Retryable(FailureKind::ConnectionTimeout)
        ));
    }

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(FailureKind::AccountBlocked.label(), "account_blocked");
        assert_eq!(
            FailureKind::RateLimited {
                retry_after: Duration::ZERO
            }
            .label(),
            "rate_limited"
        );
        assert_eq!(FailureKind::SessionInvalid.label(), "session_invalid");
    }
}
