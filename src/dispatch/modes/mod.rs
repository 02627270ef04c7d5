//! Mode executors and their shared cancellable work loop
//!
//! All three modes share the same loop discipline: the cancellation signal
//! is checked before every attempt and before every sleep, account
//! eligibility is re-read from the store at each selection (an account
//! disqualified mid-loop is skipped at the next checkpoint, never
//! interrupted mid-attempt), and network-signalled backoff is honored with
//! an interruptible sleep.

pub mod force;
pub mod normal;
pub mod repeat;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::health::{AccountHealthMonitor, StopReason};
use crate::models::{Account, Job};
use crate::sender::{MessageSender, SendOutcome};
use crate::storage::{AccountRepository, Stores};
use crate::utils::delay::{sleep_cancellable, DelayPolicy};

/// Everything a mode executor needs for one job run
pub(crate) struct ModeContext {
    pub job: Job,
    pub stores: Stores,
    pub sender: Arc<MessageSender>,
    pub health: Arc<AccountHealthMonitor>,
    pub cancel: watch::Receiver<bool>,
    pub delay: Arc<DelayPolicy>,
}

/// How a mode run ended
#[derive(Debug, Default)]
pub(crate) struct ModeSummary {
    /// The cancellation signal ended the run early
    pub cancelled: bool,

    /// Every assigned account became disqualified
    pub stop_reason: Option<StopReason>,
}

impl ModeSummary {
    pub(crate) fn cancelled() -> Self {
        Self {
            cancelled: true,
            stop_reason: None,
        }
    }

    pub(crate) fn stopped(reason: StopReason) -> Self {
        Self {
            cancelled: false,
            stop_reason: Some(reason),
        }
    }
}

/// Non-blocking check of the cancellation signal
pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Re-read an account and decide whether it may take a new attempt.
///
/// Covers both the health invariant (non-Active accounts are never
/// selected) and the recovered daily cap (an account at its cap is skipped
/// like a disqualified one).
pub(crate) fn eligible_account(stores: &Stores, account_id: &str) -> Option<Account> {
    match stores.accounts.get_account(account_id) {
        Ok(Some(account)) if account.is_usable() => Some(account),
        Ok(_) => None,
        Err(e) => {
            warn!(account_id, error = %e, "Failed to refresh account, skipping");
            None
        }
    }
}

/// Pause between sends; returns false if cancellation cut the pause short
pub(crate) async fn inter_send_pause(
    delay: &DelayPolicy,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    sleep_cancellable(delay.next_delay(), cancel).await
}

/// Honor a network-signalled backoff before the next attempt
pub(crate) async fn honor_backoff(outcome: &SendOutcome, cancel: &mut watch::Receiver<bool>) -> bool {
    match outcome.retry_after() {
        Some(wait) => sleep_cancellable(wait, cancel).await,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountStatus;
    use chrono::Utc;

    #[test]
    fn test_eligible_account_checks_status_and_cap() {
        let stores = Stores::in_memory();
        let mut account = Account::new("acc1");
        stores.accounts.upsert_account(&account).unwrap();
        assert!(eligible_account(&stores, "acc1").is_some());

        stores
            .accounts
            .set_status("acc1", AccountStatus::Limited)
            .unwrap();
        assert!(eligible_account(&stores, "acc1").is_none());

        account.status = AccountStatus::Active;
        account.sent_today = account.daily_limit;
        account.last_used = Some(Utc::now());
        stores.accounts.upsert_account(&account).unwrap();
        assert!(eligible_account(&stores, "acc1").is_none());

        assert!(eligible_account(&stores, "missing").is_none());
    }

    #[tokio::test]
    async fn test_honor_backoff_passthrough_without_wait() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(honor_backoff(&SendOutcome::Sent, &mut rx).await);
    }
}
