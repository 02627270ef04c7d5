//! ForceSend mode: drain one account at a time, rotate on failure streaks
//!
//! Optimizes for maximum distinct-target coverage. The current account
//! always prefers targets never attempted by anyone, then unsent targets
//! other accounts failed but this one has not tried. A success resets the
//! account's consecutive-failure counter; a streak reaching the job's
//! threshold marks the account Limited and rotates to the next one. The
//! rotation signal is the streak, not the total failure count. Job counters
//! here count attempts.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::models::AccountStatus;
use crate::storage::{AccountRepository, JobRepository, TargetRepository};

use super::{
    eligible_account, honor_backoff, inter_send_pause, is_cancelled, ModeContext, ModeSummary,
};

pub(crate) async fn run(ctx: &mut ModeContext) -> Result<ModeSummary> {
    let job = ctx.job.clone();

    for account_id in &job.account_ids {
        if is_cancelled(&ctx.cancel) {
            return Ok(ModeSummary::cancelled());
        }
        if let Some(reason) = ctx.health.should_stop_job(&job) {
            info!(job_id = %job.id, %reason, "Stopping: all accounts disqualified");
            return Ok(ModeSummary::stopped(reason));
        }

        let mut streak: u32 = 0;

        loop {
            if is_cancelled(&ctx.cancel) {
                return Ok(ModeSummary::cancelled());
            }
            // Disqualification mid-loop (health probe, daily cap) ends this
            // account's turn at the next checkpoint
            if eligible_account(&ctx.stores, account_id).is_none() {
                break;
            }

            let Some(target_id) = next_target(ctx, &job.id, account_id)? else {
                debug!(job_id = %job.id, account_id = %account_id, "No targets left for this account");
                break;
            };

            let outcome = ctx.sender.send(&job, account_id, &target_id).await;

            if outcome.is_success() {
                streak = 0;
                ctx.stores.jobs.add_counts(&job.id, 1, 0)?;
            } else {
                streak += 1;
                ctx.stores.jobs.add_counts(&job.id, 0, 1)?;

                if streak >= job.failure_threshold.max(1) {
                    warn!(
                        job_id = %job.id,
                        account_id = %account_id,
                        streak,
                        "Failure streak reached threshold, rotating account"
                    );
                    ctx.stores
                        .accounts
                        .set_status(account_id, AccountStatus::Limited)?;
                    ctx.health.invalidate(account_id).await;
                    break;
                }

                if !honor_backoff(&outcome, &mut ctx.cancel).await {
                    return Ok(ModeSummary::cancelled());
                }
            }

            if !inter_send_pause(&ctx.delay, &mut ctx.cancel).await {
                return Ok(ModeSummary::cancelled());
            }
        }
    }

    Ok(ModeSummary::default())
}

/// Pick the next target for the account: (a) never attempted by any
/// account, then (b) unsent and not yet attempted by this one.
fn next_target(ctx: &ModeContext, job_id: &str, account_id: &str) -> Result<Option<String>> {
    let targets = ctx.stores.targets.targets_for_job(job_id)?;

    if let Some(fresh) = targets.iter().find(|t| t.is_untouched()) {
        return Ok(Some(fresh.id.clone()));
    }

    Ok(targets
        .iter()
        .find(|t| !t.sent && !t.has_failed_account(account_id))
        .map(|t| t.id.clone()))
}
