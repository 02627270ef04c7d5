//! Normal mode: one delivery per target, rotating accounts on failure
//!
//! Walks the target list in order. For each unsent target, accounts are
//! tried one at a time (skipping disqualified accounts and accounts that
//! already failed against this target) until one delivers or the list is
//! exhausted. A target with no eligible account left stays unsent and is
//! reported as failed; the job's `sent`/`failed` counters here count
//! targets, not attempts.

use anyhow::Result;
use tracing::{debug, info};

use crate::storage::{JobRepository, TargetRepository};

use super::{
    eligible_account, honor_backoff, inter_send_pause, is_cancelled, ModeContext, ModeSummary,
};

pub(crate) async fn run(ctx: &mut ModeContext) -> Result<ModeSummary> {
    let job = ctx.job.clone();

    for target_id in &job.target_ids {
        if is_cancelled(&ctx.cancel) {
            return Ok(ModeSummary::cancelled());
        }
        if let Some(reason) = ctx.health.should_stop_job(&job) {
            info!(job_id = %job.id, %reason, "Stopping: all accounts disqualified");
            return Ok(ModeSummary::stopped(reason));
        }

        let Some(target) = ctx.stores.targets.get_target(&job.id, target_id)? else {
            continue;
        };
        if target.sent {
            continue;
        }

        let mut delivered = false;

        for account_id in &job.account_ids {
            if is_cancelled(&ctx.cancel) {
                return Ok(ModeSummary::cancelled());
            }
            if eligible_account(&ctx.stores, account_id).is_none() {
                continue;
            }

            // Re-read: earlier failures this pass have already been recorded
            let Some(target) = ctx.stores.targets.get_target(&job.id, target_id)? else {
                break;
            };
            if target.has_failed_account(account_id) {
                continue;
            }

            let outcome = ctx.sender.send(&job, account_id, target_id).await;

            if outcome.is_success() {
                ctx.stores.jobs.add_counts(&job.id, 1, 0)?;
                delivered = true;
            } else if !honor_backoff(&outcome, &mut ctx.cancel).await {
                return Ok(ModeSummary::cancelled());
            }

            if !inter_send_pause(&ctx.delay, &mut ctx.cancel).await {
                return Ok(ModeSummary::cancelled());
            }

            if delivered {
                break;
            }
        }

        if !delivered {
            debug!(job_id = %job.id, target_id = %target_id, "Target exhausted all eligible accounts");
            ctx.stores.jobs.add_counts(&job.id, 0, 1)?;
        }
    }

    Ok(ModeSummary::default())
}
