//! RepeatSend mode: every account delivers to every target once
//!
//! The account list is partitioned into groups of `thread_count`; groups
//! run sequentially while accounts within a group run concurrently. Each
//! account walks the full target list; already-sent targets are NOT
//! skipped, so a healthy pool produces exactly accounts x targets attempts
//! regardless of individual outcomes. An account disqualified mid-run stops
//! its own worker at the next checkpoint without touching the rest of the
//! group. Job counters here count attempts.

use anyhow::Result;
use tracing::{debug, info};

use crate::storage::JobRepository;

use super::{
    eligible_account, honor_backoff, inter_send_pause, is_cancelled, ModeContext, ModeSummary,
};

pub(crate) async fn run(ctx: &mut ModeContext) -> Result<ModeSummary> {
    let job = ctx.job.clone();
    let group_size = job.thread_count.max(1);

    for group in job.account_ids.chunks(group_size) {
        if is_cancelled(&ctx.cancel) {
            return Ok(ModeSummary::cancelled());
        }
        if let Some(reason) = ctx.health.should_stop_job(&job) {
            info!(job_id = %job.id, %reason, "Stopping: all accounts disqualified");
            return Ok(ModeSummary::stopped(reason));
        }

        debug!(job_id = %job.id, accounts = group.len(), "Starting account group");

        let workers = group.iter().map(|account_id| {
            let job = job.clone();
            let stores = ctx.stores.clone();
            let sender = ctx.sender.clone();
            let delay = ctx.delay.clone();
            let mut cancel = ctx.cancel.clone();
            let account_id = account_id.clone();

            async move {
                for target_id in &job.target_ids {
                    if is_cancelled(&cancel) {
                        return Ok(true);
                    }
                    // A disqualified account stops sending; it does not get
                    // replaced, the remaining pairs simply never happen
                    if eligible_account(&stores, &account_id).is_none() {
                        debug!(job_id = %job.id, account_id = %account_id, "Account no longer eligible, worker done");
                        return Ok(false);
                    }

                    let outcome = sender.send(&job, &account_id, target_id).await;
                    if outcome.is_success() {
                        stores.jobs.add_counts(&job.id, 1, 0)?;
                    } else {
                        stores.jobs.add_counts(&job.id, 0, 1)?;
                        if !honor_backoff(&outcome, &mut cancel).await {
                            return Ok(true);
                        }
                    }

                    if !inter_send_pause(&delay, &mut cancel).await {
                        return Ok(true);
                    }
                }
                Ok::<bool, anyhow::Error>(false)
            }
        });

        let results = futures::future::join_all(workers).await;
        for result in results {
            if result? {
                return Ok(ModeSummary::cancelled());
            }
        }
    }

    Ok(ModeSummary::default())
}
