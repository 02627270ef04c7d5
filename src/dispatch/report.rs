//! Final report assembly
//!
//! The engine produces structured data only; rendering is the caller's
//! business. Failures are grouped by classified error label so "give up"
//! conditions (banned, not found) are distinguishable from "retry later"
//! conditions (rate limited).

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;

use crate::models::{FinalReport, Job};
use crate::storage::{Stores, TargetRepository};

/// Label for targets that no account ever attempted (early stop)
const NOT_ATTEMPTED: &str = "not_attempted";

/// Seconds between job start and completion (or now, while running)
pub fn elapsed_secs(job: &Job) -> u64 {
    let start = job.started_at.unwrap_or(job.created_at);
    let end = job.completed_at.unwrap_or_else(Utc::now);
    (end - start).num_seconds().max(0) as u64
}

/// Assemble the end-of-job report from persisted state
pub fn build_report(
    stores: &Stores,
    job: &Job,
    stop_reason: Option<String>,
) -> Result<FinalReport> {
    let targets = stores.targets.targets_for_job(&job.id)?;

    let mut delivered = Vec::new();
    let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for target in targets {
        if target.sent {
            delivered.push(target.id);
        } else {
            let label = target
                .last_error
                .unwrap_or_else(|| NOT_ATTEMPTED.to_string());
            failures.entry(label).or_default().push(target.id);
        }
    }

    Ok(FinalReport {
        job_id: job.id.clone(),
        status: job.status,
        sent: job.sent_count,
        failed: job.failed_count,
        total: job.total_targets,
        elapsed_secs: elapsed_secs(job),
        delivered,
        failures,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecMode, Target};
    use crate::storage::{JobRepository, Stores};

    #[test]
    fn test_report_groups_failures_by_label() {
        let stores = Stores::in_memory();
        let mut job = Job::new(
            "j",
            ExecMode::Normal,
            "m",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec!["acc1".into()],
        );
        job.sent_count = 1;
        job.failed_count = 2;
        stores.jobs.insert_job(&job).unwrap();

        let mut sent = Target::new(&job.id, "a");
        sent.record_success("acc1");
        let mut banned = Target::new(&job.id, "b");
        banned.record_failure("acc1", "privacy_restricted");
        let mut flooded = Target::new(&job.id, "c");
        flooded.record_failure("acc1", "peer_flood");
        let untouched = Target::new(&job.id, "d");

        stores
            .targets
            .insert_targets(&[sent, banned, flooded, untouched])
            .unwrap();

        let report = build_report(&stores, &job, Some("why".into())).unwrap();
        assert_eq!(report.delivered, vec!["a"]);
        assert_eq!(report.failures["privacy_restricted"], vec!["b"]);
        assert_eq!(report.failures["peer_flood"], vec!["c"]);
        assert_eq!(report.failures["not_attempted"], vec!["d"]);
        assert_eq!(report.stop_reason.as_deref(), Some("why"));
    }

    #[test]
    fn test_elapsed_uses_completion_when_done() {
        let mut job = Job::new("j", ExecMode::Normal, "m", vec![], vec![]);
        job.started_at = Some(Utc::now() - chrono::Duration::seconds(90));
        job.completed_at = Some(job.started_at.unwrap() + chrono::Duration::seconds(30));
        assert_eq!(elapsed_secs(&job), 30);
    }
}
