//! Integration tests for the dispatch engine and mode executors
//!
//! These run whole jobs over in-memory stores and a scriptable transport,
//! covering delivery invariants per mode, account retirement, cancellation
//! bounds and degenerate pools.

mod common;

use std::time::{Duration, Instant};

use common::{harness, make_job, seed_accounts, Scripted};
use volley::models::{AccountStatus, ExecMode, JobStatus};
use volley::storage::{AccountRepository, JobRepository, SendLogRepository, TargetRepository};

// ============================================================================
// Normal mode
// ============================================================================

#[tokio::test]
async fn test_normal_rotates_to_next_account_on_privacy_failure() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // acc1 is rejected by target a's privacy settings but delivers to b, c
    h.transport.script("acc1", "a", Scripted::Privacy);

    let job = make_job(ExecMode::Normal, &["a", "b", "c"], &["acc1", "acc2"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    // Target a: acc1 failed, acc2 stepped in
    let a = h.stores.targets.get_target(&job.id, "a").unwrap().unwrap();
    assert!(a.sent);
    assert_eq!(a.failed_accounts, vec!["acc1"]);
    assert_eq!(a.last_account_id.as_deref(), Some("acc2"));

    // b and c went out on the first account
    for id in ["b", "c"] {
        let t = h.stores.targets.get_target(&job.id, id).unwrap().unwrap();
        assert!(t.sent);
        assert_eq!(t.last_account_id.as_deref(), Some("acc1"));
    }

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.sent_count, 3);
    assert_eq!(finished.failed_count, 0);
}

#[tokio::test]
async fn test_normal_target_ends_sent_xor_exhausted() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // Target "stubborn" rejects everyone
    h.transport.script("acc1", "stubborn", Scripted::Privacy);
    h.transport.script("acc2", "stubborn", Scripted::Privacy);

    let job = make_job(ExecMode::Normal, &["stubborn", "easy"], &["acc1", "acc2"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let stubborn = h
        .stores
        .targets
        .get_target(&job.id, "stubborn")
        .unwrap()
        .unwrap();
    assert!(!stubborn.sent);
    // Exhausted exactly the eligible account set
    assert_eq!(stubborn.failed_accounts.len(), 2);

    let easy = h.stores.targets.get_target(&job.id, "easy").unwrap().unwrap();
    assert!(easy.sent);

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.sent_count, 1);
    assert_eq!(finished.failed_count, 1);

    let report = h.engine.final_report(&job.id).unwrap();
    assert_eq!(report.delivered, vec!["easy"]);
    assert_eq!(report.failures["privacy_restricted"], vec!["stubborn"]);
}

#[tokio::test]
async fn test_normal_corrupt_session_retires_account() {
    let h = harness();
    seed_accounts(&h, &["corrupt-1", "acc2"]);

    let job = make_job(ExecMode::Normal, &["a"], &["corrupt-1", "acc2"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    // The corrupt account was retired without stalling the pool
    let retired = h.stores.accounts.get_account("corrupt-1").unwrap().unwrap();
    assert_eq!(retired.status, AccountStatus::Inactive);

    let a = h.stores.targets.get_target(&job.id, "a").unwrap().unwrap();
    assert!(a.sent);
    assert_eq!(a.last_account_id.as_deref(), Some("acc2"));
    assert!(a.failed_accounts.contains(&"corrupt-1".to_string()));
}

#[tokio::test]
async fn test_normal_blocked_account_banned_and_skipped() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // The network bans acc1 on its first send
    h.transport.script("acc1", "a", Scripted::Blocked);

    let job = make_job(ExecMode::Normal, &["a", "b"], &["acc1", "acc2"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let banned = h.stores.accounts.get_account("acc1").unwrap().unwrap();
    assert_eq!(banned.status, AccountStatus::Banned);

    // acc1 never selected again: both targets delivered by acc2,
    // and acc1 shows up exactly once in the attempt order
    let attempts = h.transport.attempts();
    assert_eq!(
        attempts.iter().filter(|(acc, _)| acc == "acc1").count(),
        1
    );
    let b = h.stores.targets.get_target(&job.id, "b").unwrap().unwrap();
    assert_eq!(b.last_account_id.as_deref(), Some("acc2"));
}

// ============================================================================
// RepeatSend mode
// ============================================================================

#[tokio::test]
async fn test_repeat_sends_accounts_times_targets_exactly() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    let mut job = make_job(ExecMode::RepeatSend, &["a", "b", "c"], &["acc1", "acc2"]);
    job.thread_count = 2;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    // 2 accounts x 3 targets = 6 attempts, no early exit on success
    assert_eq!(h.transport.attempt_count(), 6);
    assert_eq!(h.stores.log.count_for_job(&job.id).unwrap(), 6);

    // Every target got exactly one send per account
    let attempts = h.transport.attempts();
    for target in ["a", "b", "c"] {
        for account in ["acc1", "acc2"] {
            assert_eq!(
                attempts
                    .iter()
                    .filter(|(acc, t)| acc == account && t == target)
                    .count(),
                1,
                "{account} should hit {target} exactly once"
            );
        }
    }

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.sent_count, 6);
}

#[tokio::test]
async fn test_repeat_attempt_count_unchanged_by_failures() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // acc1 fails every target; the totals must not change
    h.transport
        .script_all("acc1", &["a", "b", "c"], Scripted::Privacy);

    let mut job = make_job(ExecMode::RepeatSend, &["a", "b", "c"], &["acc1", "acc2"]);
    job.thread_count = 2;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    assert_eq!(h.transport.attempt_count(), 6);

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.sent_count, 3);
    assert_eq!(finished.failed_count, 3);
}

#[tokio::test]
async fn test_repeat_groups_run_sequentially() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // thread_count 1 puts each account in its own group
    let mut job = make_job(ExecMode::RepeatSend, &["a", "b"], &["acc1", "acc2"]);
    job.thread_count = 1;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let attempts = h.transport.attempts();
    assert_eq!(attempts.len(), 4);
    // First group finished all its sends before the second started
    assert!(attempts[..2].iter().all(|(acc, _)| acc == "acc1"));
    assert!(attempts[2..].iter().all(|(acc, _)| acc == "acc2"));
}

// ============================================================================
// ForceSend mode
// ============================================================================

#[tokio::test]
async fn test_force_streak_marks_account_limited() {
    let h = harness();
    seed_accounts(&h, &["accx"]);

    h.transport
        .script_all("accx", &["t1", "t2", "t3", "t4"], Scripted::Privacy);

    let mut job = make_job(ExecMode::ForceSend, &["t1", "t2", "t3", "t4"], &["accx"]);
    job.failure_threshold = 3;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    // Rotated out after the third consecutive failure, t4 never attempted
    assert_eq!(h.transport.attempt_count(), 3);
    let account = h.stores.accounts.get_account("accx").unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Limited);
}

#[tokio::test]
async fn test_force_success_resets_streak() {
    let h = harness();
    seed_accounts(&h, &["accx"]);

    // fail, success, fail, success: streak never reaches 2
    h.transport.script("accx", "t1", Scripted::Privacy);
    h.transport.script("accx", "t3", Scripted::Privacy);

    let mut job = make_job(ExecMode::ForceSend, &["t1", "t2", "t3", "t4"], &["accx"]);
    job.failure_threshold = 2;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let account = h.stores.accounts.get_account("accx").unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Active);

    // t2 and t4 delivered, t1 and t3 exhausted for this account
    assert_eq!(h.transport.attempt_count(), 4);
    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.sent_count, 2);
    assert_eq!(finished.failed_count, 2);
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_force_prefers_untouched_targets() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);

    // acc1 fails t1 then gets rotated; acc2 must go to untouched t2
    // before coming back for t1
    h.transport.script("acc1", "t1", Scripted::Privacy);

    let mut job = make_job(ExecMode::ForceSend, &["t1", "t2"], &["acc1", "acc2"]);
    job.failure_threshold = 1;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let attempts = h.transport.attempts();
    assert_eq!(attempts[0], ("acc1".into(), "t1".into()));
    // Fresh target first
    assert_eq!(attempts[1], ("acc2".into(), "t2".into()));
    // Then the target only other accounts had tried
    assert_eq!(attempts[2], ("acc2".into(), "t1".into()));

    let t1 = h.stores.targets.get_target(&job.id, "t1").unwrap().unwrap();
    assert!(t1.sent);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_stop_interrupts_long_sleep_within_bound() {
    let h = harness();
    seed_accounts(&h, &["acc1"]);

    // Minutes of inter-send delay; the stop must not wait them out
    let mut job = make_job(ExecMode::Normal, &["a", "b", "c"], &["acc1"]);
    job.min_delay_secs = 120;
    job.max_delay_secs = 180;
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();

    // Let the first attempt land, then stop mid-sleep
    tokio::time::sleep(Duration::from_millis(300)).await;
    let attempts_at_stop = h.transport.attempt_count();

    let started = Instant::now();
    let report = h.engine.stop(handle).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop took {:?}",
        started.elapsed()
    );

    assert_eq!(report.status, JobStatus::Stopped);
    // No new attempts after the signal was observed
    assert_eq!(h.transport.attempt_count(), attempts_at_stop);

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Stopped);
    assert!(finished.completed_at.is_some());
}

#[tokio::test]
async fn test_stop_after_completion_reports_completed() {
    let h = harness();
    seed_accounts(&h, &["acc1"]);

    let job = make_job(ExecMode::Normal, &["a"], &["acc1"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    // Give the single send plenty of time to finish
    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = h.engine.stop(handle).await.unwrap();
    // A job that already completed keeps its terminal status
    assert_eq!(report.status, JobStatus::Completed);
}

// ============================================================================
// Degenerate pools
// ============================================================================

#[tokio::test]
async fn test_zero_active_accounts_stops_immediately() {
    let h = harness();
    seed_accounts(&h, &["acc1", "acc2"]);
    h.stores
        .accounts
        .set_status("acc1", AccountStatus::Limited)
        .unwrap();
    h.stores
        .accounts
        .set_status("acc2", AccountStatus::Banned)
        .unwrap();

    let job = make_job(ExecMode::Normal, &["a", "b"], &["acc1", "acc2"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    assert_eq!(h.transport.attempt_count(), 0);

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Stopped);

    let report = h.engine.final_report(&job.id).unwrap();
    let reason = report.stop_reason.unwrap();
    assert!(reason.contains("acc1=limited"));
    assert!(reason.contains("acc2=banned"));
}

#[tokio::test]
async fn test_empty_target_list_completes_with_zero_attempts() {
    let h = harness();
    seed_accounts(&h, &["acc1"]);

    let job = make_job(ExecMode::Normal, &[], &["acc1"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    assert_eq!(h.transport.attempt_count(), 0);
    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_empty_account_list_completes_with_zero_attempts() {
    let h = harness();

    let job = make_job(ExecMode::RepeatSend, &["a"], &[]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    assert_eq!(h.transport.attempt_count(), 0);
    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_mid_job_disqualification_stops_job() {
    let h = harness();
    seed_accounts(&h, &["acc1"]);

    // Sole account gets banned on the first target; with nobody left the
    // job must stop rather than grind through the rest
    h.transport.script("acc1", "a", Scripted::Blocked);

    let job = make_job(ExecMode::Normal, &["a", "b", "c"], &["acc1"]);
    h.engine.create_job(&job).unwrap();

    let handle = h.engine.start(&job.id).await.unwrap();
    handle.wait().await;

    let finished = h.stores.jobs.get_job(&job.id).unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Stopped);
    assert_eq!(h.transport.attempt_count(), 1);
}
