//! `run` command: create a job from a job file and dispatch it
//!
//! The job file is TOML with fully-resolved targets, accounts, mode and
//! parameters; targets can also come from a plain-text file (one identifier
//! per line). Ctrl-C triggers the engine's two-phase stop and still prints
//! the final report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::client::{ClientLease, FileSessionStore, HttpTransport};
use crate::config::Config;
use crate::dispatch::DispatchEngine;
use crate::health::AccountHealthMonitor;
use crate::models::{Account, ExecMode, FinalReport, Job, Proxy};
use crate::proxy::ProxyPool;
use crate::sender::MessageSender;
use crate::storage::{AccountRepository, ProxyRepository, Stores};

/// Job description as written by the operator
#[derive(Debug, Deserialize)]
struct JobFile {
    name: String,
    mode: String,
    message: String,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    targets_file: Option<PathBuf>,
    accounts: Vec<String>,
    #[serde(default)]
    thread_count: Option<usize>,
    #[serde(default)]
    min_delay_secs: Option<u64>,
    #[serde(default)]
    max_delay_secs: Option<u64>,
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    mutual_ignore_threshold: Option<u32>,
}

pub async fn execute(
    job_path: PathBuf,
    proxies_path: Option<PathBuf>,
    config: Config,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let stores = Stores::sqlite(&config.database.sqlite_path)?;

    if let Some(path) = proxies_path {
        let imported = import_proxies(&stores, &path)?;
        info!(count = imported, "Proxies imported");
    }

    let job = load_job(&job_path, &config)?;
    ensure_accounts(&stores, &job.account_ids)?;

    let engine = build_engine(&stores, &config);
    engine.create_job(&job)?;
    info!(job_id = %job.id, name = %job.name, mode = %job.mode, "Job created");

    let handle = engine.start(&job.id).await?;

    let mut stopped_by_user = false;
    let mut ticks: u32 = 0;
    while !handle.is_finished() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping job");
                stopped_by_user = true;
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                ticks += 1;
                // Progress line roughly every ten seconds
                if ticks % 20 == 0 {
                    if let Ok(progress) = engine.progress(&job.id) {
                        info!(
                            sent = progress.sent,
                            failed = progress.failed,
                            total = progress.total,
                            elapsed_secs = progress.elapsed_secs,
                            "Progress"
                        );
                    }
                }
            }
        }
    }

    let report = if stopped_by_user {
        engine.stop(handle).await?
    } else {
        handle.wait().await;
        engine.final_report(&job.id)?
    };

    print_report(&report);
    Ok(())
}

/// Wire up the engine with its collaborators
pub fn build_engine(stores: &Stores, config: &Config) -> DispatchEngine {
    let transport = Arc::new(HttpTransport::new(&config.gateway.base_url));
    let sessions = Arc::new(FileSessionStore::new(&config.gateway.session_dir));

    let lease = Arc::new(
        ClientLease::new(
            transport,
            sessions,
            ProxyPool::new(stores.proxies.clone()),
            stores.accounts.clone(),
        )
        .with_proxy_timeout(config.proxy_timeout()),
    );

    let health = Arc::new(AccountHealthMonitor::new(
        stores.accounts.clone(),
        lease.clone(),
    ));

    let sender = Arc::new(MessageSender::new(
        lease,
        stores.targets.clone(),
        stores.accounts.clone(),
        stores.log.clone(),
        health.clone(),
        config.dispatch.messages_per_second,
    ));

    DispatchEngine::new(stores.clone(), sender, health)
        .with_grace_period(config.grace_period())
}

fn load_job(path: &Path, config: &Config) -> Result<Job> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    let file: JobFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))?;

    let mode = ExecMode::parse(&file.mode)
        .with_context(|| format!("Unknown mode: {}", file.mode))?;

    let mut targets = file.targets;
    if let Some(list_path) = &file.targets_file {
        let listed = std::fs::read_to_string(list_path)
            .with_context(|| format!("Failed to read target list: {}", list_path.display()))?;
        targets.extend(
            listed
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }
    if targets.is_empty() {
        warn!("Job has no targets; it will complete immediately");
    }

    let mut job = Job::new(file.name, mode, file.message, targets, file.accounts);
    job.thread_count = file
        .thread_count
        .unwrap_or(config.dispatch.default_thread_count);
    job.min_delay_secs = file
        .min_delay_secs
        .unwrap_or(config.dispatch.default_min_delay_secs);
    job.max_delay_secs = file
        .max_delay_secs
        .unwrap_or(config.dispatch.default_max_delay_secs);
    if let Some(threshold) = file.failure_threshold {
        job.failure_threshold = threshold;
    }
    if let Some(threshold) = file.mutual_ignore_threshold {
        job.mutual_ignore_threshold = threshold;
    }
    Ok(job)
}

/// Make sure every account referenced by the job exists in the store
fn ensure_accounts(stores: &Stores, account_ids: &[String]) -> Result<()> {
    for id in account_ids {
        if stores.accounts.get_account(id)?.is_none() {
            stores.accounts.upsert_account(&Account::new(id.clone()))?;
        }
    }
    Ok(())
}

/// Import a proxy list: one endpoint URL per line, `#` comments allowed.
/// The endpoint doubles as the proxy id so re-imports are idempotent.
fn import_proxies(stores: &Stores, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proxy list: {}", path.display()))?;

    let mut imported = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        Url::parse(line).with_context(|| format!("Invalid proxy endpoint: {line}"))?;

        if stores.proxies.get_proxy(line)?.is_none() {
            stores.proxies.upsert_proxy(&Proxy::new(line, line))?;
            imported += 1;
        }
    }
    Ok(imported)
}

fn print_report(report: &FinalReport) {
    println!("Job {} finished: {}", report.job_id, report.status);
    println!(
        "  sent: {}  failed: {}  total: {}  elapsed: {}s",
        report.sent, report.failed, report.total, report.elapsed_secs
    );
    if let Some(reason) = &report.stop_reason {
        println!("  stop reason: {reason}");
    }
    if !report.delivered.is_empty() {
        println!("  delivered: {}", report.delivered.join(", "));
    }
    for (kind, targets) in &report.failures {
        println!("  {kind}: {}", targets.join(", "));
    }
}
