//! In-memory store for tests and ephemeral runs
//!
//! Implements every repository trait over `RwLock`-guarded maps. Behavior
//! mirrors the SQLite store, including the monotonic job-status contract.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::models::{Account, AccountStatus, Job, JobStatus, Proxy, SendRecord, Target};

use super::repository::{
    AccountRepository, JobRepository, ProxyRepository, SendLogRepository, TargetRepository,
};

/// In-memory implementation of the persistence store
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    // Insertion order matters for targets, so keep a Vec per job
    targets: RwLock<HashMap<String, Vec<Target>>>,
    accounts: RwLock<HashMap<String, Account>>,
    proxies: RwLock<HashMap<String, Proxy>>,
    log: RwLock<Vec<SendRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for MemoryStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    fn update_status(&self, id: &str, status: JobStatus) -> Result<Job> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .with_context(|| format!("Job not found: {id}"))?;

        if !job.status.can_transition_to(status) {
            anyhow::bail!(
                "illegal job status transition: {} -> {}",
                job.status,
                status
            );
        }

        job.status = status;
        if status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    fn add_counts(&self, id: &str, sent: u64, failed: u64) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .with_context(|| format!("Job not found: {id}"))?;
        job.sent_count += sent;
        job.failed_count += failed;
        Ok(())
    }
}

impl TargetRepository for MemoryStore {
    fn insert_targets(&self, targets: &[Target]) -> Result<()> {
        let mut map = self.targets.write().unwrap();
        for target in targets {
            let list = map.entry(target.job_id.clone()).or_default();
            match list.iter_mut().find(|t| t.id == target.id) {
                Some(existing) => *existing = target.clone(),
                None => list.push(target.clone()),
            }
        }
        Ok(())
    }

    fn get_target(&self, job_id: &str, id: &str) -> Result<Option<Target>> {
        Ok(self
            .targets
            .read()
            .unwrap()
            .get(job_id)
            .and_then(|list| list.iter().find(|t| t.id == id).cloned()))
    }

    fn targets_for_job(&self, job_id: &str) -> Result<Vec<Target>> {
        Ok(self
            .targets
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_target(&self, target: &Target) -> Result<()> {
        let mut map = self.targets.write().unwrap();
        let list = map
            .get_mut(&target.job_id)
            .with_context(|| format!("No targets for job {}", target.job_id))?;
        let slot = list
            .iter_mut()
            .find(|t| t.id == target.id)
            .with_context(|| format!("Target not found: {}", target.id))?;
        *slot = target.clone();
        Ok(())
    }

    fn record_target_success(&self, job_id: &str, id: &str, account_id: &str) -> Result<()> {
        let mut map = self.targets.write().unwrap();
        let target = map
            .get_mut(job_id)
            .and_then(|list| list.iter_mut().find(|t| t.id == id))
            .with_context(|| format!("Target not found: {id}"))?;
        target.record_success(account_id);
        Ok(())
    }

    fn record_target_failure(
        &self,
        job_id: &str,
        id: &str,
        account_id: &str,
        error_label: &str,
    ) -> Result<()> {
        let mut map = self.targets.write().unwrap();
        let target = map
            .get_mut(job_id)
            .and_then(|list| list.iter_mut().find(|t| t.id == id))
            .with_context(|| format!("Target not found: {id}"))?;
        target.record_failure(account_id, error_label);
        Ok(())
    }
}

impl AccountRepository for MemoryStore {
    fn upsert_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .unwrap()
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.read().unwrap().get(id).cloned())
    }

    fn accounts_by_ids(&self, ids: &[String]) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| accounts.get(id).cloned())
            .collect())
    }

    fn set_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(id)
            .with_context(|| format!("Account not found: {id}"))?;
        account.status = status;
        Ok(())
    }

    fn assign_proxy(&self, id: &str, proxy_id: &str) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(id)
            .with_context(|| format!("Account not found: {id}"))?;
        account.proxy_id = Some(proxy_id.to_string());
        Ok(())
    }

    fn clear_proxy(&self, id: &str) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(id)
            .with_context(|| format!("Account not found: {id}"))?;
        account.proxy_id = None;
        Ok(())
    }

    fn record_delivery(&self, id: &str) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(id)
            .with_context(|| format!("Account not found: {id}"))?;
        if account.needs_daily_reset() {
            account.sent_today = 1;
        } else {
            account.sent_today += 1;
        }
        account.last_used = Some(Utc::now());
        Ok(())
    }
}

impl ProxyRepository for MemoryStore {
    fn upsert_proxy(&self, proxy: &Proxy) -> Result<()> {
        self.proxies
            .write()
            .unwrap()
            .insert(proxy.id.clone(), proxy.clone());
        Ok(())
    }

    fn get_proxy(&self, id: &str) -> Result<Option<Proxy>> {
        Ok(self.proxies.read().unwrap().get(id).cloned())
    }

    fn active_proxies(&self) -> Result<Vec<Proxy>> {
        let mut proxies: Vec<Proxy> = self
            .proxies
            .read()
            .unwrap()
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();
        proxies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(proxies)
    }

    fn save_proxy(&self, proxy: &Proxy) -> Result<()> {
        let mut proxies = self.proxies.write().unwrap();
        let slot = proxies
            .get_mut(&proxy.id)
            .with_context(|| format!("Proxy not found: {}", proxy.id))?;
        *slot = proxy.clone();
        Ok(())
    }
}

impl SendLogRepository for MemoryStore {
    fn append(&self, record: &SendRecord) -> Result<()> {
        self.log.write().unwrap().push(record.clone());
        Ok(())
    }

    fn count_for_job(&self, job_id: &str) -> Result<u64> {
        Ok(self
            .log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .count() as u64)
    }

    fn records_for_job(&self, job_id: &str) -> Result<Vec<SendRecord>> {
        Ok(self
            .log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }
}
