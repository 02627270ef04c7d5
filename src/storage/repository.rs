//! Repository traits and the SQLite persistence store
//!
//! This module provides trait-based repository abstractions to decouple the
//! dispatch engine from storage implementations, enabling:
//! - Easy testing with in-memory implementations
//! - A clear single source of truth: executors re-read persisted records at
//!   loop checkpoints instead of trusting in-process copies
//!
//! The engine's job-status update contract lives here: transitions are
//! validated against the monotonic lifecycle and a terminal status is never
//! left, no matter who asks.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Account, AccountStatus, ExecMode, Job, JobStatus, Proxy, SendRecord, Target,
};

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository for job records
pub trait JobRepository: Send + Sync {
    /// Insert a newly created job
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by id
    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// List all jobs
    fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Transition a job's status, enforcing the monotonic lifecycle.
    ///
    /// Sets `started_at` on the transition into Running and `completed_at`
    /// on the transition into a terminal status. Returns the updated job.
    fn update_status(&self, id: &str, status: JobStatus) -> Result<Job>;

    /// Add to the job's sent/failed counters
    fn add_counts(&self, id: &str, sent: u64, failed: u64) -> Result<()>;
}

/// Repository for target records
pub trait TargetRepository: Send + Sync {
    /// Insert the targets of a new job
    fn insert_targets(&self, targets: &[Target]) -> Result<()>;

    /// Get one target
    fn get_target(&self, job_id: &str, id: &str) -> Result<Option<Target>>;

    /// Get all targets of a job, in insertion order
    fn targets_for_job(&self, job_id: &str) -> Result<Vec<Target>>;

    /// Persist an updated target
    fn save_target(&self, target: &Target) -> Result<()>;

    /// Record a successful delivery on a target.
    ///
    /// The read-modify-write happens under the store's own lock so
    /// concurrent workers bookkeeping the same target cannot lose each
    /// other's updates.
    fn record_target_success(&self, job_id: &str, id: &str, account_id: &str) -> Result<()>;

    /// Record a failed attempt on a target (same atomicity as success)
    fn record_target_failure(
        &self,
        job_id: &str,
        id: &str,
        account_id: &str,
        error_label: &str,
    ) -> Result<()>;
}

/// Repository for account records
pub trait AccountRepository: Send + Sync {
    /// Insert or replace an account
    fn upsert_account(&self, account: &Account) -> Result<()>;

    /// Get an account by id
    fn get_account(&self, id: &str) -> Result<Option<Account>>;

    /// Get the accounts with the given ids (missing ids are skipped)
    fn accounts_by_ids(&self, ids: &[String]) -> Result<Vec<Account>>;

    /// Set an account's health status
    fn set_status(&self, id: &str, status: AccountStatus) -> Result<()>;

    /// Assign a proxy to an account
    fn assign_proxy(&self, id: &str, proxy_id: &str) -> Result<()>;

    /// Clear an account's proxy assignment
    fn clear_proxy(&self, id: &str) -> Result<()>;

    /// Count a successful delivery: bumps the daily counter (resetting it
    /// when the last use predates the current UTC day) and stamps
    /// `last_used`
    fn record_delivery(&self, id: &str) -> Result<()>;
}

/// Repository for proxy records
pub trait ProxyRepository: Send + Sync {
    /// Insert or replace a proxy
    fn upsert_proxy(&self, proxy: &Proxy) -> Result<()>;

    /// Get a proxy by id
    fn get_proxy(&self, id: &str) -> Result<Option<Proxy>>;

    /// Get all proxies that are currently active
    fn active_proxies(&self) -> Result<Vec<Proxy>>;

    /// Persist updated proxy counters/flag
    fn save_proxy(&self, proxy: &Proxy) -> Result<()>;
}

/// Repository for the append-only attempt log
pub trait SendLogRepository: Send + Sync {
    /// Append one attempt record
    fn append(&self, record: &SendRecord) -> Result<()>;

    /// Count attempts recorded for a job
    fn count_for_job(&self, job_id: &str) -> Result<u64>;

    /// All attempt records for a job, oldest first
    fn records_for_job(&self, job_id: &str) -> Result<Vec<SendRecord>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed store implementing every repository trait
///
/// Uses a `Mutex` around the connection for thread-safety; individual
/// statements are short so contention stays negligible at dispatch rates.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    message TEXT NOT NULL,
                    target_ids TEXT NOT NULL,
                    account_ids TEXT NOT NULL,
                    thread_count INTEGER NOT NULL,
                    min_delay_secs INTEGER NOT NULL,
                    max_delay_secs INTEGER NOT NULL,
                    failure_threshold INTEGER NOT NULL,
                    mutual_ignore_threshold INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    sent_count INTEGER NOT NULL DEFAULT 0,
                    failed_count INTEGER NOT NULL DEFAULT 0,
                    total_targets INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS targets (
                    job_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    sent INTEGER NOT NULL DEFAULT 0,
                    sent_at TEXT,
                    failed_accounts TEXT NOT NULL DEFAULT '[]',
                    last_error TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    last_account_id TEXT,
                    PRIMARY KEY (job_id, id)
                );

                CREATE INDEX IF NOT EXISTS idx_targets_job
                    ON targets(job_id, seq);

                CREATE TABLE IF NOT EXISTS accounts (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL DEFAULT 'active',
                    proxy_id TEXT,
                    sent_today INTEGER NOT NULL DEFAULT 0,
                    daily_limit INTEGER NOT NULL DEFAULT 50,
                    last_used TEXT
                );

                CREATE TABLE IF NOT EXISTS proxies (
                    id TEXT PRIMARY KEY,
                    endpoint TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    failure_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS send_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL,
                    account_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    error_label TEXT,
                    at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_send_log_job
                    ON send_log(job_id);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
        let mode: String = row.get("mode")?;
        let status: String = row.get("status")?;
        let target_ids: String = row.get("target_ids")?;
        let account_ids: String = row.get("account_ids")?;
        Ok(Job {
            id: row.get("id")?,
            name: row.get("name")?,
            mode: ExecMode::parse(&mode).unwrap_or(ExecMode::Normal),
            message: row.get("message")?,
            target_ids: serde_json::from_str(&target_ids).unwrap_or_default(),
            account_ids: serde_json::from_str(&account_ids).unwrap_or_default(),
            thread_count: row.get::<_, i64>("thread_count")? as usize,
            min_delay_secs: row.get::<_, i64>("min_delay_secs")? as u64,
            max_delay_secs: row.get::<_, i64>("max_delay_secs")? as u64,
            failure_threshold: row.get::<_, i64>("failure_threshold")? as u32,
            mutual_ignore_threshold: row.get::<_, i64>("mutual_ignore_threshold")? as u32,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
            sent_count: row.get::<_, i64>("sent_count")? as u64,
            failed_count: row.get::<_, i64>("failed_count")? as u64,
            total_targets: row.get::<_, i64>("total_targets")? as u64,
            created_at: parse_ts(row.get::<_, String>("created_at")?),
            started_at: row
                .get::<_, Option<String>>("started_at")?
                .map(parse_ts),
            completed_at: row
                .get::<_, Option<String>>("completed_at")?
                .map(parse_ts),
        })
    }

    fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<Target> {
        let failed_accounts: String = row.get("failed_accounts")?;
        Ok(Target {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            sent: row.get::<_, i64>("sent")? != 0,
            sent_at: row.get::<_, Option<String>>("sent_at")?.map(parse_ts),
            failed_accounts: serde_json::from_str(&failed_accounts).unwrap_or_default(),
            last_error: row.get("last_error")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            last_account_id: row.get("last_account_id")?,
        })
    }

    fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
        let status: String = row.get("status")?;
        Ok(Account {
            id: row.get("id")?,
            status: AccountStatus::parse(&status).unwrap_or(AccountStatus::Inactive),
            proxy_id: row.get("proxy_id")?,
            sent_today: row.get::<_, i64>("sent_today")? as u32,
            daily_limit: row.get::<_, i64>("daily_limit")? as u32,
            last_used: row.get::<_, Option<String>>("last_used")?.map(parse_ts),
        })
    }

    fn row_to_proxy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proxy> {
        Ok(Proxy {
            id: row.get("id")?,
            endpoint: row.get("endpoint")?,
            active: row.get::<_, i64>("active")? != 0,
            success_count: row.get::<_, i64>("success_count")? as u32,
            failure_count: row.get::<_, i64>("failure_count")? as u32,
        })
    }
}

/// Parse an RFC 3339 timestamp, falling back to the epoch on garbage
fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl JobRepository for SqliteStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
                INSERT INTO jobs (
                    id, name, mode, message, target_ids, account_ids,
                    thread_count, min_delay_secs, max_delay_secs,
                    failure_threshold, mutual_ignore_threshold, status,
                    sent_count, failed_count, total_targets,
                    created_at, started_at, completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                "#,
            params![
                job.id,
                job.name,
                job.mode.as_str(),
                job.message,
                serde_json::to_string(&job.target_ids)?,
                serde_json::to_string(&job.account_ids)?,
                job.thread_count as i64,
                job.min_delay_secs as i64,
                job.max_delay_secs as i64,
                job.failure_threshold as i64,
                job.mutual_ignore_threshold as i64,
                job.status.as_str(),
                job.sent_count as i64,
                job.failed_count as i64,
                job.total_targets as i64,
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to insert job")?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            Self::row_to_job,
        )
        .optional()
        .context("Failed to load job")
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at")?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list jobs")?;
        Ok(jobs)
    }

    fn update_status(&self, id: &str, status: JobStatus) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        let current = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                Self::row_to_job,
            )
            .optional()?
            .with_context(|| format!("Job not found: {id}"))?;

        if !current.status.can_transition_to(status) {
            anyhow::bail!(
                "illegal job status transition: {} -> {}",
                current.status,
                status
            );
        }

        let now = Utc::now().to_rfc3339();
        let set_started = status == JobStatus::Running && current.started_at.is_none();
        let set_completed = status.is_terminal() && current.completed_at.is_none();

        conn.execute(
            r#"
                UPDATE jobs SET
                    status = ?2,
                    started_at = CASE WHEN ?3 THEN ?4 ELSE started_at END,
                    completed_at = CASE WHEN ?5 THEN ?4 ELSE completed_at END
                WHERE id = ?1
                "#,
            params![id, status.as_str(), set_started, now, set_completed],
        )
        .context("Failed to update job status")?;

        conn.query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            Self::row_to_job,
        )
        .context("Failed to reload job")
    }

    fn add_counts(&self, id: &str, sent: u64, failed: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET sent_count = sent_count + ?2, failed_count = failed_count + ?3 WHERE id = ?1",
            params![id, sent as i64, failed as i64],
        )
        .context("Failed to update job counters")?;
        Ok(())
    }
}

impl TargetRepository for SqliteStore {
    fn insert_targets(&self, targets: &[Target]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (seq, target) in targets.iter().enumerate() {
            tx.execute(
                r#"
                    INSERT OR REPLACE INTO targets (
                        job_id, id, seq, sent, sent_at, failed_accounts,
                        last_error, retry_count, last_account_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                params![
                    target.job_id,
                    target.id,
                    seq as i64,
                    target.sent,
                    target.sent_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&target.failed_accounts)?,
                    target.last_error,
                    target.retry_count as i64,
                    target.last_account_id,
                ],
            )?;
        }
        tx.commit().context("Failed to insert targets")?;
        Ok(())
    }

    fn get_target(&self, job_id: &str, id: &str) -> Result<Option<Target>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM targets WHERE job_id = ?1 AND id = ?2",
            params![job_id, id],
            Self::row_to_target,
        )
        .optional()
        .context("Failed to load target")
    }

    fn targets_for_job(&self, job_id: &str) -> Result<Vec<Target>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM targets WHERE job_id = ?1 ORDER BY seq")?;
        let targets = stmt
            .query_map(params![job_id], Self::row_to_target)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list targets")?;
        Ok(targets)
    }

    fn save_target(&self, target: &Target) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
                UPDATE targets SET
                    sent = ?3,
                    sent_at = ?4,
                    failed_accounts = ?5,
                    last_error = ?6,
                    retry_count = ?7,
                    last_account_id = ?8
                WHERE job_id = ?1 AND id = ?2
                "#,
            params![
                target.job_id,
                target.id,
                target.sent,
                target.sent_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&target.failed_accounts)?,
                target.last_error,
                target.retry_count as i64,
                target.last_account_id,
            ],
        )
        .context("Failed to save target")?;
        Ok(())
    }

    fn record_target_success(&self, job_id: &str, id: &str, account_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut target = conn
            .query_row(
                "SELECT * FROM targets WHERE job_id = ?1 AND id = ?2",
                params![job_id, id],
                Self::row_to_target,
            )
            .optional()?
            .with_context(|| format!("Target not found: {id}"))?;

        target.record_success(account_id);
        conn.execute(
            "UPDATE targets SET sent = 1, sent_at = ?3, last_account_id = ?4 WHERE job_id = ?1 AND id = ?2",
            params![
                job_id,
                id,
                target.sent_at.map(|t| t.to_rfc3339()),
                account_id,
            ],
        )
        .context("Failed to record target success")?;
        Ok(())
    }

    fn record_target_failure(
        &self,
        job_id: &str,
        id: &str,
        account_id: &str,
        error_label: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut target = conn
            .query_row(
                "SELECT * FROM targets WHERE job_id = ?1 AND id = ?2",
                params![job_id, id],
                Self::row_to_target,
            )
            .optional()?
            .with_context(|| format!("Target not found: {id}"))?;

        target.record_failure(account_id, error_label);
        conn.execute(
            r#"
                UPDATE targets SET
                    failed_accounts = ?3,
                    last_error = ?4,
                    retry_count = ?5,
                    last_account_id = ?6
                WHERE job_id = ?1 AND id = ?2
                "#,
            params![
                job_id,
                id,
                serde_json::to_string(&target.failed_accounts)?,
                target.last_error,
                target.retry_count as i64,
                target.last_account_id,
            ],
        )
        .context("Failed to record target failure")?;
        Ok(())
    }
}

impl AccountRepository for SqliteStore {
    fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
                INSERT OR REPLACE INTO accounts (
                    id, status, proxy_id, sent_today, daily_limit, last_used
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            params![
                account.id,
                account.status.as_str(),
                account.proxy_id,
                account.sent_today as i64,
                account.daily_limit as i64,
                account.last_used.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to upsert account")?;
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM accounts WHERE id = ?1",
            params![id],
            Self::row_to_account,
        )
        .optional()
        .context("Failed to load account")
    }

    fn accounts_by_ids(&self, ids: &[String]) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = conn
                .query_row(
                    "SELECT * FROM accounts WHERE id = ?1",
                    params![id],
                    Self::row_to_account,
                )
                .optional()?
            {
                out.push(account);
            }
        }
        Ok(out)
    }

    fn set_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )
        .context("Failed to set account status")?;
        Ok(())
    }

    fn assign_proxy(&self, id: &str, proxy_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET proxy_id = ?2 WHERE id = ?1",
            params![id, proxy_id],
        )
        .context("Failed to assign proxy")?;
        Ok(())
    }

    fn clear_proxy(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET proxy_id = NULL WHERE id = ?1",
            params![id],
        )
        .context("Failed to clear proxy")?;
        Ok(())
    }

    fn record_delivery(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE id = ?1",
                params![id],
                Self::row_to_account,
            )
            .optional()?
            .with_context(|| format!("Account not found: {id}"))?;

        let sent_today = if account.needs_daily_reset() {
            1
        } else {
            account.sent_today + 1
        };

        conn.execute(
            "UPDATE accounts SET sent_today = ?2, last_used = ?3 WHERE id = ?1",
            params![id, sent_today as i64, Utc::now().to_rfc3339()],
        )
        .context("Failed to record delivery")?;
        Ok(())
    }
}

impl ProxyRepository for SqliteStore {
    fn upsert_proxy(&self, proxy: &Proxy) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
                INSERT OR REPLACE INTO proxies (
                    id, endpoint, active, success_count, failure_count
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            params![
                proxy.id,
                proxy.endpoint,
                proxy.active,
                proxy.success_count as i64,
                proxy.failure_count as i64,
            ],
        )
        .context("Failed to upsert proxy")?;
        Ok(())
    }

    fn get_proxy(&self, id: &str) -> Result<Option<Proxy>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM proxies WHERE id = ?1",
            params![id],
            Self::row_to_proxy,
        )
        .optional()
        .context("Failed to load proxy")
    }

    fn active_proxies(&self) -> Result<Vec<Proxy>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM proxies WHERE active = 1 ORDER BY id")?;
        let proxies = stmt
            .query_map([], Self::row_to_proxy)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list proxies")?;
        Ok(proxies)
    }

    fn save_proxy(&self, proxy: &Proxy) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proxies SET active = ?2, success_count = ?3, failure_count = ?4 WHERE id = ?1",
            params![
                proxy.id,
                proxy.active,
                proxy.success_count as i64,
                proxy.failure_count as i64,
            ],
        )
        .context("Failed to save proxy")?;
        Ok(())
    }
}

impl SendLogRepository for SqliteStore {
    fn append(&self, record: &SendRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
                INSERT INTO send_log (job_id, account_id, target_id, success, error_label, at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            params![
                record.job_id,
                record.account_id,
                record.target_id,
                record.success,
                record.error_label,
                record.at.to_rfc3339(),
            ],
        )
        .context("Failed to append send log")?;
        Ok(())
    }

    fn count_for_job(&self, job_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM send_log WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn records_for_job(&self, job_id: &str) -> Result<Vec<SendRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM send_log WHERE job_id = ?1 ORDER BY id")?;
        let records = stmt
            .query_map(params![job_id], |row| {
                Ok(SendRecord {
                    job_id: row.get("job_id")?,
                    account_id: row.get("account_id")?,
                    target_id: row.get("target_id")?,
                    success: row.get::<_, i64>("success")? != 0,
                    error_label: row.get("error_label")?,
                    at: parse_ts(row.get::<_, String>("at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list send log")?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            "test",
            ExecMode::Normal,
            "hello",
            vec!["alice".into(), "bob".into()],
            vec!["acc1".into()],
        )
    }

    #[test]
    fn test_job_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();
        store.insert_job(&job).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.name, "test");
        assert_eq!(loaded.mode, ExecMode::Normal);
        assert_eq!(loaded.target_ids, vec!["alice", "bob"]);
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[test]
    fn test_job_status_transition_enforced() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();
        store.insert_job(&job).unwrap();

        let updated = store.update_status(&job.id, JobStatus::Running).unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert!(updated.started_at.is_some());

        let updated = store.update_status(&job.id, JobStatus::Completed).unwrap();
        assert!(updated.completed_at.is_some());

        // Terminal status is never left
        assert!(store.update_status(&job.id, JobStatus::Running).is_err());
        assert!(store.update_status(&job.id, JobStatus::Pending).is_err());
    }

    #[test]
    fn test_job_counters() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();
        store.insert_job(&job).unwrap();

        store.add_counts(&job.id, 2, 1).unwrap();
        store.add_counts(&job.id, 1, 0).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.sent_count, 3);
        assert_eq!(loaded.failed_count, 1);
    }

    #[test]
    fn test_target_roundtrip_preserves_order() {
        let store = SqliteStore::in_memory().unwrap();
        let targets: Vec<Target> = ["c", "a", "b"]
            .iter()
            .map(|id| Target::new("job1", *id))
            .collect();
        store.insert_targets(&targets).unwrap();

        let loaded = store.targets_for_job("job1").unwrap();
        let ids: Vec<&str> = loaded.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_target_save() {
        let store = SqliteStore::in_memory().unwrap();
        let mut target = Target::new("job1", "alice");
        store.insert_targets(std::slice::from_ref(&target)).unwrap();

        target.record_failure("acc1", "peer_flood");
        store.save_target(&target).unwrap();

        let loaded = store.get_target("job1", "alice").unwrap().unwrap();
        assert_eq!(loaded.failed_accounts, vec!["acc1"]);
        assert_eq!(loaded.last_error.as_deref(), Some("peer_flood"));
        assert_eq!(loaded.retry_count, 1);
    }

    #[test]
    fn test_target_atomic_records() {
        let store = SqliteStore::in_memory().unwrap();
        let target = Target::new("job1", "alice");
        store.insert_targets(std::slice::from_ref(&target)).unwrap();

        store
            .record_target_failure("job1", "alice", "acc1", "peer_flood")
            .unwrap();
        store
            .record_target_success("job1", "alice", "acc2")
            .unwrap();

        let loaded = store.get_target("job1", "alice").unwrap().unwrap();
        assert!(loaded.sent);
        assert!(loaded.sent_at.is_some());
        // The earlier failure survives the success record
        assert_eq!(loaded.failed_accounts, vec!["acc1"]);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_account_id.as_deref(), Some("acc2"));
    }

    #[test]
    fn test_account_delivery_counter() {
        let store = SqliteStore::in_memory().unwrap();
        let account = Account::new("acc1");
        store.upsert_account(&account).unwrap();

        store.record_delivery("acc1").unwrap();
        store.record_delivery("acc1").unwrap();

        let loaded = store.get_account("acc1").unwrap().unwrap();
        assert_eq!(loaded.sent_today, 2);
        assert!(loaded.last_used.is_some());
    }

    #[test]
    fn test_account_daily_reset_on_new_day() {
        let store = SqliteStore::in_memory().unwrap();
        let mut account = Account::new("acc1");
        account.sent_today = 49;
        account.last_used = Some(Utc::now() - chrono::Duration::days(2));
        store.upsert_account(&account).unwrap();

        store.record_delivery("acc1").unwrap();

        let loaded = store.get_account("acc1").unwrap().unwrap();
        assert_eq!(loaded.sent_today, 1);
    }

    #[test]
    fn test_account_proxy_assignment() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_account(&Account::new("acc1")).unwrap();

        store.assign_proxy("acc1", "p1").unwrap();
        assert_eq!(
            store.get_account("acc1").unwrap().unwrap().proxy_id.as_deref(),
            Some("p1")
        );

        store.clear_proxy("acc1").unwrap();
        assert!(store.get_account("acc1").unwrap().unwrap().proxy_id.is_none());
    }

    #[test]
    fn test_active_proxies_excludes_disabled() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_proxy(&Proxy::new("p1", "socks5://a:1080"))
            .unwrap();
        let mut dead = Proxy::new("p2", "socks5://b:1080");
        dead.active = false;
        store.upsert_proxy(&dead).unwrap();

        let active = store.active_proxies().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "p1");
    }

    #[test]
    fn test_send_log_counting() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .append(&SendRecord::success("j1", "acc1", "alice"))
            .unwrap();
        store
            .append(&SendRecord::failure("j1", "acc2", "bob", "peer_flood"))
            .unwrap();
        store
            .append(&SendRecord::success("j2", "acc1", "carol"))
            .unwrap();

        assert_eq!(store.count_for_job("j1").unwrap(), 2);
        let records = store.records_for_job("j1").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert_eq!(records[1].error_label.as_deref(), Some("peer_flood"));
    }
}
