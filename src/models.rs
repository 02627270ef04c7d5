// Core data structures for the volley dispatch engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Execution mode of a dispatch job
///
/// Governs attempt ordering and account rotation policy:
/// - `Normal` walks the target list once, rotating accounts per target
///   until one delivers.
/// - `RepeatSend` has every account deliver to every target exactly once,
///   regardless of what other accounts achieved.
/// - `ForceSend` drains one account at a time, preferring untouched
///   targets, and rotates on a consecutive-failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Normal,
    RepeatSend,
    ForceSend,
}

impl ExecMode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::RepeatSend => "repeat_send",
            Self::ForceSend => "force_send",
        }
    }

    /// Create from string (accepts a few common aliases)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "repeat_send" | "repeat" => Some(Self::RepeatSend),
            "force_send" | "force" => Some(Self::ForceSend),
            _ => None,
        }
    }

    /// Get all modes
    pub fn all() -> Vec<Self> {
        vec![Self::Normal, Self::RepeatSend, Self::ForceSend]
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a dispatch job
///
/// Transitions are monotonic: `Pending → Running → Stopping →
/// {Completed, Stopped, Failed}`. Terminal states are never left; the
/// persistence layer rejects any transition that would violate this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Stopping,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Check whether a transition to `next` is allowed
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Completed | Self::Stopped | Self::Failed
            ),
            Self::Running => matches!(
                next,
                Self::Stopping | Self::Completed | Self::Stopped | Self::Failed
            ),
            Self::Stopping => matches!(next, Self::Completed | Self::Stopped | Self::Failed),
            Self::Completed | Self::Stopped | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health status of a sender account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Account is usable for new attempts
    Active,
    /// Account is rate-restricted by the network
    Limited,
    /// Account is permanently banned by the network
    Banned,
    /// Account's session is unusable (corrupt or revoked)
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Limited => "limited",
            Self::Banned => "banned",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "limited" => Some(Self::Limited),
            "banned" => Some(Self::Banned),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bulk-dispatch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id
    pub id: String,

    /// Human-readable job name
    pub name: String,

    /// Execution mode
    pub mode: ExecMode,

    /// Message body handed to the transport verbatim
    pub message: String,

    /// Ordered target identifiers
    pub target_ids: Vec<String>,

    /// Account identifiers assigned to this job
    pub account_ids: Vec<String>,

    /// Fan-out of concurrently in-flight account workers
    pub thread_count: usize,

    /// Minimum inter-send delay in seconds
    pub min_delay_secs: u64,

    /// Maximum inter-send delay in seconds
    pub max_delay_secs: u64,

    /// Consecutive-failure streak that rotates an account (ForceSend)
    pub failure_threshold: u32,

    /// Retries granted to a pair before a mutual-contact requirement
    /// becomes a failure
    pub mutual_ignore_threshold: u32,

    /// Lifecycle status
    pub status: JobStatus,

    /// Successful deliveries so far
    pub sent_count: u64,

    /// Failed attempts so far
    pub failed_count: u64,

    /// Total number of targets
    pub total_targets: u64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job with fresh counters
    pub fn new(
        name: impl Into<String>,
        mode: ExecMode,
        message: impl Into<String>,
        target_ids: Vec<String>,
        account_ids: Vec<String>,
    ) -> Self {
        let total = target_ids.len() as u64;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            mode,
            message: message.into(),
            target_ids,
            account_ids,
            thread_count: 1,
            min_delay_secs: 2,
            max_delay_secs: 6,
            failure_threshold: 30,
            mutual_ignore_threshold: 1,
            status: JobStatus::Pending,
            sent_count: 0,
            failed_count: 0,
            total_targets: total,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// One message recipient within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Recipient identifier (also the primary key within the job)
    pub id: String,

    /// Owning job id
    pub job_id: String,

    /// Whether a delivery succeeded
    pub sent: bool,

    /// When the delivery succeeded
    pub sent_at: Option<DateTime<Utc>>,

    /// Accounts that already failed against this target
    pub failed_accounts: Vec<String>,

    /// Label of the last classified error
    pub last_error: Option<String>,

    /// Number of failed attempts so far
    pub retry_count: u32,

    /// Account used for the most recent attempt
    pub last_account_id: Option<String>,
}

impl Target {
    pub fn new(job_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            sent: false,
            sent_at: None,
            failed_accounts: Vec::new(),
            last_error: None,
            retry_count: 0,
            last_account_id: None,
        }
    }

    /// Check whether this target was ever attempted by any account
    pub fn is_untouched(&self) -> bool {
        !self.sent && self.last_account_id.is_none()
    }

    /// Check whether the given account already failed against this target
    pub fn has_failed_account(&self, account_id: &str) -> bool {
        self.failed_accounts.iter().any(|a| a == account_id)
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, account_id: &str, error_label: &str) {
        if !self.has_failed_account(account_id) {
            self.failed_accounts.push(account_id.to_string());
        }
        self.last_error = Some(error_label.to_string());
        self.retry_count += 1;
        self.last_account_id = Some(account_id.to_string());
    }

    /// Record a successful delivery
    pub fn record_success(&mut self, account_id: &str) {
        self.sent = true;
        self.sent_at = Some(Utc::now());
        self.last_account_id = Some(account_id.to_string());
    }
}

/// One sender identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier (matches the session catalog key)
    pub id: String,

    /// Current health status
    pub status: AccountStatus,

    /// Assigned proxy id, if any
    pub proxy_id: Option<String>,

    /// Messages delivered during the current UTC day
    pub sent_today: u32,

    /// Per-day delivery cap; 0 disables the cap
    pub daily_limit: u32,

    /// Last time this account delivered a message
    pub last_used: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AccountStatus::Active,
            proxy_id: None,
            sent_today: 0,
            daily_limit: 50,
            last_used: None,
        }
    }

    /// Whether the daily counter refers to a previous UTC day
    pub fn needs_daily_reset(&self) -> bool {
        match self.last_used {
            Some(at) => at.date_naive() < Utc::now().date_naive(),
            None => false,
        }
    }

    /// Whether the account has exhausted its daily cap
    pub fn at_daily_limit(&self) -> bool {
        self.daily_limit > 0 && self.sent_today >= self.daily_limit && !self.needs_daily_reset()
    }

    /// Whether the account may be selected for a new attempt
    pub fn is_usable(&self) -> bool {
        self.status == AccountStatus::Active && !self.at_daily_limit()
    }
}

/// One network proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    /// Proxy identifier
    pub id: String,

    /// Endpoint URL, e.g. `socks5://10.0.0.1:1080`
    pub endpoint: String,

    /// Whether the proxy may be handed out
    pub active: bool,

    /// Successful connections through this proxy
    pub success_count: u32,

    /// Failed connections through this proxy
    pub failure_count: u32,
}

impl Proxy {
    /// Failures after which a proxy is permanently disabled
    pub const DISABLE_THRESHOLD: u32 = 3;

    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            active: true,
            success_count: 0,
            failure_count: 0,
        }
    }

    /// Record a connection outcome; returns true if this report disabled
    /// the proxy
    pub fn record_outcome(&mut self, success: bool) -> bool {
        if success {
            self.success_count += 1;
            return false;
        }
        self.failure_count += 1;
        if self.active && self.failure_count >= Self::DISABLE_THRESHOLD {
            self.active = false;
            return true;
        }
        false
    }
}

/// One send attempt, as recorded in the attempt log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub job_id: String,
    pub account_id: String,
    pub target_id: String,
    pub success: bool,
    pub error_label: Option<String>,
    pub at: DateTime<Utc>,
}

impl SendRecord {
    pub fn success(job_id: &str, account_id: &str, target_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            account_id: account_id.to_string(),
            target_id: target_id.to_string(),
            success: true,
            error_label: None,
            at: Utc::now(),
        }
    }

    pub fn failure(job_id: &str, account_id: &str, target_id: &str, label: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            account_id: account_id.to_string(),
            target_id: target_id.to_string(),
            success: false,
            error_label: Some(label.to_string()),
            at: Utc::now(),
        }
    }
}

/// Point-in-time view of a running job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    pub elapsed_secs: u64,
}

impl ProgressSnapshot {
    /// Fraction of targets with a delivery, 0.0 - 1.0
    pub fn delivery_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.sent as f64 / self.total as f64
    }
}

/// Structured end-of-job report
///
/// `failures` groups undelivered targets by classified error label so the
/// caller can tell give-up conditions from retry-later conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub job_id: String,
    pub status: JobStatus,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    pub elapsed_secs: u64,
    pub delivered: Vec<String>,
    pub failures: BTreeMap<String, Vec<String>>,
    pub stop_reason: Option<String>,
}
