//! Common test utilities: scriptable transport and engine harness

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use volley::client::{ClientLease, Connection, SessionHandle, SessionStore, Transport};
use volley::dispatch::DispatchEngine;
use volley::health::AccountHealthMonitor;
use volley::models::{Account, ExecMode, Job, Proxy};
use volley::proxy::ProxyPool;
use volley::sender::MessageSender;
use volley::storage::Stores;
use volley::utils::error::{SessionError, TransportError};

/// Outcome a scripted pair produces, in order of scheduling
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Scripted {
    Ok,
    Privacy,
    Mutual,
    FloodWait(u64),
    PeerFlood,
    Blocked,
    NotFound,
    Timeout,
    ServerError,
}

impl Scripted {
    fn into_result(self) -> Result<(), TransportError> {
        match self {
            Self::Ok => Ok(()),
            Self::Privacy => Err(TransportError::PrivacyRestricted),
            Self::Mutual => Err(TransportError::MutualContactRequired),
            Self::FloodWait(secs) => Err(TransportError::FloodWait(Duration::from_secs(secs))),
            Self::PeerFlood => Err(TransportError::PeerFlood),
            Self::Blocked => Err(TransportError::Blocked),
            Self::NotFound => Err(TransportError::TargetNotFound("gone".into())),
            Self::Timeout => Err(TransportError::Timeout),
            Self::ServerError => Err(TransportError::Gateway {
                status: 500,
                message: "boom".into(),
            }),
        }
    }
}

#[derive(Default)]
struct MockInner {
    /// Per-pair scripted outcomes, consumed front to back
    scripts: Mutex<HashMap<(String, String), VecDeque<Scripted>>>,
    /// Every attempt in arrival order: (account_id, target_id)
    attempts: Mutex<Vec<(String, String)>>,
    probes: AtomicUsize,
}

/// Transport double: every send succeeds unless a script says otherwise
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the (account, target) pair
    #[allow(dead_code)]
    pub fn script(&self, account_id: &str, target_id: &str, outcome: Scripted) {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .entry((account_id.to_string(), target_id.to_string()))
            .or_default()
            .push_back(outcome);
    }

    /// Queue the same outcome for an account against every listed target
    #[allow(dead_code)]
    pub fn script_all(&self, account_id: &str, target_ids: &[&str], outcome: Scripted) {
        for target_id in target_ids {
            self.script(account_id, target_id, outcome.clone());
        }
    }

    /// Attempts recorded so far, in order
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.inner.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.attempts.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn probe_count(&self) -> usize {
        self.inner.probes.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    account_id: String,
    inner: Arc<MockInner>,
}

#[async_trait]
impl Connection for MockConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn send_message(&self, target: &str, _message: &str) -> Result<(), TransportError> {
        self.inner
            .attempts
            .lock()
            .unwrap()
            .push((self.account_id.clone(), target.to_string()));

        let scripted = self
            .inner
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(self.account_id.clone(), target.to_string()))
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or(Scripted::Ok).into_result()
    }

    async fn probe_health(&self) -> Result<String, TransportError> {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        Ok("no restrictions".to_string())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        session: &SessionHandle,
        _proxy: Option<&Proxy>,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        Ok(Box::new(MockConnection {
            account_id: session.account_id.clone(),
            inner: self.inner.clone(),
        }))
    }
}

/// Session catalog double: ids starting with `corrupt` fail integrity
pub struct MockSessions;

impl SessionStore for MockSessions {
    fn open(&self, account_id: &str) -> Result<SessionHandle, SessionError> {
        if account_id.starts_with("corrupt") {
            return Err(SessionError::Corrupted(account_id.to_string()));
        }
        Ok(SessionHandle {
            account_id: account_id.to_string(),
            auth_token: "test-token".into(),
        })
    }
}

/// Fully wired engine over in-memory stores and the mock transport
pub struct TestHarness {
    pub stores: Stores,
    pub transport: MockTransport,
    pub engine: DispatchEngine,
}

pub fn harness() -> TestHarness {
    let stores = Stores::in_memory();
    let transport = MockTransport::new();

    let lease = Arc::new(ClientLease::new(
        Arc::new(transport.clone()),
        Arc::new(MockSessions),
        ProxyPool::new(stores.proxies.clone()),
        stores.accounts.clone(),
    ));

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
        0, // no global pacer in tests
    ));

    let engine = DispatchEngine::new(stores.clone(), sender, health)
        .with_grace_period(Duration::from_secs(1));

    TestHarness {
        stores,
        transport,
        engine,
    }
}

/// Build a job with zero inter-send delay so tests run fast
pub fn make_job(mode: ExecMode, targets: &[&str], accounts: &[&str]) -> Job {
    let mut job = Job::new(
        "test-job",
        mode,
        "hello there",
        targets.iter().map(|s| s.to_string()).collect(),
        accounts.iter().map(|s| s.to_string()).collect(),
    );
    job.min_delay_secs = 0;
    job.max_delay_secs = 0;
    job
}

/// Register the job's accounts as fresh Active accounts
pub fn seed_accounts(harness: &TestHarness, account_ids: &[&str]) {
    use volley::storage::AccountRepository;
    for id in account_ids {
        harness
            .stores
            .accounts
            .upsert_account(&Account::new(*id))
            .unwrap();
    }
}
