#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use proving_broker::{
    BrokerConfig, BrokerDatabase, DatabaseError, InMemoryBrokerDatabase, ProvingBroker, StoredJob,
};
use proving_broker_core::{Epoch, JobId, ProofKind, ProofUri, ProvingJob};

pub const JOB_TIMEOUT: Duration = Duration::from_millis(1_000);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type TestBroker = ProvingBroker<Arc<FaultyDatabase>>;

/// A storage call seen by [`FaultyDatabase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddJob(JobId),
    SetResult(JobId),
    SetError(JobId, String),
    LoadAll,
    Delete(Epoch),
}

/// In-memory store that records calls and fails on demand.
#[derive(Debug, Default)]
pub struct FaultyDatabase {
    store: Arc<InMemoryBrokerDatabase>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    fail_loads: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl FaultyDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Another view over the same records, with its own fault switches.
    pub fn reopen(&self) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(&self.store),
            ..Default::default()
        })
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn stored_ids(&self) -> Vec<String> {
        self.stored()
            .await
            .into_iter()
            .map(|s| s.job.id.into_inner())
            .collect()
    }

    pub async fn stored(&self) -> Vec<StoredJob> {
        self.store.load_all_jobs().await.unwrap()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_write(&self) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(DatabaseError::Storage("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerDatabase for FaultyDatabase {
    async fn add_job(&self, job: &ProvingJob) -> Result<(), DatabaseError> {
        self.record(Call::AddJob(job.id.clone()));
        self.check_write()?;
        self.store.add_job(job).await
    }

    async fn set_job_result(&self, id: &JobId, value: &ProofUri) -> Result<(), DatabaseError> {
        self.record(Call::SetResult(id.clone()));
        self.check_write()?;
        self.store.set_job_result(id, value).await
    }

    async fn set_job_error(&self, id: &JobId, reason: &str) -> Result<(), DatabaseError> {
        self.record(Call::SetError(id.clone(), reason.to_string()));
        self.check_write()?;
        self.store.set_job_error(id, reason).await
    }

    async fn load_all_jobs(&self) -> Result<Vec<StoredJob>, DatabaseError> {
        self.record(Call::LoadAll);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(DatabaseError::Storage("injected load failure".to_string()));
        }
        self.store.load_all_jobs().await
    }

    async fn delete_jobs_older_than_epoch(&self, epoch: Epoch) -> Result<u64, DatabaseError> {
        self.record(Call::Delete(epoch));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Storage("injected delete failure".to_string()));
        }
        self.store.delete_jobs_older_than_epoch(epoch).await
    }
}

pub fn test_config() -> BrokerConfig {
    BrokerConfig::default()
        .with_job_timeout(JOB_TIMEOUT)
        .with_poll_interval(POLL_INTERVAL)
        .with_max_retries(2)
        .with_epochs_to_keep(1)
}

pub fn job(id: &str, kind: ProofKind, epoch: u64) -> ProvingJob {
    ProvingJob::new(id, kind, epoch, format!("inputs/{id}"))
}

pub fn id(raw: &str) -> JobId {
    JobId::from(raw)
}

pub async fn started_broker(config: BrokerConfig) -> (TestBroker, Arc<FaultyDatabase>) {
    let db = FaultyDatabase::new();
    let broker = ProvingBroker::new(Arc::clone(&db), config).unwrap();
    broker.start().await.unwrap();
    (broker, db)
}

pub async fn restart(db: &Arc<FaultyDatabase>, config: BrokerConfig) -> TestBroker {
    let broker = ProvingBroker::new(Arc::clone(db), config).unwrap();
    broker.start().await.unwrap();
    broker
}
