use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use proving_broker_core::{Epoch, JobId, JobOutcome, ProofUri, ProvingJob};

use super::r#trait::{BrokerDatabase, DatabaseError, StoredJob};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    stored: StoredJob,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

/// In-memory broker database.
///
/// Intended for tests and ephemeral brokers. Shared through an `Arc`, it
/// survives a broker restart within the same process.
#[derive(Debug, Default)]
pub struct InMemoryBrokerDatabase {
    inner: RwLock<Inner>,
}

impl InMemoryBrokerDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_outcome(&self, id: &JobId, outcome: JobOutcome) -> Result<(), DatabaseError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DatabaseError::Storage("lock poisoned".to_string()))?;

        // Outcomes for unknown ids have nothing to attach to.
        if let Some(entry) = inner.jobs.get_mut(id) {
            entry.stored.outcome = Some(outcome);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerDatabase for InMemoryBrokerDatabase {
    async fn add_job(&self, job: &ProvingJob) -> Result<(), DatabaseError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DatabaseError::Storage("lock poisoned".to_string()))?;

        if inner.jobs.contains_key(&job.id) {
            return Ok(());
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id.clone(),
            Entry {
                seq,
                stored: StoredJob {
                    job: job.clone(),
                    outcome: None,
                },
            },
        );
        Ok(())
    }

    async fn set_job_result(&self, id: &JobId, value: &ProofUri) -> Result<(), DatabaseError> {
        self.set_outcome(
            id,
            JobOutcome::Fulfilled {
                value: value.clone(),
            },
        )
    }

    async fn set_job_error(&self, id: &JobId, reason: &str) -> Result<(), DatabaseError> {
        self.set_outcome(
            id,
            JobOutcome::Rejected {
                reason: reason.to_string(),
            },
        )
    }

    async fn load_all_jobs(&self) -> Result<Vec<StoredJob>, DatabaseError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DatabaseError::Storage("lock poisoned".to_string()))?;

        let mut entries: Vec<_> = inner.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries.into_iter().map(|e| e.stored.clone()).collect())
    }

    async fn delete_jobs_older_than_epoch(&self, epoch: Epoch) -> Result<u64, DatabaseError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DatabaseError::Storage("lock poisoned".to_string()))?;

        let before = inner.jobs.len();
        inner.jobs.retain(|_, e| e.stored.job.epoch > epoch);
        Ok((before - inner.jobs.len()) as u64)
    }
}
