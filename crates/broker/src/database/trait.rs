use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use proving_broker_core::{Epoch, JobId, JobOutcome, ProofUri, ProvingJob};

/// A job as persisted, plus its terminal outcome if one was recorded.
///
/// Lease and queue position are never stored; the broker rebuilds them on start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: ProvingJob,
    pub outcome: Option<JobOutcome>,
}

/// Persistence operation error.
///
/// These are **infrastructure errors**; the broker wraps them in
/// `BrokerError::Persistence` for the caller of the triggering operation.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database is closed")]
    Closed,
}

/// Durable store backing the broker's job table.
///
/// The broker consults it only on start (to rebuild state) and on
/// state-changing calls (to make them crash-safe before acknowledging).
///
/// ## Implementation Requirements
///
/// - `add_job` is idempotent on the job id
/// - `load_all_jobs` returns records in admission order
/// - `delete_jobs_older_than_epoch` removes every record whose epoch is `<=` the
///   given epoch, terminal or not
#[async_trait]
pub trait BrokerDatabase: Send + Sync {
    /// Durably record a newly admitted job.
    async fn add_job(&self, job: &ProvingJob) -> Result<(), DatabaseError>;

    /// Durably record a successful outcome.
    async fn set_job_result(&self, id: &JobId, value: &ProofUri) -> Result<(), DatabaseError>;

    /// Durably record a permanent failure.
    async fn set_job_error(&self, id: &JobId, reason: &str) -> Result<(), DatabaseError>;

    /// Every non-deleted job, in admission order.
    async fn load_all_jobs(&self) -> Result<Vec<StoredJob>, DatabaseError>;

    /// Remove every record with `epoch <= epoch`. Returns how many were removed.
    async fn delete_jobs_older_than_epoch(&self, epoch: Epoch) -> Result<u64, DatabaseError>;

    /// Release resources held by the store.
    async fn close(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl<D> BrokerDatabase for Arc<D>
where
    D: BrokerDatabase + ?Sized,
{
    async fn add_job(&self, job: &ProvingJob) -> Result<(), DatabaseError> {
        (**self).add_job(job).await
    }

    async fn set_job_result(&self, id: &JobId, value: &ProofUri) -> Result<(), DatabaseError> {
        (**self).set_job_result(id, value).await
    }

    async fn set_job_error(&self, id: &JobId, reason: &str) -> Result<(), DatabaseError> {
        (**self).set_job_error(id, reason).await
    }

    async fn load_all_jobs(&self) -> Result<Vec<StoredJob>, DatabaseError> {
        (**self).load_all_jobs().await
    }

    async fn delete_jobs_older_than_epoch(&self, epoch: Epoch) -> Result<u64, DatabaseError> {
        (**self).delete_jobs_older_than_epoch(epoch).await
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        (**self).close().await
    }
}
