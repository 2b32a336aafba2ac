use thiserror::Error;

use proving_broker_core::{Epoch, JobId};

use crate::database::DatabaseError;

/// Errors surfaced by [`ProvingBroker`](crate::ProvingBroker) operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The job's epoch is below the retention window.
    #[error("job {job_id} is for epoch {epoch}, oldest epoch still accepted is {oldest_allowed}")]
    StaleEpoch {
        job_id: JobId,
        epoch: Epoch,
        oldest_allowed: Epoch,
    },

    /// The id is already known with different content.
    #[error("job {0} already exists with different content")]
    DuplicateJobId(JobId),

    #[error(transparent)]
    Persistence(#[from] DatabaseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("broker is already running")]
    AlreadyRunning,
}

pub type BrokerResult<T> = Result<T, BrokerError>;
