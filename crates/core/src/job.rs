//! Proving job and its externally visible status.

use serde::{Deserialize, Serialize};

use crate::id::{Epoch, InputsUri, JobId, ProofUri};
use crate::kind::ProofKind;

/// A unit of proving work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvingJob {
    pub id: JobId,
    pub kind: ProofKind,
    pub epoch: Epoch,
    /// Where the agent finds the inputs; never interpreted by the broker.
    pub inputs_uri: InputsUri,
}

impl ProvingJob {
    pub fn new(
        id: impl Into<JobId>,
        kind: ProofKind,
        epoch: impl Into<Epoch>,
        inputs_uri: impl Into<InputsUri>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            epoch: epoch.into(),
            inputs_uri: inputs_uri.into(),
        }
    }
}

/// Terminal outcome of a job, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Fulfilled { value: ProofUri },
    Rejected { reason: String },
}

/// Status of a job as reported to producers and agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// The broker has no record of the job.
    NotFound,
    /// Waiting for an agent.
    Queued,
    /// Held by an agent under a live lease.
    InProgress,
    /// Proven successfully (terminal).
    Fulfilled { value: ProofUri },
    /// Failed permanently or cancelled (terminal).
    Rejected { reason: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Fulfilled { .. } | JobStatus::Rejected { .. })
    }
}

impl From<JobOutcome> for JobStatus {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Fulfilled { value } => JobStatus::Fulfilled { value },
            JobOutcome::Rejected { reason } => JobStatus::Rejected { reason },
        }
    }
}
