//! `proving-broker-core`: domain building blocks for the proving job broker.
//!
//! This crate contains **pure domain** primitives (no storage, no runtime).

pub mod error;
pub mod id;
pub mod job;
pub mod kind;

pub use error::{DomainError, DomainResult};
pub use id::{Epoch, InputsUri, JobId, LeaseId, ProofUri};
pub use job::{JobOutcome, JobStatus, ProvingJob};
pub use kind::{PriorityTable, ProofKind};
