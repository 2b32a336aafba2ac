//! `proving-broker`: schedules proving jobs between producers and agents.
//!
//! Producers [`enqueue`](ProvingBroker::enqueue) jobs; agents
//! [`pull`](ProvingBroker::pull) them under a lease, keep the lease alive with
//! [`heartbeat`](ProvingBroker::heartbeat) and settle the job with
//! [`report_success`](ProvingBroker::report_success) or
//! [`report_error`](ProvingBroker::report_error). A background supervisor
//! requeues jobs whose lease expired and drops epochs that fell behind the
//! retention window.

pub mod broker;
pub mod config;
pub mod database;
pub mod error;
pub mod stats;

mod selector;
mod supervisor;
mod table;

pub use broker::{Assignment, CANCELLED_REASON, EnqueueOutcome, ProvingBroker};
pub use config::{BrokerConfig, DatabaseConfig, LeasePolicy};
pub use database::{
    BrokerDatabase, DatabaseError, InMemoryBrokerDatabase, SqliteBrokerDatabase, StoredJob,
    open_database,
};
pub use error::{BrokerError, BrokerResult};
pub use stats::BrokerStats;
