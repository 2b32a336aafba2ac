//! Persistence boundary for the broker.
//!
//! The broker only needs a narrow capability set (add, settle, load, prune);
//! backends are chosen by [`DatabaseConfig`](crate::config::DatabaseConfig).

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

use std::sync::Arc;

pub use in_memory::InMemoryBrokerDatabase;
pub use r#trait::{BrokerDatabase, DatabaseError, StoredJob};
pub use sqlite::SqliteBrokerDatabase;

use crate::config::DatabaseConfig;

/// Open the backend selected by `config`.
pub async fn open_database(
    config: &DatabaseConfig,
) -> Result<Arc<dyn BrokerDatabase>, DatabaseError> {
    match config {
        DatabaseConfig::InMemory => Ok(Arc::new(InMemoryBrokerDatabase::new())),
        DatabaseConfig::Sqlite { path } => Ok(Arc::new(SqliteBrokerDatabase::open(path).await?)),
    }
}
