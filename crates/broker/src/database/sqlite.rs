//! SQLite-backed broker database.
//!
//! One row per job in `proving_jobs`. The autoincrement `seq` column preserves
//! admission order across restarts; the terminal outcome lives in the same row
//! (`outcome` is `'fulfilled'` or `'rejected'`, `outcome_value` holds the proof
//! locator or the rejection reason).
//!
//! ## Error Mapping
//!
//! | SQLx Error | DatabaseError |
//! |------------|---------------|
//! | PoolClosed | `Closed` |
//! | undecodable row / unknown kind | `Corrupt` |
//! | anything else | `Storage` |

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, instrument};

use proving_broker_core::{Epoch, JobId, JobOutcome, ProofKind, ProofUri, ProvingJob};

use super::r#trait::{BrokerDatabase, DatabaseError, StoredJob};

const OUTCOME_FULFILLED: &str = "fulfilled";
const OUTCOME_REJECTED: &str = "rejected";

/// Durable broker database on an embedded SQLite file.
///
/// `SqlitePool` is `Send + Sync`; this handle is cheap to clone.
#[derive(Debug, Clone)]
pub struct SqliteBrokerDatabase {
    pool: SqlitePool,
}

impl SqliteBrokerDatabase {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Storage(format!(
                        "failed to create data directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let db = Self { pool };
        db.migrate().await?;
        debug!(path = %path.display(), "opened sqlite broker database");
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proving_jobs (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                kind          TEXT NOT NULL,
                epoch         INTEGER NOT NULL,
                inputs_uri    TEXT NOT NULL,
                outcome       TEXT NULL,
                outcome_value TEXT NULL,
                created_at    TEXT NOT NULL,
                settled_at    TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS proving_jobs_epoch_idx ON proving_jobs (epoch)")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    async fn set_outcome(
        &self,
        operation: &str,
        id: &JobId,
        outcome: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE proving_jobs
            SET outcome = ?1, outcome_value = ?2, settled_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(outcome)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        Ok(())
    }
}

#[async_trait]
impl BrokerDatabase for SqliteBrokerDatabase {
    #[instrument(skip(self, job), fields(job_id = %job.id, epoch = %job.epoch), err)]
    async fn add_job(&self, job: &ProvingJob) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO proving_jobs (id, kind, epoch, inputs_uri, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(epoch_to_sql(job.epoch)?)
        .bind(job.inputs_uri.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_job", e))?;

        Ok(())
    }

    #[instrument(skip(self, value), fields(job_id = %id), err)]
    async fn set_job_result(&self, id: &JobId, value: &ProofUri) -> Result<(), DatabaseError> {
        self.set_outcome("set_job_result", id, OUTCOME_FULFILLED, value.as_str())
            .await
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn set_job_error(&self, id: &JobId, reason: &str) -> Result<(), DatabaseError> {
        self.set_outcome("set_job_error", id, OUTCOME_REJECTED, reason)
            .await
    }

    #[instrument(skip(self), err)]
    async fn load_all_jobs(&self) -> Result<Vec<StoredJob>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, epoch, inputs_uri, outcome, outcome_value
            FROM proving_jobs
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all_jobs", e))?;

        rows.iter().map(row_to_stored_job).collect()
    }

    #[instrument(skip(self), fields(epoch = %epoch), err)]
    async fn delete_jobs_older_than_epoch(&self, epoch: Epoch) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM proving_jobs WHERE epoch <= ?1")
            .bind(epoch_to_sql(epoch)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_jobs_older_than_epoch", e))?;

        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.pool.close().await;
        Ok(())
    }
}

fn epoch_to_sql(epoch: Epoch) -> Result<i64, DatabaseError> {
    i64::try_from(epoch.get())
        .map_err(|_| DatabaseError::Storage(format!("epoch {epoch} exceeds sqlite integer range")))
}

fn row_to_stored_job(row: &SqliteRow) -> Result<StoredJob, DatabaseError> {
    let id: String = row.try_get("id").map_err(corrupt)?;
    let kind: String = row.try_get("kind").map_err(corrupt)?;
    let epoch: i64 = row.try_get("epoch").map_err(corrupt)?;
    let inputs_uri: String = row.try_get("inputs_uri").map_err(corrupt)?;
    let outcome: Option<String> = row.try_get("outcome").map_err(corrupt)?;
    let outcome_value: Option<String> = row.try_get("outcome_value").map_err(corrupt)?;

    let kind: ProofKind = kind
        .parse()
        .map_err(|e| DatabaseError::Corrupt(format!("job {id}: {e}")))?;
    let epoch = u64::try_from(epoch)
        .map_err(|_| DatabaseError::Corrupt(format!("job {id}: negative epoch {epoch}")))?;

    let outcome = match (outcome.as_deref(), outcome_value) {
        (None, _) => None,
        (Some(OUTCOME_FULFILLED), Some(value)) => Some(JobOutcome::Fulfilled {
            value: value.into(),
        }),
        (Some(OUTCOME_FULFILLED), None) => {
            return Err(DatabaseError::Corrupt(format!(
                "job {id}: fulfilled without a proof locator"
            )));
        }
        (Some(OUTCOME_REJECTED), reason) => Some(JobOutcome::Rejected {
            reason: reason.unwrap_or_default(),
        }),
        (Some(other), _) => {
            return Err(DatabaseError::Corrupt(format!(
                "job {id}: unrecognized outcome '{other}'"
            )));
        }
    };

    Ok(StoredJob {
        job: ProvingJob::new(id, kind, epoch, inputs_uri),
        outcome,
    })
}

fn corrupt(err: sqlx::Error) -> DatabaseError {
    DatabaseError::Corrupt(format!("failed to decode job row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::PoolClosed => DatabaseError::Closed,
        other => DatabaseError::Storage(format!("{operation}: {other}")),
    }
}
