//! Broker facade.
//!
//! Every mutating operation (and the supervisor pass) runs under `ops`, which
//! is held across persistence calls so concurrent callers see one sequence of
//! transitions. The table's own lock is only taken for short, await-free
//! sections, letting status reads proceed while a mutator waits on storage.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use proving_broker_core::{JobId, JobStatus, LeaseId, ProofKind, ProofUri, ProvingJob};

use crate::config::{BrokerConfig, LeasePolicy};
use crate::database::BrokerDatabase;
use crate::error::{BrokerError, BrokerResult};
use crate::selector::select_next;
use crate::stats::BrokerStats;
use crate::supervisor::SupervisorHandle;
use crate::table::{JobState, JobTable};

/// Rejection reason recorded by [`ProvingBroker::cancel`].
pub const CANCELLED_REASON: &str = "cancelled";

/// A job handed to an agent, with the lease it must present on heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub job: ProvingJob,
    pub lease: LeaseId,
}

/// Result of [`ProvingBroker::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was new; it is now persisted and queued.
    Admitted,
    /// The id was already known; nothing changed.
    Existing(JobStatus),
}

impl EnqueueOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, EnqueueOutcome::Admitted)
    }

    /// Status of the job right after the call.
    pub fn status(&self) -> JobStatus {
        match self {
            EnqueueOutcome::Admitted => JobStatus::Queued,
            EnqueueOutcome::Existing(status) => status.clone(),
        }
    }
}

/// Proving job broker.
///
/// Cheap to clone; clones share the same job table and database.
pub struct ProvingBroker<D> {
    inner: Arc<BrokerInner<D>>,
}

impl<D> Clone for ProvingBroker<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BrokerInner<D> {
    db: D,
    config: BrokerConfig,
    ops: Mutex<()>,
    table: RwLock<JobTable>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    supervisor: Option<SupervisorHandle>,
    /// Set once the table has been loaded from storage.
    restored: bool,
}

impl<D> ProvingBroker<D>
where
    D: BrokerDatabase + 'static,
{
    pub fn new(db: D, config: BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BrokerInner {
                db,
                config,
                ops: Mutex::new(()),
                table: RwLock::new(JobTable::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &D {
        &self.inner.db
    }

    /// Start the supervisor, rebuilding the job table from storage on the
    /// first successful start.
    ///
    /// Jobs with a recorded outcome come back terminal; everything else comes
    /// back queued. Starting again after [`stop`](Self::stop) keeps the
    /// in-memory table as it is.
    pub async fn start(&self) -> BrokerResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.supervisor.is_some() {
            return Err(BrokerError::AlreadyRunning);
        }

        if !lifecycle.restored {
            let _ops = self.inner.ops.lock().await;
            let stored = self.inner.db.load_all_jobs().await.map_err(|e| {
                error!(error = %e, "failed to load jobs from storage");
                e
            })?;

            let mut table = JobTable::new();
            for record in stored {
                table.restore(record.job, record.outcome);
            }
            info!(
                jobs = table.len(),
                epoch_watermark = %table.watermark(),
                "proving broker restored job table"
            );
            *self.inner.table.write().await = table;
            lifecycle.restored = true;
        }

        let weak: Weak<BrokerInner<D>> = Arc::downgrade(&self.inner);
        lifecycle.supervisor = Some(SupervisorHandle::spawn(
            self.inner.config.poll_interval,
            move || {
                let inner = weak.upgrade();
                async move {
                    if let Some(inner) = inner {
                        // tick() logs its own failures
                        let _ = inner.tick().await;
                    }
                }
            },
        ));
        info!(
            poll_interval_ms =
                u64::try_from(self.inner.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "proving broker started"
        );
        Ok(())
    }

    /// Stop the supervisor. Job state is left as is.
    pub async fn stop(&self) {
        let handle = self.inner.lifecycle.lock().await.supervisor.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("proving broker stopped");
        }
    }

    /// Admit a job, or report the status of the job already holding its id.
    ///
    /// Fails with [`BrokerError::StaleEpoch`] for epochs below the retention
    /// floor and with [`BrokerError::Persistence`] when the job could not be
    /// stored, in which case it is not admitted.
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind, epoch = %job.epoch))]
    pub async fn enqueue(&self, job: ProvingJob) -> BrokerResult<EnqueueOutcome> {
        let _ops = self.inner.ops.lock().await;
        let retention = self.inner.config.epochs_to_keep;

        {
            let table = self.inner.table.read().await;
            let oldest_allowed = table.oldest_epoch_to_keep(retention);
            if job.epoch < oldest_allowed {
                warn!(%oldest_allowed, "refusing job from stale epoch");
                return Err(BrokerError::StaleEpoch {
                    job_id: job.id,
                    epoch: job.epoch,
                    oldest_allowed,
                });
            }

            if let Some(existing) = table.get(&job.id) {
                if existing.job != job {
                    warn!("job id reused with different content");
                    return Err(BrokerError::DuplicateJobId(job.id));
                }
                let status = existing.state.to_status();
                debug!(?status, "job already known");
                return Ok(EnqueueOutcome::Existing(status));
            }
        }

        if let Err(e) = self.inner.db.add_job(&job).await {
            error!(error = %e, "failed to persist job; not admitted");
            return Err(e.into());
        }

        self.inner.table.write().await.admit(job);
        debug!("job queued");
        Ok(EnqueueOutcome::Admitted)
    }

    /// Hand out the next eligible job, if any. An empty `allow_list` accepts
    /// every kind.
    pub async fn pull(&self, allow_list: &[ProofKind]) -> Option<Assignment> {
        let _ops = self.inner.ops.lock().await;
        let mut table = self.inner.table.write().await;
        self.inner.assign_next(&mut table, allow_list)
    }

    /// Keep a lease alive.
    ///
    /// Returns `None` when the caller should keep working on `id`. When the
    /// caller no longer owns the job it gets a replacement assignment instead
    /// (or `None` if nothing is queued), and the job itself is left alone.
    pub async fn heartbeat(
        &self,
        id: &JobId,
        lease: LeaseId,
        allow_list: &[ProofKind],
    ) -> Option<Assignment> {
        let _ops = self.inner.ops.lock().await;
        let mut table = self.inner.table.write().await;
        let deadline = Instant::now() + self.inner.config.job_timeout;
        let state = table.get(id).map(|r| r.state.clone());

        match (self.inner.config.lease_policy, state) {
            (_, Some(JobState::InProgress { lease: current, .. })) if current == lease => {
                table.refresh(id, deadline);
                debug!(job_id = %id, %lease, "heartbeat");
                None
            }
            (LeasePolicy::ReclaimOlder, Some(JobState::InProgress { lease: current, .. }))
                if lease < current =>
            {
                table.assign(id, lease, deadline);
                info!(job_id = %id, %lease, replaced = %current, "older lease reclaimed job");
                None
            }
            (LeasePolicy::ReclaimOlder, Some(JobState::Queued)) => {
                table.assign(id, lease, deadline);
                info!(job_id = %id, %lease, "queued job adopted by heartbeat");
                None
            }
            (_, state) => {
                warn!(
                    job_id = %id,
                    %lease,
                    status = ?state.map(|s| s.to_status()).unwrap_or(JobStatus::NotFound),
                    "heartbeat for a job the caller does not hold"
                );
                self.inner.assign_next(&mut table, allow_list)
            }
        }
    }

    /// Record a proof and hand the caller its next job.
    ///
    /// The job is `Fulfilled` in memory even if storing the result fails; that
    /// failure is returned as [`BrokerError::Persistence`].
    pub async fn report_success(
        &self,
        id: &JobId,
        value: ProofUri,
        allow_list: &[ProofKind],
    ) -> BrokerResult<Option<Assignment>> {
        let _ops = self.inner.ops.lock().await;
        if !self.inner.is_live(id).await {
            return Ok(self.inner.next_after_ignored_report(id, allow_list).await);
        }

        let persisted = self.inner.db.set_job_result(id, &value).await;

        let mut table = self.inner.table.write().await;
        table.settle(id, JobState::Fulfilled { value });
        info!(job_id = %id, "job fulfilled");

        if let Err(e) = persisted {
            error!(job_id = %id, error = %e, "failed to persist job result");
            return Err(e.into());
        }
        Ok(self.inner.assign_next(&mut table, allow_list))
    }

    /// Record a failed attempt and hand the caller its next job.
    ///
    /// Retryable errors requeue the job while retries remain and its epoch is
    /// still kept; otherwise the job is `Rejected`, in memory even if storing
    /// the error fails.
    pub async fn report_error(
        &self,
        id: &JobId,
        reason: &str,
        retryable: bool,
        allow_list: &[ProofKind],
    ) -> BrokerResult<Option<Assignment>> {
        let _ops = self.inner.ops.lock().await;
        if !self.inner.is_live(id).await {
            return Ok(self.inner.next_after_ignored_report(id, allow_list).await);
        }

        {
            let mut table = self.inner.table.write().await;
            let retention = self.inner.config.epochs_to_keep;
            let oldest = table.oldest_epoch_to_keep(retention);
            let (attempts, epoch, in_progress) = match table.get(id) {
                Some(record) => (
                    record.attempts,
                    record.job.epoch,
                    matches!(record.state, JobState::InProgress { .. }),
                ),
                None => return Ok(None),
            };

            // `attempts` counts failures already seen, so this one makes
            // `attempts + 1`.
            let max_retries = self.inner.config.max_retries;
            if retryable && attempts.saturating_add(1) < max_retries && epoch >= oldest {
                if !in_progress {
                    debug!(job_id = %id, %reason, "retryable error for a job already queued");
                    return Ok(self.inner.assign_next(&mut table, allow_list));
                }

                // pick the replacement first so the failed job goes to
                // another agent
                let next = self.inner.assign_next(&mut table, allow_list);
                table.requeue(id);
                table.record_attempt(id);
                info!(
                    job_id = %id,
                    attempt = attempts + 1,
                    max_retries,
                    %reason,
                    "job failed; requeued for retry"
                );
                return Ok(next);
            }
        }

        let persisted = self.inner.db.set_job_error(id, reason).await;

        let mut table = self.inner.table.write().await;
        table.settle(
            id,
            JobState::Rejected {
                reason: reason.to_string(),
            },
        );
        info!(job_id = %id, %reason, retryable, "job rejected");

        if let Err(e) = persisted {
            error!(job_id = %id, error = %e, "failed to persist job error");
            return Err(e.into());
        }
        Ok(self.inner.assign_next(&mut table, allow_list))
    }

    /// Force a queued or in-progress job to `Rejected { reason: "cancelled" }`.
    /// Unknown and terminal jobs are left alone.
    pub async fn cancel(&self, id: &JobId) -> BrokerResult<()> {
        let _ops = self.inner.ops.lock().await;
        if !self.inner.is_live(id).await {
            debug!(job_id = %id, "cancel ignored");
            return Ok(());
        }

        let persisted = self.inner.db.set_job_error(id, CANCELLED_REASON).await;
        self.inner.table.write().await.settle(
            id,
            JobState::Rejected {
                reason: CANCELLED_REASON.to_string(),
            },
        );
        info!(job_id = %id, "job cancelled");

        if let Err(e) = persisted {
            error!(job_id = %id, error = %e, "failed to persist cancellation");
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get_status(&self, id: &JobId) -> JobStatus {
        self.inner.table.read().await.status(id)
    }

    pub async fn stats(&self) -> BrokerStats {
        let table = self.inner.table.read().await;
        BrokerStats::collect(&table, self.inner.config.epochs_to_keep)
    }

    /// Run one supervisor pass now: requeue expired leases, then drop epochs
    /// that fell out of the retention window.
    pub async fn tick(&self) -> BrokerResult<()> {
        self.inner.tick().await
    }
}

impl<D> BrokerInner<D>
where
    D: BrokerDatabase,
{
    async fn tick(&self) -> BrokerResult<()> {
        let _ops = self.ops.lock().await;
        let retention = self.config.epochs_to_keep;

        let cutoff = {
            let mut table = self.table.write().await;
            for id in table.expire_leases(Instant::now()) {
                info!(job_id = %id, "lease expired; job requeued");
            }
            table.pending_gc_cutoff(retention)
        };

        let Some(cutoff) = cutoff else {
            return Ok(());
        };

        // Memory is only pruned once storage agrees, so a failed delete is
        // retried on the next pass.
        let deleted = match self.db.delete_jobs_older_than_epoch(cutoff).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(%cutoff, error = %e, "failed to delete old epochs");
                return Err(e.into());
            }
        };

        let mut table = self.table.write().await;
        let evicted = table.evict_through_epoch(cutoff);
        info!(
            %cutoff,
            deleted,
            evicted,
            remaining = table.len(),
            "collected jobs from old epochs"
        );
        Ok(())
    }

    fn assign_next(&self, table: &mut JobTable, allow_list: &[ProofKind]) -> Option<Assignment> {
        let min_epoch = table.oldest_epoch_to_keep(self.config.epochs_to_keep);
        let id = select_next(table, &self.config.priority, allow_list, min_epoch)?;

        let lease = table.mint_lease(now_millis());
        let deadline = Instant::now() + self.config.job_timeout;
        if !table.assign(&id, lease, deadline) {
            return None;
        }

        let job = table.get(&id)?.job.clone();
        debug!(job_id = %job.id, kind = %job.kind, epoch = %job.epoch, %lease, "job assigned");
        Some(Assignment { job, lease })
    }

    /// Whether `id` is queued or in progress. Reports on anything else change
    /// nothing.
    async fn is_live(&self, id: &JobId) -> bool {
        let table = self.table.read().await;
        table.get(id).is_some_and(|r| !r.state.is_terminal())
    }

    /// Replacement for an ignored report: nothing for unknown jobs, the next
    /// job for reports on already terminal ones.
    async fn next_after_ignored_report(
        &self,
        id: &JobId,
        allow_list: &[ProofKind],
    ) -> Option<Assignment> {
        let mut table = self.table.write().await;
        match table.get(id) {
            None => {
                warn!(job_id = %id, "report for unknown job ignored");
                None
            }
            Some(record) => {
                warn!(
                    job_id = %id,
                    status = ?record.state.to_status(),
                    "report for settled job ignored"
                );
                self.assign_next(&mut table, allow_list)
            }
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
