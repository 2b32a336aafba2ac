//! In-memory job table.
//!
//! Owns every [`JobRecord`] plus the per-kind queues the selector reads. A
//! job id sits in its kind's queue exactly when the record is `Queued`; every
//! mutator here keeps that in step.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use proving_broker_core::{Epoch, JobId, JobOutcome, JobStatus, LeaseId, ProofKind, ProofUri, ProvingJob};

/// Scheduling state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobState {
    Queued,
    InProgress { lease: LeaseId, deadline: Instant },
    Fulfilled { value: ProofUri },
    Rejected { reason: String },
}

impl JobState {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, JobState::Fulfilled { .. } | JobState::Rejected { .. })
    }

    pub(crate) fn to_status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::InProgress { .. } => JobStatus::InProgress,
            JobState::Fulfilled { value } => JobStatus::Fulfilled {
                value: value.clone(),
            },
            JobState::Rejected { reason } => JobStatus::Rejected {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct JobRecord {
    pub(crate) job: ProvingJob,
    pub(crate) state: JobState,
    /// Retries granted so far.
    pub(crate) attempts: u32,
    /// Queue position; refreshed every time the job re-enters the queue.
    seq: u64,
}

type QueueKey = (Epoch, u64);

#[derive(Debug, Default)]
pub(crate) struct JobTable {
    jobs: HashMap<JobId, JobRecord>,
    queues: [BTreeMap<QueueKey, JobId>; ProofKind::COUNT],
    next_seq: u64,
    last_lease: Option<LeaseId>,
    watermark: Epoch,
    last_gc_cutoff: Option<Epoch>,
}

impl JobTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: &JobId) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    pub(crate) fn status(&self, id: &JobId) -> JobStatus {
        self.jobs
            .get(id)
            .map(|r| r.state.to_status())
            .unwrap_or(JobStatus::NotFound)
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    pub(crate) fn watermark(&self) -> Epoch {
        self.watermark
    }

    /// Oldest epoch still admitted and handed out.
    pub(crate) fn oldest_epoch_to_keep(&self, retention: u64) -> Epoch {
        self.watermark.saturating_sub(retention)
    }

    /// Queued jobs of `kind` from `min_epoch` on, in hand-out order.
    pub(crate) fn queued(&self, kind: ProofKind, min_epoch: Epoch) -> impl Iterator<Item = &JobId> {
        self.queues[kind.index()]
            .range((min_epoch, 0)..)
            .map(|(_, id)| id)
    }

    pub(crate) fn queued_count(&self, kind: ProofKind) -> usize {
        self.queues[kind.index()].len()
    }

    /// Admit a new job as `Queued` and advance the watermark.
    ///
    /// The caller checks for an existing record first; a duplicate id replaces
    /// nothing and returns `false`.
    pub(crate) fn admit(&mut self, job: ProvingJob) -> bool {
        if self.jobs.contains_key(&job.id) {
            return false;
        }
        self.watermark = self.watermark.max(job.epoch);
        let seq = self.take_seq();
        self.queues[job.kind.index()].insert((job.epoch, seq), job.id.clone());
        self.jobs.insert(
            job.id.clone(),
            JobRecord {
                job,
                state: JobState::Queued,
                attempts: 0,
                seq,
            },
        );
        true
    }

    /// Rebuild a record loaded from storage. Jobs without an outcome come back
    /// `Queued`; leases never survive a restart.
    pub(crate) fn restore(&mut self, job: ProvingJob, outcome: Option<JobOutcome>) {
        match outcome {
            None => {
                self.admit(job);
            }
            Some(outcome) => {
                if self.jobs.contains_key(&job.id) {
                    return;
                }
                self.watermark = self.watermark.max(job.epoch);
                let seq = self.take_seq();
                let state = match outcome {
                    JobOutcome::Fulfilled { value } => JobState::Fulfilled { value },
                    JobOutcome::Rejected { reason } => JobState::Rejected { reason },
                };
                self.jobs.insert(
                    job.id.clone(),
                    JobRecord {
                        job,
                        state,
                        attempts: 0,
                        seq,
                    },
                );
            }
        }
    }

    /// Mint a lease from the wall-clock millis, strictly greater than any
    /// lease minted before.
    pub(crate) fn mint_lease(&mut self, now_millis: u64) -> LeaseId {
        let millis = match self.last_lease {
            Some(last) => now_millis.max(last.as_millis() + 1),
            None => now_millis,
        };
        let lease = LeaseId::from_millis(millis);
        self.last_lease = Some(lease);
        lease
    }

    /// Put a job in progress under `lease`. Works from `Queued` or
    /// `InProgress` (a takeover); terminal jobs are left alone.
    pub(crate) fn assign(&mut self, id: &JobId, lease: LeaseId, deadline: Instant) -> bool {
        let Some(record) = self.jobs.get_mut(id) else {
            return false;
        };
        match record.state {
            JobState::Queued => {
                self.queues[record.job.kind.index()].remove(&(record.job.epoch, record.seq));
            }
            JobState::InProgress { .. } => {}
            JobState::Fulfilled { .. } | JobState::Rejected { .. } => return false,
        }
        record.state = JobState::InProgress { lease, deadline };
        true
    }

    /// Push the deadline of an in-progress job.
    pub(crate) fn refresh(&mut self, id: &JobId, deadline: Instant) -> bool {
        match self.jobs.get_mut(id) {
            Some(JobRecord {
                state: JobState::InProgress { deadline: d, .. },
                ..
            }) => {
                *d = deadline;
                true
            }
            _ => false,
        }
    }

    /// Send an in-progress job back to the end of its queue.
    pub(crate) fn requeue(&mut self, id: &JobId) -> bool {
        let seq = self.next_seq;
        let Some(record) = self.jobs.get_mut(id) else {
            return false;
        };
        if !matches!(record.state, JobState::InProgress { .. }) {
            return false;
        }
        self.next_seq += 1;
        record.seq = seq;
        record.state = JobState::Queued;
        self.queues[record.job.kind.index()].insert((record.job.epoch, seq), id.clone());
        true
    }

    /// Count one retry against a job's budget.
    pub(crate) fn record_attempt(&mut self, id: &JobId) {
        if let Some(record) = self.jobs.get_mut(id) {
            record.attempts = record.attempts.saturating_add(1);
        }
    }

    /// Move a live job to a terminal state. Already-terminal jobs keep their
    /// first outcome.
    pub(crate) fn settle(&mut self, id: &JobId, state: JobState) -> bool {
        debug_assert!(state.is_terminal());
        let Some(record) = self.jobs.get_mut(id) else {
            return false;
        };
        match record.state {
            JobState::Queued => {
                self.queues[record.job.kind.index()].remove(&(record.job.epoch, record.seq));
            }
            JobState::InProgress { .. } => {}
            JobState::Fulfilled { .. } | JobState::Rejected { .. } => return false,
        }
        record.state = state;
        true
    }

    /// Requeue every in-progress job whose deadline is at or before `now`.
    ///
    /// Expired jobs re-enter their queues in the order they were first queued.
    pub(crate) fn expire_leases(&mut self, now: Instant) -> Vec<JobId> {
        let mut expired: Vec<(QueueKey, JobId)> = self
            .jobs
            .iter()
            .filter(|(_, r)| matches!(r.state, JobState::InProgress { deadline, .. } if deadline <= now))
            .map(|(id, r)| ((r.job.epoch, r.seq), id.clone()))
            .collect();
        expired.sort_unstable_by_key(|(key, _)| *key);

        expired
            .into_iter()
            .map(|(_, id)| {
                self.requeue(&id);
                id
            })
            .collect()
    }

    /// GC cutoff for the current watermark, if it moved past the last one used.
    pub(crate) fn pending_gc_cutoff(&self, retention: u64) -> Option<Epoch> {
        let cutoff = self.watermark.checked_sub(retention.saturating_add(1))?;
        match self.last_gc_cutoff {
            Some(last) if cutoff <= last => None,
            _ => Some(cutoff),
        }
    }

    /// Drop every record with `epoch <= cutoff`, whatever its state.
    pub(crate) fn evict_through_epoch(&mut self, cutoff: Epoch) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, r| r.job.epoch > cutoff);
        for queue in &mut self.queues {
            queue.retain(|(epoch, _), _| *epoch > cutoff);
        }
        self.last_gc_cutoff = Some(cutoff);
        before - self.jobs.len()
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(id: &str, kind: ProofKind, epoch: u64) -> ProvingJob {
        ProvingJob::new(id, kind, epoch, format!("inputs/{id}"))
    }

    fn queued_ids(table: &JobTable, kind: ProofKind) -> Vec<String> {
        table
            .queued(kind, Epoch::ZERO)
            .map(|id| id.as_str().to_string())
            .collect()
    }

    #[test]
    fn admit_queues_and_advances_watermark() {
        let mut table = JobTable::new();
        assert!(table.admit(job("a", ProofKind::BaseParity, 3)));
        assert!(table.admit(job("b", ProofKind::BaseParity, 1)));
        assert!(!table.admit(job("a", ProofKind::BaseParity, 7)));

        assert_eq!(table.watermark(), Epoch::new(3));
        assert_eq!(table.status(&"a".into()), JobStatus::Queued);
        assert_eq!(queued_ids(&table, ProofKind::BaseParity), vec!["b", "a"]);
    }

    #[test]
    fn leases_are_strictly_increasing() {
        let mut table = JobTable::new();
        let first = table.mint_lease(100);
        let second = table.mint_lease(100);
        let third = table.mint_lease(50);
        let fourth = table.mint_lease(500);
        assert!(first < second && second < third && third < fourth);
        assert_eq!(fourth.as_millis(), 500);
    }

    #[test]
    fn assign_and_requeue_move_between_queue_and_progress() {
        let mut table = JobTable::new();
        table.admit(job("a", ProofKind::RootParity, 1));
        table.admit(job("b", ProofKind::RootParity, 1));
        let id: JobId = "a".into();
        let lease = table.mint_lease(1);

        assert!(table.assign(&id, lease, Instant::now()));
        assert_eq!(table.status(&id), JobStatus::InProgress);
        assert_eq!(queued_ids(&table, ProofKind::RootParity), vec!["b"]);

        assert!(table.requeue(&id));
        assert_eq!(table.status(&id), JobStatus::Queued);
        // behind the job that was already waiting
        assert_eq!(queued_ids(&table, ProofKind::RootParity), vec!["b", "a"]);
        assert!(!table.requeue(&id));
    }

    #[test]
    fn settle_is_absorbing() {
        let mut table = JobTable::new();
        table.admit(job("a", ProofKind::PublicVm, 1));
        let id: JobId = "a".into();

        assert!(table.settle(&id, JobState::Fulfilled { value: "proof".into() }));
        assert!(queued_ids(&table, ProofKind::PublicVm).is_empty());
        assert!(!table.settle(&id, JobState::Rejected { reason: "late".into() }));
        assert!(!table.assign(&id, LeaseId::from_millis(1), Instant::now()));
        assert_eq!(
            table.status(&id),
            JobStatus::Fulfilled { value: "proof".into() }
        );
    }

    #[test]
    fn expire_leases_only_touches_overdue_jobs() {
        let mut table = JobTable::new();
        table.admit(job("late", ProofKind::MergeRollup, 1));
        table.admit(job("fresh", ProofKind::MergeRollup, 1));
        let now = Instant::now();

        table.assign(&"late".into(), LeaseId::from_millis(1), now);
        table.assign(&"fresh".into(), LeaseId::from_millis(2), now + Duration::from_secs(5));

        let expired = table.expire_leases(now);
        assert_eq!(expired, vec![JobId::from("late")]);
        assert_eq!(table.status(&"late".into()), JobStatus::Queued);
        assert_eq!(table.status(&"fresh".into()), JobStatus::InProgress);
    }

    #[test]
    fn expired_jobs_requeue_in_their_original_order() {
        let mut table = JobTable::new();
        let names: Vec<String> = (0..16).map(|i| format!("j{i:02}")).collect();
        for name in &names {
            table.admit(job(name, ProofKind::BaseParity, 1));
        }
        let now = Instant::now();
        for (i, name) in names.iter().enumerate() {
            table.assign(&name.as_str().into(), LeaseId::from_millis(i as u64 + 1), now);
        }
        assert!(queued_ids(&table, ProofKind::BaseParity).is_empty());

        let expired: Vec<String> = table
            .expire_leases(now)
            .into_iter()
            .map(|id| id.into_inner())
            .collect();
        assert_eq!(expired, names);
        assert_eq!(queued_ids(&table, ProofKind::BaseParity), names);
    }

    #[test]
    fn restore_keeps_outcomes_and_requeues_the_rest() {
        let mut table = JobTable::new();
        table.restore(job("done", ProofKind::TubeProof, 2), Some(JobOutcome::Fulfilled { value: "p".into() }));
        table.restore(job("open", ProofKind::TubeProof, 4), None);

        assert_eq!(table.status(&"done".into()), JobStatus::Fulfilled { value: "p".into() });
        assert_eq!(table.status(&"open".into()), JobStatus::Queued);
        assert_eq!(table.watermark(), Epoch::new(4));
        assert_eq!(queued_ids(&table, ProofKind::TubeProof), vec!["open"]);
    }

    #[test]
    fn gc_cutoff_advances_only_with_the_watermark() {
        let mut table = JobTable::new();
        table.admit(job("a", ProofKind::BaseParity, 1));
        assert_eq!(table.pending_gc_cutoff(1), None);

        table.admit(job("b", ProofKind::BaseParity, 3));
        let cutoff = table.pending_gc_cutoff(1).unwrap();
        assert_eq!(cutoff, Epoch::new(1));

        assert_eq!(table.evict_through_epoch(cutoff), 1);
        assert_eq!(table.status(&"a".into()), JobStatus::NotFound);
        assert_eq!(queued_ids(&table, ProofKind::BaseParity), vec!["b"]);
        assert_eq!(table.pending_gc_cutoff(1), None);
    }

    #[test]
    fn queued_skips_epochs_below_the_floor() {
        let mut table = JobTable::new();
        table.admit(job("old", ProofKind::BaseParity, 1));
        table.admit(job("new", ProofKind::BaseParity, 5));
        let ids: Vec<_> = table
            .queued(ProofKind::BaseParity, Epoch::new(4))
            .cloned()
            .collect();
        assert_eq!(ids, vec![JobId::from("new")]);
    }
}
