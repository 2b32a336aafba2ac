//! Picks the next queued job to hand out.

use proving_broker_core::{Epoch, JobId, PriorityTable, ProofKind};

use crate::table::JobTable;

/// Choose the next job for an agent.
///
/// Walks kinds from most to least preferred, skipping kinds outside
/// `allow_list` (empty means every kind), and takes the oldest-epoch,
/// earliest-queued job of the first kind that has one at or above
/// `min_epoch`. Returns `None` when nothing is eligible.
pub(crate) fn select_next(
    table: &JobTable,
    priority: &PriorityTable,
    allow_list: &[ProofKind],
    min_epoch: Epoch,
) -> Option<JobId> {
    priority
        .kinds()
        .filter(|kind| allow_list.is_empty() || allow_list.contains(kind))
        .find_map(|kind| table.queued(kind, min_epoch).next().cloned())
}
