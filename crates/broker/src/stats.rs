use std::collections::HashMap;

use serde::Serialize;

use proving_broker_core::{Epoch, ProofKind};

use crate::table::{JobState, JobTable};

/// Snapshot of the broker's job table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Queued jobs per kind; kinds with nothing queued are omitted.
    pub queued_by_kind: HashMap<ProofKind, usize>,
    pub in_progress: usize,
    pub fulfilled: usize,
    pub rejected: usize,
    pub epoch_watermark: Epoch,
    pub oldest_epoch_to_keep: Epoch,
}

impl BrokerStats {
    pub fn queued(&self) -> usize {
        self.queued_by_kind.values().sum()
    }

    pub(crate) fn collect(table: &JobTable, retention: u64) -> Self {
        let mut stats = BrokerStats {
            epoch_watermark: table.watermark(),
            oldest_epoch_to_keep: table.oldest_epoch_to_keep(retention),
            ..Default::default()
        };

        for kind in ProofKind::PRIORITY_ORDER {
            let queued = table.queued_count(kind);
            if queued > 0 {
                stats.queued_by_kind.insert(kind, queued);
            }
        }

        for record in table.records() {
            match record.state {
                JobState::Queued => {}
                JobState::InProgress { .. } => stats.in_progress += 1,
                JobState::Fulfilled { .. } => stats.fulfilled += 1,
                JobState::Rejected { .. } => stats.rejected += 1,
            }
        }

        stats
    }
}
