//! Proof kinds and their scheduling priority.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Kind of proof a job asks for.
///
/// Closed set: every kind has a slot in the [`PriorityTable`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    BlockRootRollup,
    SingleTxBlockRootRollup,
    BlockMergeRollup,
    RootRollup,
    MergeRollup,
    PublicBaseRollup,
    PrivateBaseRollup,
    PublicVm,
    TubeProof,
    RootParity,
    BaseParity,
    EmptyBlockRootRollup,
    PaddingBlockRootRollup,
}

impl ProofKind {
    /// Number of kinds.
    pub const COUNT: usize = 13;

    /// Default ranking, most preferred first.
    ///
    /// Proofs closer to the root of the rollup tree come first so that an
    /// epoch already in flight finishes before new leaves are started.
    pub const PRIORITY_ORDER: [ProofKind; ProofKind::COUNT] = [
        ProofKind::BlockRootRollup,
        ProofKind::SingleTxBlockRootRollup,
        ProofKind::BlockMergeRollup,
        ProofKind::RootRollup,
        ProofKind::MergeRollup,
        ProofKind::PublicBaseRollup,
        ProofKind::PrivateBaseRollup,
        ProofKind::PublicVm,
        ProofKind::TubeProof,
        ProofKind::RootParity,
        ProofKind::BaseParity,
        ProofKind::EmptyBlockRootRollup,
        ProofKind::PaddingBlockRootRollup,
    ];

    /// Stable index of this kind (declaration order, not priority).
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProofKind::BlockRootRollup => "block_root_rollup",
            ProofKind::SingleTxBlockRootRollup => "single_tx_block_root_rollup",
            ProofKind::BlockMergeRollup => "block_merge_rollup",
            ProofKind::RootRollup => "root_rollup",
            ProofKind::MergeRollup => "merge_rollup",
            ProofKind::PublicBaseRollup => "public_base_rollup",
            ProofKind::PrivateBaseRollup => "private_base_rollup",
            ProofKind::PublicVm => "public_vm",
            ProofKind::TubeProof => "tube_proof",
            ProofKind::RootParity => "root_parity",
            ProofKind::BaseParity => "base_parity",
            ProofKind::EmptyBlockRootRollup => "empty_block_root_rollup",
            ProofKind::PaddingBlockRootRollup => "padding_block_root_rollup",
        }
    }
}

impl core::fmt::Display for ProofKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProofKind::PRIORITY_ORDER
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::UnknownProofKind(s.to_string()))
    }
}

/// Static ranking of proof kinds; lower rank is handed out first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    order: [ProofKind; ProofKind::COUNT],
    ranks: [usize; ProofKind::COUNT],
}

impl PriorityTable {
    /// Build a table from a full ordering of every kind, most preferred first.
    ///
    /// Fails if a kind is missing or listed twice.
    pub fn new(order: &[ProofKind]) -> DomainResult<Self> {
        if order.len() != ProofKind::COUNT {
            return Err(DomainError::validation(format!(
                "priority order must list all {} proof kinds, got {}",
                ProofKind::COUNT,
                order.len()
            )));
        }

        let mut ranks = [usize::MAX; ProofKind::COUNT];
        for (rank, kind) in order.iter().enumerate() {
            let slot = &mut ranks[kind.index()];
            if *slot != usize::MAX {
                return Err(DomainError::validation(format!(
                    "proof kind {kind} listed twice in priority order"
                )));
            }
            *slot = rank;
        }

        let mut sorted = [ProofKind::BlockRootRollup; ProofKind::COUNT];
        sorted.copy_from_slice(order);
        Ok(Self {
            order: sorted,
            ranks,
        })
    }

    /// Rank of a kind (0 = most preferred).
    pub fn rank(&self, kind: ProofKind) -> usize {
        self.ranks[kind.index()]
    }

    /// Kinds from most to least preferred.
    pub fn kinds(&self) -> impl Iterator<Item = ProofKind> + '_ {
        self.order.iter().copied()
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        let mut ranks = [0; ProofKind::COUNT];
        for (rank, kind) in ProofKind::PRIORITY_ORDER.iter().enumerate() {
            ranks[kind.index()] = rank;
        }
        Self {
            order: ProofKind::PRIORITY_ORDER,
            ranks,
        }
    }
}
