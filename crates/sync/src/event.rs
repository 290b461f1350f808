use crate::error::SyncError;
use std::fmt;
use strata_primitives::{BlockHash, BlockNumber};

/// The stage a sync session is currently in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncStage {
    /// No session is running.
    #[default]
    Idle,
    /// Extending the local header chain towards the target.
    Headers,
    /// Fetching and cross-checking bodies and receipts. In snapshot mode the
    /// target state trie is downloaded during this stage as well.
    BodyReceipt,
    /// Applying validated blocks to storage in ascending order.
    Committing,
    /// The last session was cancelled before reaching its target.
    Cancelled,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Headers => "Headers",
            Self::BodyReceipt => "BodyReceipt",
            Self::Committing => "Committing",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// A snapshot of sync progress, published over a watch channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// The stage the current (or last) session is in.
    pub stage: SyncStage,
    /// Number of the latest committed canonical block.
    pub current_block: BlockNumber,
    /// Target height of the current (or last) session.
    pub target_block: BlockNumber,
    /// The error that ended the last session, if it failed.
    pub last_error: Option<SyncError>,
}

/// An event emitted by the orchestrator over its listener channels.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A stage started running.
    StageStarted {
        /// The stage that started.
        stage: SyncStage,
    },
    /// A stage ran to completion.
    StageCompleted {
        /// The stage that finished.
        stage: SyncStage,
    },
    /// A block was committed as the new canonical head.
    BlockCommitted {
        /// Number of the committed block.
        number: BlockNumber,
        /// Hash of the committed block.
        hash: BlockHash,
    },
    /// The session reached its target and the chain is up to date.
    SessionCompleted {
        /// Height of the reached target.
        target_block: BlockNumber,
        /// Hash of the reached target.
        target_hash: BlockHash,
    },
    /// The session ended with a fatal error.
    SessionFailed {
        /// The error that ended the session.
        error: SyncError,
    },
    /// The session was cancelled.
    SessionCancelled,
}
