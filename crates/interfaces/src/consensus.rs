use strata_primitives::{BlockHash, BlockNumber, Bloom, SealedBlock, SealedHeader, B256};
use thiserror::Error;

/// Consensus is the protocol-rule verification capability.
///
/// The sync engine treats the concrete rule set (proof-of-work seal checks,
/// difficulty schedules, ...) as external; it only relies on the structural
/// checks exposed here.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait Consensus: Send + Sync + std::fmt::Debug {
    /// Validate that `header` correctly extends `parent`.
    fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError>;

    /// Validate a block's body against its own header, without chain context.
    fn pre_validate_block(&self, block: &SealedBlock) -> Result<(), ConsensusError>;
}

/// Outcome of the pre-import validator gate for a block that did not fail.
///
/// A block that is already fully known locally short-circuits without error;
/// the caller must not re-import it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// The block and its state are already present locally.
    AlreadyKnown,
    /// The block passed validation and is eligible for import.
    Valid,
}

/// Consensus validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The header's number does not follow its parent's.
    #[error("block number {block_number} does not follow parent number {parent_block_number}")]
    ParentBlockNumberMismatch {
        /// Number of the supposed parent.
        parent_block_number: BlockNumber,
        /// Number of the child being validated.
        block_number: BlockNumber,
    },
    /// The header's timestamp is not after its parent's.
    #[error("timestamp {timestamp} is behind parent timestamp {parent_timestamp}")]
    TimestampIsInPast {
        /// Timestamp of the parent header.
        parent_timestamp: u64,
        /// Timestamp of the child being validated.
        timestamp: u64,
    },
    /// Header declares more gas used than its gas limit allows.
    #[error("gas used {gas_used} exceeds gas limit {gas_limit}")]
    HeaderGasUsedExceedsGasLimit {
        /// Declared gas used.
        gas_used: u64,
        /// Declared gas limit.
        gas_limit: u64,
    },
    /// Gas limit increased faster than elasticity allows.
    #[error("child gas limit {child_gas_limit} is an invalid increase over parent {parent_gas_limit}")]
    GasLimitInvalidIncrease {
        /// Gas limit of the parent header.
        parent_gas_limit: u64,
        /// Gas limit of the child being validated.
        child_gas_limit: u64,
    },
    /// Gas limit decreased faster than elasticity allows.
    #[error("child gas limit {child_gas_limit} is an invalid decrease from parent {parent_gas_limit}")]
    GasLimitInvalidDecrease {
        /// Gas limit of the parent header.
        parent_gas_limit: u64,
        /// Gas limit of the child being validated.
        child_gas_limit: u64,
    },
    /// Gas limit fell below the protocol minimum.
    #[error("child gas limit {child_gas_limit} is below the protocol minimum")]
    GasLimitBelowMinimum {
        /// Gas limit of the child being validated.
        child_gas_limit: u64,
    },
    /// Extra data field exceeds the maximum size.
    #[error("extra data of {len} bytes exceeds the 32 byte maximum")]
    ExtraDataExceedsMax {
        /// Length of the offending extra data.
        len: usize,
    },
    /// The body's ommers hash does not match the header's declared root.
    #[error("ommers hash mismatch: got {got}, expected {expected}")]
    BodyOmmersHashDiff {
        /// Recomputed ommers hash.
        got: B256,
        /// Root declared by the header.
        expected: B256,
    },
    /// An ommer header failed independent verification.
    #[error("ommer {hash} failed header verification")]
    OmmerInvalid {
        /// Hash of the offending ommer.
        hash: B256,
    },
    /// The body's transaction root does not match the header's declared root.
    #[error("transaction root mismatch: got {got}, expected {expected}")]
    BodyTransactionRootDiff {
        /// Recomputed transaction root.
        got: B256,
        /// Root declared by the header.
        expected: B256,
    },
    /// The receipt root does not match the header's declared root.
    #[error("receipt root mismatch: got {got}, expected {expected}")]
    ReceiptRootDiff {
        /// Recomputed receipt root.
        got: B256,
        /// Root declared by the header.
        expected: B256,
    },
    /// The bloom rebuilt from receipt logs does not match the header's.
    #[error("header bloom mismatch: got {got}, expected {expected}")]
    BloomDiff {
        /// Recomputed bloom.
        got: Box<Bloom>,
        /// Bloom declared by the header.
        expected: Box<Bloom>,
    },
    /// The post-execution state root does not match the header's.
    #[error("state root mismatch: got {got}, expected {expected}")]
    StateRootDiff {
        /// State root produced by execution.
        got: B256,
        /// Root declared by the header.
        expected: B256,
    },
    /// Executed gas does not match the header's declared gas used.
    #[error("block gas accounting mismatch: executed {got}, header declares {expected}")]
    BlockGasUsedDiff {
        /// Gas used reported by execution.
        got: u64,
        /// Gas used declared by the header.
        expected: u64,
    },
    /// The block's parent is entirely unknown locally.
    ///
    /// A deeper header backfill is required before this block can be
    /// considered.
    #[error("parent {hash} is unknown")]
    AncestorUnknown {
        /// Hash of the missing parent.
        hash: BlockHash,
    },
    /// The block's parent header is known but its state has been pruned.
    ///
    /// The block cannot be executed without a state sync; distinguished from
    /// [`ConsensusError::AncestorUnknown`] so the orchestrator knows a
    /// backfill will not help.
    #[error("parent {hash} is known but its state is unavailable")]
    AncestorPrunedState {
        /// Hash of the parent with pruned state.
        hash: BlockHash,
    },
}

impl ConsensusError {
    /// Whether the error indicates data that can never become valid.
    ///
    /// Root and gas-accounting mismatches are fatal regardless of which peer
    /// supplied the data; ancestor errors are recoverable through backfill or
    /// state sync.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AncestorUnknown { .. } | Self::AncestorPrunedState { .. })
    }
}
