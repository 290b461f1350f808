use strata_consensus::ChainValidationError;
use strata_interfaces::{
    consensus::ConsensusError, executor::ExecutorError, p2p::error::DownloadError,
    provider::ProviderError,
};
use strata_primitives::{BlockHash, U256};
use thiserror::Error;

/// Result alias for sync session outcomes.
pub type SyncResult<T> = Result<T, SyncError>;

/// The error that ends a sync session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A session is already running; only one runs at a time.
    #[error("a sync session is already in progress")]
    AlreadySyncing,
    /// The announced target does not outweigh the local chain, so there is
    /// nothing to sync towards.
    #[error("announced target weight {target} does not exceed the local chain weight {local}")]
    TargetWeightTooLow {
        /// The weight the target announced.
        target: U256,
        /// The cumulative weight of the local canonical head.
        local: U256,
    },
    /// The downloaded header chain does not add up to the announced weight.
    #[error("downloaded chain weighs {computed}, but the target announced {announced}")]
    TargetWeightMismatch {
        /// The weight the target announced.
        announced: U256,
        /// The weight recomputed from the accepted headers.
        computed: U256,
    },
    /// The header chain reached the target height on a different block.
    #[error("downloaded chain tip {got} does not match the announced target hash {expected}")]
    TargetHashMismatch {
        /// The hash the target announced.
        expected: BlockHash,
        /// The hash of the last accepted header.
        got: BlockHash,
    },
    /// The session was cancelled; partial progress was discarded.
    #[error("the sync session was cancelled")]
    Cancelled,
    /// A downloader gave up on the network.
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// A block or header failed a consensus rule.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// The execution backend failed to apply a block.
    #[error(transparent)]
    Execution(#[from] ExecutorError),
    /// Local storage failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<ChainValidationError> for SyncError {
    fn from(err: ChainValidationError) -> Self {
        match err {
            ChainValidationError::Consensus(err) => Self::Consensus(err),
            ChainValidationError::Provider(err) => Self::Provider(err),
        }
    }
}
