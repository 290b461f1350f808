use async_trait::async_trait;
use strata_primitives::{BlockBody, BlockHash, Receipt, SealedHeader, B256};
use thiserror::Error;

/// The result of executing one block on top of its parent state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Receipts of the block's transactions, in order.
    pub receipts: Vec<Receipt>,
    /// Total gas consumed by the block.
    pub gas_used: u64,
    /// Root of the state trie after applying the block.
    pub state_root: B256,
}

/// Opaque "apply block, get resulting state root and receipts" capability.
///
/// The virtual machine computing state transitions lives behind this trait;
/// the sync engine only compares its outputs against header claims.
#[async_trait]
pub trait BlockExecutor: Send + Sync + std::fmt::Debug {
    /// Execute `body` under `header` on top of the parent's state.
    async fn execute(
        &self,
        header: &SealedHeader,
        body: &BlockBody,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Block execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The transition itself failed.
    #[error("execution of block {hash} failed: {message}")]
    ExecutionFailed {
        /// Hash of the failing block.
        hash: BlockHash,
        /// Backend-specific failure description.
        message: String,
    },
    /// The parent state needed to execute the block is unavailable.
    #[error("state for parent of block {hash} is unavailable")]
    MissingState {
        /// Hash of the block that could not be executed.
        hash: BlockHash,
    },
}
