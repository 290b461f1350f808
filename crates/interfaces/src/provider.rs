use std::ops::Range;
use strata_primitives::{
    BlockHash, BlockNumber, Bytes, ChainInfo, SealedHeader, ValidatedBlock, B256, U256,
};
use thiserror::Error;

/// Result alias for storage access.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Storage access errors.
///
/// These are resource failures: fatal to the sync session and propagated to
/// the process-level caller, never retried against peers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The storage backend failed.
    #[error("storage backend failure: {message}")]
    StorageFailure {
        /// Backend-specific failure description.
        message: String,
    },
    /// A header expected to be present was not found.
    #[error("header for block #{number} is missing from storage")]
    HeaderNotFound {
        /// Number of the missing header.
        number: BlockNumber,
    },
}

/// Read access to locally stored headers.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeaderProvider: Send + Sync {
    /// Get a sealed header by hash.
    fn sealed_header(&self, hash: &BlockHash) -> ProviderResult<Option<SealedHeader>>;

    /// Get a canonical sealed header by number.
    fn sealed_header_by_number(&self, number: BlockNumber)
        -> ProviderResult<Option<SealedHeader>>;

    /// Get the gap-free canonical header range `[start, end)`.
    ///
    /// Returns fewer headers if the upper bound exceeds the stored chain.
    fn sealed_headers_range(&self, range: Range<BlockNumber>)
        -> ProviderResult<Vec<SealedHeader>>;

    /// Whether a header with this hash is known at all.
    fn is_known(&self, hash: &BlockHash) -> ProviderResult<bool>;
}

/// The canonical chain store.
///
/// Only the committing stage of a sync session writes blocks; writes are
/// strictly sequential by block number.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait ChainStorage: HeaderProvider {
    /// Current canonical head and cumulative fork-choice weight.
    fn chain_info(&self) -> ProviderResult<ChainInfo>;

    /// Whether the full block (header and body) is stored.
    fn has_block(&self, hash: &BlockHash, number: BlockNumber) -> ProviderResult<bool>;

    /// Whether the post-state of the block with this hash is available.
    fn has_state(&self, hash: &BlockHash) -> ProviderResult<bool>;

    /// Store an accepted header without marking it canonical.
    fn write_header(&self, header: SealedHeader) -> ProviderResult<()>;

    /// Commit a validated block as the new canonical head.
    ///
    /// `total_difficulty` is the cumulative weight up to and including this
    /// block.
    fn write_block(&self, block: ValidatedBlock, total_difficulty: U256) -> ProviderResult<()>;
}

/// Storage for raw trie nodes and contract code fetched during state sync.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait TrieNodeStore: Send + Sync {
    /// Whether a node with this hash is already present.
    fn contains(&self, hash: &B256) -> ProviderResult<bool>;

    /// Store a hash-verified trie node or code blob.
    fn put(&self, hash: B256, bytes: Bytes) -> ProviderResult<()>;
}
