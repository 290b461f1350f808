use crate::{consensus::ConsensusError, provider::ProviderError};
use strata_primitives::{BlockHash, BlockNumber, WithPeerId, B256};
use thiserror::Error;

/// Result alias for one request against one peer.
pub type RequestResult<T> = Result<T, RequestError>;

/// Result of a distributed request, tagged with the peer that served it.
pub type PeerRequestResult<T> = RequestResult<WithPeerId<T>>;

/// Error variants that can happen when requesting data from a single peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Channel to the peer's session task closed.
    #[error("closed channel to the peer")]
    ChannelClosed,
    /// The connection dropped while the request was in flight.
    #[error("connection to a peer dropped while handling the request")]
    ConnectionDropped,
    /// No response arrived within the configured timeout.
    #[error("request timed out while awaiting response")]
    Timeout,
    /// The peer answered with something malformed or unrelated.
    #[error("received bad response")]
    BadResponse,
    /// No sync-capable peer is available to serve the request.
    #[error("no peer available for the request")]
    NoPeers,
}

impl RequestError {
    /// Whether retrying the request elsewhere can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionDropped | Self::NoPeers)
    }
}

/// The download result type.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// The downloader error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /* ==================== HEADER ERRORS ==================== */
    /// Header validation failed.
    #[error("failed to validate header {hash}: {error}")]
    HeaderValidation {
        /// Hash of the header failing validation.
        hash: BlockHash,
        /// The details of the validation failure.
        #[source]
        error: ConsensusError,
    },
    /// The header does not have the parent's hash as its parent-hash field,
    /// or the block numbers are not sequential.
    #[error("header {header_number} ({header_hash}) does not extend parent {parent_number} ({parent_hash})")]
    MismatchedHeaders {
        /// Number of the header being evaluated.
        header_number: BlockNumber,
        /// Hash of the header being evaluated.
        header_hash: BlockHash,
        /// Number of the supposed parent.
        parent_number: BlockNumber,
        /// Hash of the supposed parent.
        parent_hash: BlockHash,
    },
    /// Response to a range request starts at the wrong block.
    #[error("headers response starts at unexpected block {received}, expected {expected}")]
    HeadersResponseStartMismatch {
        /// First block number in the response.
        received: BlockNumber,
        /// Requested start of the range.
        expected: BlockNumber,
    },
    /* ==================== BODY / RECEIPT ERRORS ==================== */
    /// Body cross-check against its accepted header failed.
    #[error("failed to validate body for header {hash}: {error}")]
    BodyValidation {
        /// Hash of the paired header.
        hash: BlockHash,
        /// The details of the validation failure.
        #[source]
        error: ConsensusError,
    },
    /// Receipt cross-check against its accepted header failed.
    #[error("failed to validate receipts for header {hash}: {error}")]
    ReceiptValidation {
        /// Hash of the paired header.
        hash: BlockHash,
        /// The details of the validation failure.
        #[source]
        error: ConsensusError,
    },
    /// Received more items than requested.
    #[error("received {received} items, requested {expected}")]
    TooManyItems {
        /// How many items the peer sent.
        received: usize,
        /// How many items were requested.
        expected: usize,
    },
    /* ==================== STATE ERRORS ==================== */
    /// A fetched trie node does not hash to the requested hash.
    #[error("trie node content does not match requested hash {hash}")]
    NodeHashMismatch {
        /// The hash the node was requested under.
        hash: B256,
    },
    /// A fetched trie node could not be decoded.
    #[error("failed to decode trie node {hash}")]
    InvalidTrieNode {
        /// Hash of the undecodable node.
        hash: B256,
    },
    /* ==================== COMMON ERRORS ==================== */
    /// Received an empty response while expecting items.
    #[error("received empty response")]
    EmptyResponse,
    /// A task exceeded its retry ceiling across all peers.
    #[error("exhausted retries for the request")]
    ExhaustedRetries,
    /// No batch completed within the stage's stall window.
    ///
    /// A soft failure: the stream stays usable and the stage may recover.
    #[error("no download progress within the stall window")]
    Stalled,
    /// The session was cancelled while the download was in flight.
    #[error("download cancelled")]
    Cancelled,
    /// Error while executing the request.
    #[error(transparent)]
    RequestError(#[from] RequestError),
    /// Local storage failed while reading accepted data.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl DownloadError {
    /// Whether the error terminates the stream it was yielded from.
    ///
    /// [`DownloadError::Stalled`] is a soft signal; everything else ends the
    /// download.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Stalled)
    }
}
