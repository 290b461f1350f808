use crate::p2p::error::PeerRequestResult;
use async_trait::async_trait;
use strata_primitives::{BlockBody, BlockNumber, Bytes, Header, PeerId, Receipt, B256};

/// Generic download client for peer penalization.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait DownloadClient: Send + Sync + std::fmt::Debug {
    /// Penalize the peer for responding with a message that violates
    /// validation rules.
    fn report_bad_message(&self, peer_id: PeerId);

    /// Returns how many sync-capable peers are currently connected.
    fn num_connected_peers(&self) -> usize;
}

/// A request for a contiguous, ascending range of headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadersRequest {
    /// First block number of the range.
    pub start: BlockNumber,
    /// Maximum number of headers to return.
    pub limit: u64,
    /// Peers that already failed this task and must not be selected again.
    pub exclude: Vec<PeerId>,
}

/// A request for the bodies of the given blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodiesRequest {
    /// Hashes of the blocks whose bodies are wanted, ascending by number.
    pub hashes: Vec<B256>,
    /// Peers that already failed this task and must not be selected again.
    pub exclude: Vec<PeerId>,
}

/// A request for the receipt lists of the given blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiptsRequest {
    /// Hashes of the blocks whose receipts are wanted, ascending by number.
    pub hashes: Vec<B256>,
    /// Peers that already failed this task and must not be selected again.
    pub exclude: Vec<PeerId>,
}

/// A request for raw trie nodes or contract code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeDataRequest {
    /// Hashes of the wanted nodes.
    pub hashes: Vec<B256>,
    /// Peers that already failed this task and must not be selected again.
    pub exclude: Vec<PeerId>,
}

/// A client capable of downloading block headers.
#[async_trait]
pub trait HeadersClient: DownloadClient {
    /// Fetch a batch of headers, selecting a suitable peer.
    async fn get_headers(&self, request: HeadersRequest) -> PeerRequestResult<Vec<Header>>;
}

/// A client capable of downloading block bodies.
#[async_trait]
pub trait BodiesClient: DownloadClient {
    /// Fetch the bodies for the requested blocks, selecting a suitable peer.
    async fn get_block_bodies(&self, request: BodiesRequest)
        -> PeerRequestResult<Vec<BlockBody>>;
}

/// A client capable of downloading receipt lists.
#[async_trait]
pub trait ReceiptsClient: DownloadClient {
    /// Fetch the receipts for the requested blocks, selecting a suitable peer.
    async fn get_receipts(&self, request: ReceiptsRequest)
        -> PeerRequestResult<Vec<Vec<Receipt>>>;
}

/// A client capable of downloading raw trie nodes and code.
#[async_trait]
pub trait NodeDataClient: DownloadClient {
    /// Fetch the requested trie nodes, selecting a suitable peer.
    async fn get_node_data(&self, request: NodeDataRequest) -> PeerRequestResult<Vec<Bytes>>;
}
