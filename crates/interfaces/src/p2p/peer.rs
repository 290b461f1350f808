use crate::p2p::error::RequestResult;
use async_trait::async_trait;
use strata_primitives::{BlockBody, BlockNumber, Bytes, Header, Receipt, B256, U256};

/// Reason supplied to a peer when tearing down its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer is of no use to the syncer.
    UselessPeer,
    /// The peer violated the protocol (mismatched or malformed data).
    ProtocolViolation,
    /// The peer repeatedly failed to answer in time.
    Timeouts,
}

/// The chain head a peer announced during its handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnouncedHead {
    /// Hash of the peer's best block.
    pub hash: B256,
    /// Number of the peer's best block.
    pub number: BlockNumber,
    /// Cumulative fork-choice weight the peer claims for its head.
    pub total_difficulty: U256,
}

/// One live, sync-capable peer session.
///
/// The transport (handshake, encryption, framing) lives behind this trait.
/// Implementations answer typed requests; deadlines are enforced by the
/// caller, not the connection.
#[async_trait]
pub trait PeerConnection: Send + Sync + std::fmt::Debug {
    /// Request up to `limit` contiguous headers ascending from `start`.
    async fn get_headers(&self, start: BlockNumber, limit: u64) -> RequestResult<Vec<Header>>;

    /// Request the bodies for the given block hashes.
    async fn get_block_bodies(&self, hashes: Vec<B256>) -> RequestResult<Vec<BlockBody>>;

    /// Request the receipt lists for the given block hashes.
    async fn get_receipts(&self, hashes: Vec<B256>) -> RequestResult<Vec<Vec<Receipt>>>;

    /// Request raw trie nodes or contract code by hash.
    async fn get_node_data(&self, hashes: Vec<B256>) -> RequestResult<Vec<Bytes>>;

    /// Tear the session down.
    fn disconnect(&self, reason: DisconnectReason);
}
