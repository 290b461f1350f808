use crate::{
    registry::{PeerRegistry, RequestKind},
    reputation::ReputationChangeKind,
};
use async_trait::async_trait;
use std::{future::Future, sync::Arc, time::Duration};
use strata_interfaces::p2p::{
    client::{
        BodiesClient, BodiesRequest, DownloadClient, HeadersClient, HeadersRequest,
        NodeDataClient, NodeDataRequest, ReceiptsClient, ReceiptsRequest,
    },
    error::{PeerRequestResult, RequestError, RequestResult},
    peer::PeerConnection,
};
use strata_primitives::{BlockBody, Bytes, Header, PeerId, Receipt, WithPeerId};
use tokio::{
    sync::{Notify, Semaphore},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Poll interval while waiting for a peer lease, so backoff windows that
/// expire without a release event are picked up.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the [`RequestDistributor`].
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Maximum requests in flight across all peers.
    pub max_outstanding_requests: usize,
    /// How many peers a single request may be attempted on before giving up.
    pub max_retries: usize,
    /// Deadline for header range requests.
    pub headers_timeout: Duration,
    /// Deadline for body requests.
    pub bodies_timeout: Duration,
    /// Deadline for receipt requests.
    pub receipts_timeout: Duration,
    /// Deadline for trie node requests.
    pub node_data_timeout: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_outstanding_requests: 64,
            max_retries: 5,
            headers_timeout: Duration::from_secs(10),
            bodies_timeout: Duration::from_secs(15),
            receipts_timeout: Duration::from_secs(15),
            node_data_timeout: Duration::from_secs(10),
        }
    }
}

impl DistributorConfig {
    const fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Headers => self.headers_timeout,
            RequestKind::Bodies => self.bodies_timeout,
            RequestKind::Receipts => self.receipts_timeout,
            RequestKind::NodeData => self.node_data_timeout,
        }
    }
}

/// Routes download requests to the best available peer.
///
/// The distributor enforces a global outstanding-request cap on top of the
/// registry's per-peer cap. Acquisition of a slot is first come first served;
/// waiters are re-evaluated whenever a request finishes or a peer is
/// registered. Completed requests feed their measured duration back into the
/// registry's throughput scorer, failed ones are retried on other peers with
/// the already-tried set excluded.
#[derive(Debug)]
pub struct RequestDistributor {
    registry: Arc<PeerRegistry>,
    config: DistributorConfig,
    slots: Arc<Semaphore>,
    peer_available: Notify,
    cancel: CancellationToken,
}

impl RequestDistributor {
    /// Create a distributor on top of the given registry.
    pub fn new(registry: Arc<PeerRegistry>, config: DistributorConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_outstanding_requests));
        Self { registry, config, slots, peer_available: Notify::new(), cancel: CancellationToken::new() }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Track a new peer session and wake pending acquisitions.
    pub fn register_peer(&self, peer_id: PeerId, connection: Arc<dyn PeerConnection>) {
        self.registry.register(peer_id, connection);
        self.peer_available.notify_waiters();
    }

    /// Remove a peer session.
    ///
    /// Requests currently leased to the peer are not interrupted; they
    /// observe their own transport error and are resubmitted elsewhere.
    pub fn unregister_peer(&self, peer_id: &PeerId) {
        self.registry.unregister(peer_id);
    }

    /// Abort all in-flight and waiting requests.
    ///
    /// Idempotent. Pending callers observe [`RequestError::ChannelClosed`].
    pub fn cancel_all(&self) {
        debug!(target: "peers", "cancelling all distributed requests");
        self.cancel.cancel();
        self.peer_available.notify_waiters();
    }

    /// Run one logical request to completion.
    ///
    /// Retries transport failures on other peers, excluding every peer that
    /// already failed this request, up to the configured attempt ceiling.
    /// The error returned after the ceiling is always retryable, so callers
    /// can map it to their own exhaustion error.
    async fn execute<T, F, Fut>(
        &self,
        kind: RequestKind,
        mut exclude: Vec<PeerId>,
        op: F,
        items: impl Fn(&T) -> usize,
    ) -> PeerRequestResult<T>
    where
        F: Fn(Arc<dyn PeerConnection>) -> Fut,
        Fut: Future<Output = RequestResult<T>>,
    {
        let mut last_error = RequestError::NoPeers;

        for attempt in 0..self.config.max_retries {
            if self.cancel.is_cancelled() {
                return Err(RequestError::ChannelClosed)
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => {
                    permit.map_err(|_| RequestError::ChannelClosed)?
                }
                _ = self.cancel.cancelled() => return Err(RequestError::ChannelClosed),
            };

            let (peer_id, connection) = loop {
                if !self.registry.has_candidate(&exclude) {
                    return Err(RequestError::NoPeers)
                }
                if let Some(lease) = self.registry.acquire(kind, &exclude) {
                    break lease
                }
                tokio::select! {
                    _ = self.peer_available.notified() => {}
                    _ = tokio::time::sleep(LEASE_POLL_INTERVAL) => {}
                    _ = self.cancel.cancelled() => return Err(RequestError::ChannelClosed),
                }
            };

            trace!(target: "peers", ?peer_id, %kind, attempt, "dispatching request");
            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(
                    self.config.timeout_for(kind),
                    op(Arc::clone(&connection)),
                ) => outcome,
                _ = self.cancel.cancelled() => {
                    self.registry.release(&peer_id);
                    drop(permit);
                    return Err(RequestError::ChannelClosed)
                }
            };
            let elapsed = started.elapsed();
            self.registry.release(&peer_id);
            drop(permit);
            self.peer_available.notify_waiters();

            let error = match outcome {
                Ok(Ok(response)) => {
                    self.registry.update_throughput(&peer_id, kind, items(&response), elapsed);
                    return Ok(WithPeerId::new(peer_id, response))
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => RequestError::Timeout,
            };

            debug!(target: "peers", ?peer_id, %kind, %error, "request attempt failed");
            match error {
                RequestError::Timeout => {
                    self.registry.penalize(&peer_id, ReputationChangeKind::Timeout);
                }
                RequestError::ConnectionDropped | RequestError::ChannelClosed => {
                    self.registry.penalize(&peer_id, ReputationChangeKind::Dropped);
                    self.registry.unregister(&peer_id);
                }
                RequestError::BadResponse | RequestError::NoPeers => {}
            }

            if !error.is_retryable() {
                return Err(error)
            }
            exclude.push(peer_id);
            last_error = error;
        }

        Err(last_error)
    }
}

impl DownloadClient for RequestDistributor {
    fn report_bad_message(&self, peer_id: PeerId) {
        self.registry.penalize(&peer_id, ReputationChangeKind::BadMessage);
    }

    fn num_connected_peers(&self) -> usize {
        self.registry.len()
    }
}

#[async_trait]
impl HeadersClient for RequestDistributor {
    async fn get_headers(&self, request: HeadersRequest) -> PeerRequestResult<Vec<Header>> {
        let HeadersRequest { start, limit, exclude } = request;
        self.execute(
            RequestKind::Headers,
            exclude,
            |connection| async move { connection.get_headers(start, limit).await },
            Vec::len,
        )
        .await
    }
}

#[async_trait]
impl BodiesClient for RequestDistributor {
    async fn get_block_bodies(
        &self,
        request: BodiesRequest,
    ) -> PeerRequestResult<Vec<BlockBody>> {
        let BodiesRequest { hashes, exclude } = request;
        self.execute(
            RequestKind::Bodies,
            exclude,
            |connection| {
                let hashes = hashes.clone();
                async move { connection.get_block_bodies(hashes).await }
            },
            Vec::len,
        )
        .await
    }
}

#[async_trait]
impl ReceiptsClient for RequestDistributor {
    async fn get_receipts(
        &self,
        request: ReceiptsRequest,
    ) -> PeerRequestResult<Vec<Vec<Receipt>>> {
        let ReceiptsRequest { hashes, exclude } = request;
        self.execute(
            RequestKind::Receipts,
            exclude,
            |connection| {
                let hashes = hashes.clone();
                async move { connection.get_receipts(hashes).await }
            },
            Vec::len,
        )
        .await
    }
}

#[async_trait]
impl NodeDataClient for RequestDistributor {
    async fn get_node_data(&self, request: NodeDataRequest) -> PeerRequestResult<Vec<Bytes>> {
        let NodeDataRequest { hashes, exclude } = request;
        self.execute(
            RequestKind::NodeData,
            exclude,
            |connection| {
                let hashes = hashes.clone();
                async move { connection.get_node_data(hashes).await }
            },
            Vec::len,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use assert_matches::assert_matches;
    use strata_interfaces::test_utils::{ChainFixture, TestPeer};

    fn setup(
        peer_count: u8,
        config: DistributorConfig,
    ) -> (Arc<ChainFixture>, Arc<RequestDistributor>, Vec<Arc<TestPeer>>) {
        let chain = Arc::new(ChainFixture::generate(8, 2));
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor = Arc::new(RequestDistributor::new(registry, config));
        let peers: Vec<_> = (1..=peer_count)
            .map(|i| {
                let peer = Arc::new(TestPeer::new(i, Arc::clone(&chain)));
                distributor.register_peer(peer.id(), Arc::clone(&peer) as _);
                peer
            })
            .collect();
        (chain, distributor, peers)
    }

    #[tokio::test]
    async fn serves_headers_and_tags_the_peer() {
        let (chain, distributor, peers) = setup(2, DistributorConfig::default());
        let response = distributor
            .get_headers(HeadersRequest { start: 1, limit: 4, exclude: vec![] })
            .await
            .unwrap();
        assert!(peers.iter().any(|p| p.id() == response.peer_id()));
        let (peer_id, headers) = response.split();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[0].clone().seal(), *chain.header(1).unwrap());
        assert!(distributor.registry().throughput(&peer_id, RequestKind::Headers).unwrap() > 0.0);
    }

    #[tokio::test]
    async fn retries_a_dead_peer_on_another() {
        let (chain, distributor, peers) = setup(2, DistributorConfig::default());
        peers[0].set_timeout(true);

        let response = distributor
            .get_block_bodies(BodiesRequest {
                hashes: vec![chain.header(1).unwrap().hash()],
                exclude: vec![],
            })
            .await
            .unwrap();
        assert_eq!(response.peer_id(), peers[1].id());

        // If the dead peer was tried first it must have been penalized.
        if let Some(reputation) = distributor.registry().reputation(&peers[0].id()) {
            if peers[0].request_count() > 0 {
                assert!(reputation < 0);
            }
        }
    }

    #[tokio::test]
    async fn lone_failing_peer_exhausts_with_a_retryable_error() {
        let (chain, distributor, peers) = setup(1, DistributorConfig::default());
        peers[0].set_timeout(true);

        let result = distributor
            .get_receipts(ReceiptsRequest {
                hashes: vec![chain.header(1).unwrap().hash()],
                exclude: vec![],
            })
            .await;
        assert_matches!(result, Err(error) if error.is_retryable());
    }

    #[tokio::test]
    async fn excluded_peers_are_never_selected() {
        let (chain, distributor, peers) = setup(2, DistributorConfig::default());
        let response = distributor
            .get_headers(HeadersRequest { start: 1, limit: 2, exclude: vec![peers[0].id()] })
            .await
            .unwrap();
        assert_eq!(response.peer_id(), peers[1].id());
        assert_eq!(peers[0].request_count(), 0);
        assert_eq!(chain.len(), 8);
    }

    #[tokio::test]
    async fn cancel_unblocks_in_flight_and_waiting_requests() {
        let config = DistributorConfig { max_outstanding_requests: 1, ..Default::default() };
        let chain = Arc::new(ChainFixture::generate(4, 0));
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor = Arc::new(RequestDistributor::new(registry, config));
        let peer = Arc::new(
            TestPeer::new(1, Arc::clone(&chain)).with_delay(Duration::from_secs(5)),
        );
        distributor.register_peer(peer.id(), Arc::clone(&peer) as _);

        let in_flight = tokio::spawn({
            let distributor = Arc::clone(&distributor);
            async move {
                distributor.get_headers(HeadersRequest { start: 1, limit: 1, exclude: vec![] }).await
            }
        });
        let waiting = tokio::spawn({
            let distributor = Arc::clone(&distributor);
            async move {
                distributor.get_headers(HeadersRequest { start: 2, limit: 1, exclude: vec![] }).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        distributor.cancel_all();

        assert_matches!(in_flight.await.unwrap(), Err(RequestError::ChannelClosed));
        assert_matches!(waiting.await.unwrap(), Err(RequestError::ChannelClosed));
    }

    #[tokio::test]
    async fn bad_message_report_lowers_reputation() {
        let (_, distributor, peers) = setup(1, DistributorConfig::default());
        distributor.report_bad_message(peers[0].id());
        assert!(distributor.registry().reputation(&peers[0].id()).unwrap() < 0);
        assert_eq!(distributor.num_connected_peers(), 1);
    }
}
