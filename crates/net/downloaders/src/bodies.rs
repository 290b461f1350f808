use futures::{stream::FuturesUnordered, Future, Stream, StreamExt};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    ops::RangeInclusive,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use strata_interfaces::{
    consensus::ConsensusError,
    p2p::{
        client::{BodiesClient, BodiesRequest},
        error::{DownloadError, DownloadResult, PeerRequestResult, RequestError},
    },
    provider::{HeaderProvider, ProviderError},
};
use strata_primitives::{BlockBody, BlockNumber, PeerId, SealedBlock, SealedHeader};
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

/// The block response of the body downloader.
///
/// Headers whose body is known to be empty are answered locally and never hit
/// the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockResponse {
    /// A block with a non-empty body.
    Full(SealedBlock),
    /// A block whose header says it has nothing to fetch.
    Empty(SealedHeader),
}

impl BlockResponse {
    /// The header of this block.
    pub fn header(&self) -> &SealedHeader {
        match self {
            Self::Full(block) => &block.header,
            Self::Empty(header) => header,
        }
    }

    /// Block number of this block.
    pub fn number(&self) -> BlockNumber {
        self.header().number
    }

    /// Convert into a sealed block, attaching an empty body if necessary.
    pub fn into_block(self) -> SealedBlock {
        match self {
            Self::Full(block) => block,
            Self::Empty(header) => SealedBlock::new(header, BlockBody::default()),
        }
    }
}

/// Configuration for the [`BodyDownloader`].
#[derive(Debug, Clone)]
pub struct BodyDownloaderConfig {
    /// Maximum blocks covered by a single batch request.
    pub batch_size: usize,
    /// Maximum batch requests in flight at once.
    pub max_concurrent_requests: usize,
    /// How many peers one batch may be attempted on before the stage fails.
    pub max_batch_retries: usize,
    /// Window without completed blocks after which the stream signals a
    /// stall.
    pub stall_timeout: Duration,
}

impl Default for BodyDownloaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_concurrent_requests: 5,
            max_batch_retries: 5,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads block bodies for a range of locally accepted headers.
///
/// Every fetched body is cross-checked against its header before it is
/// yielded: the recomputed transaction root and ommers root must match the
/// header's declared roots, otherwise the supplying peer is penalized and the
/// batch is retried against a different peer.
#[derive(Debug)]
pub struct BodyDownloader<B, P> {
    client: Arc<B>,
    provider: Arc<P>,
    config: BodyDownloaderConfig,
}

impl<B, P> BodyDownloader<B, P>
where
    B: BodiesClient + 'static,
    P: HeaderProvider + 'static,
{
    /// Create a downloader reading headers from `provider` and fetching
    /// bodies through `client`.
    pub fn new(client: Arc<B>, provider: Arc<P>, config: BodyDownloaderConfig) -> Self {
        Self { client, provider, config }
    }

    /// Start a download over the accepted header range.
    ///
    /// The stream yields one [`BlockResponse`] per block, strictly ascending.
    pub fn stream(&self, range: RangeInclusive<BlockNumber>) -> BodiesDownload<B, P> {
        BodiesDownload {
            client: Arc::clone(&self.client),
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            next_to_schedule: *range.start(),
            range_end: *range.end(),
            next_yield: *range.start(),
            in_progress: FuturesUnordered::new(),
            buffered: BinaryHeap::new(),
            ready: VecDeque::new(),
            stall: Box::pin(tokio::time::sleep(self.config.stall_timeout)),
            failed: None,
        }
    }
}

/// A batch of contiguous headers whose bodies are being fetched.
#[derive(Debug)]
struct BodyBatch {
    headers: Vec<SealedHeader>,
    tried: Vec<PeerId>,
    attempt: usize,
}

impl BodyBatch {
    fn start(&self) -> BlockNumber {
        self.headers[0].number
    }

    /// Hashes of the headers that actually need a network request.
    fn request_hashes(&self) -> Vec<strata_primitives::B256> {
        self.headers.iter().filter(|h| !h.is_empty()).map(|h| h.hash()).collect()
    }
}

/// A completed batch waiting for its predecessors.
#[derive(Debug)]
struct BufferedBodies {
    start: BlockNumber,
    blocks: Vec<BlockResponse>,
}

impl PartialEq for BufferedBodies {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for BufferedBodies {}

impl PartialOrd for BufferedBodies {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferedBodies {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.cmp(&other.start)
    }
}

type BodiesFut = Pin<Box<dyn Future<Output = (BodyBatch, PeerRequestResult<Vec<BlockBody>>)> + Send>>;

/// An in-progress body download, yielding [`BlockResponse`]s ascending by
/// block number.
#[must_use = "streams do nothing unless polled"]
pub struct BodiesDownload<B, P> {
    client: Arc<B>,
    provider: Arc<P>,
    config: BodyDownloaderConfig,
    next_to_schedule: BlockNumber,
    range_end: BlockNumber,
    next_yield: BlockNumber,
    in_progress: FuturesUnordered<BodiesFut>,
    buffered: BinaryHeap<Reverse<BufferedBodies>>,
    ready: VecDeque<BlockResponse>,
    stall: Pin<Box<Sleep>>,
    /// Storage failure observed while reading headers; yielded once.
    failed: Option<DownloadError>,
}

impl<B, P> BodiesDownload<B, P>
where
    B: BodiesClient + 'static,
    P: HeaderProvider + 'static,
{
    fn submit_request(&self, batch: BodyBatch) {
        let hashes = batch.request_hashes();
        trace!(
            target: "downloaders::bodies",
            start = batch.start(),
            blocks = batch.headers.len(),
            requested = hashes.len(),
            attempt = batch.attempt,
            "requesting bodies"
        );
        let client = Arc::clone(&self.client);
        let exclude = batch.tried.clone();
        self.in_progress.push(Box::pin(async move {
            let result = client.get_block_bodies(BodiesRequest { hashes, exclude }).await;
            (batch, result)
        }));
    }

    /// Read the next chunk of accepted headers and schedule its batch.
    ///
    /// Chunks consisting solely of empty headers complete locally.
    fn schedule_next_batch(&mut self) -> Result<bool, DownloadError> {
        if self.next_to_schedule > self.range_end {
            return Ok(false)
        }
        let end = (self.next_to_schedule + self.config.batch_size as u64 - 1).min(self.range_end);
        let headers = self.provider.sealed_headers_range(self.next_to_schedule..end + 1)?;
        if headers.is_empty() || headers[0].number != self.next_to_schedule {
            // The accepted range must be gap-free; a miss is a local storage
            // fault, not a peer fault.
            return Err(DownloadError::Provider(ProviderError::HeaderNotFound {
                number: self.next_to_schedule,
            }))
        }
        self.next_to_schedule = headers.last().expect("non-empty").number + 1;

        if headers.iter().all(|header| header.is_empty()) {
            let start = headers[0].number;
            let blocks = headers.into_iter().map(BlockResponse::Empty).collect();
            self.buffered.push(Reverse(BufferedBodies { start, blocks }));
        } else {
            self.submit_request(BodyBatch { headers, tried: Vec::new(), attempt: 0 });
        }
        Ok(true)
    }

    fn retry_batch(
        &mut self,
        mut batch: BodyBatch,
        peer: PeerId,
        error: DownloadError,
    ) -> Option<DownloadError> {
        self.client.report_bad_message(peer);
        batch.tried.push(peer);
        batch.attempt += 1;
        if batch.attempt >= self.config.max_batch_retries {
            return Some(error)
        }
        debug!(
            target: "downloaders::bodies",
            %error,
            start = batch.start(),
            attempt = batch.attempt,
            "invalid bodies, retrying on another peer"
        );
        self.submit_request(batch);
        None
    }

    fn on_response(
        &mut self,
        batch: BodyBatch,
        result: PeerRequestResult<Vec<BlockBody>>,
    ) -> Option<DownloadError> {
        let response = match result {
            Ok(response) => response,
            Err(RequestError::ChannelClosed) => return Some(DownloadError::Cancelled),
            Err(error) if error.is_retryable() => return Some(DownloadError::ExhaustedRetries),
            Err(error) => return Some(error.into()),
        };
        let (peer, bodies) = response.split();
        let requested = batch.request_hashes().len();

        if bodies.is_empty() {
            return self.retry_batch(batch, peer, DownloadError::EmptyResponse)
        }
        if bodies.len() > requested {
            return self.retry_batch(
                batch,
                peer,
                DownloadError::TooManyItems { received: bodies.len(), expected: requested },
            )
        }

        let start = batch.start();
        let mut blocks = Vec::with_capacity(batch.headers.len());
        let mut bodies = bodies.into_iter();
        let mut headers = batch.headers.iter();

        while let Some(header) = headers.next() {
            if header.is_empty() {
                blocks.push(BlockResponse::Empty(header.clone()));
                continue
            }
            let Some(body) = bodies.next() else {
                // Partial but well-formed response; refetch the tail without
                // blaming the peer.
                let tail: Vec<_> =
                    std::iter::once(header.clone()).chain(headers.cloned()).collect();
                self.submit_request(BodyBatch {
                    headers: tail,
                    tried: batch.tried.clone(),
                    attempt: batch.attempt,
                });
                break
            };
            if let Err(error) = validate_body(header, &body) {
                let hash = header.hash();
                let tail: Vec<_> =
                    std::iter::once(header.clone()).chain(headers.cloned()).collect();
                let fatal = self.retry_batch(
                    BodyBatch { headers: tail, tried: batch.tried.clone(), attempt: batch.attempt },
                    peer,
                    DownloadError::BodyValidation { hash, error },
                );
                if fatal.is_some() {
                    return fatal
                }
                break
            }
            blocks.push(BlockResponse::Full(SealedBlock::new(header.clone(), body)));
        }

        if !blocks.is_empty() {
            self.buffered.push(Reverse(BufferedBodies { start, blocks }));
        }
        None
    }

    fn drain_buffered(&mut self) {
        let mut progressed = false;
        while self.buffered.peek().is_some_and(|Reverse(top)| top.start == self.next_yield) {
            let Reverse(batch) = self.buffered.pop().expect("peeked above");
            self.next_yield = batch.start + batch.blocks.len() as u64;
            self.ready.extend(batch.blocks);
            progressed = true;
        }
        if progressed {
            let deadline = Instant::now() + self.config.stall_timeout;
            self.stall.as_mut().reset(deadline);
        }
    }
}

/// Cross-check a fetched body against the accepted header it belongs to.
fn validate_body(header: &SealedHeader, body: &BlockBody) -> Result<(), ConsensusError> {
    let ommers_hash = body.calculate_ommers_root();
    if ommers_hash != header.ommers_hash {
        return Err(ConsensusError::BodyOmmersHashDiff {
            got: ommers_hash,
            expected: header.ommers_hash,
        })
    }
    let transactions_root = body.calculate_tx_root();
    if transactions_root != header.transactions_root {
        return Err(ConsensusError::BodyTransactionRootDiff {
            got: transactions_root,
            expected: header.transactions_root,
        })
    }
    Ok(())
}

impl<B, P> Stream for BodiesDownload<B, P>
where
    B: BodiesClient + 'static,
    P: HeaderProvider + 'static,
{
    type Item = DownloadResult<BlockResponse>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(error) = this.failed.take() {
                return Poll::Ready(Some(Err(error)))
            }
            if let Some(block) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(block)))
            }

            if this.next_yield > this.range_end &&
                this.in_progress.is_empty() &&
                this.buffered.is_empty()
            {
                return Poll::Ready(None)
            }

            while this.in_progress.len() < this.config.max_concurrent_requests &&
                this.next_to_schedule <= this.range_end
            {
                match this.schedule_next_batch() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(error) => {
                        this.failed = Some(error);
                        break
                    }
                }
            }
            if this.failed.is_some() {
                continue
            }
            this.drain_buffered();
            if !this.ready.is_empty() {
                continue
            }

            match this.in_progress.poll_next_unpin(cx) {
                Poll::Ready(Some((batch, result))) => {
                    if let Some(fatal) = this.on_response(batch, result) {
                        return Poll::Ready(Some(Err(fatal)))
                    }
                    this.drain_buffered();
                    continue
                }
                Poll::Ready(None) | Poll::Pending => {}
            }

            if this.stall.as_mut().poll(cx).is_ready() {
                let deadline = Instant::now() + this.config.stall_timeout;
                this.stall.as_mut().reset(deadline);
                return Poll::Ready(Some(Err(DownloadError::Stalled)))
            }
            return Poll::Pending
        }
    }
}

impl<B, P> std::fmt::Debug for BodiesDownload<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodiesDownload")
            .field("next_to_schedule", &self.next_to_schedule)
            .field("range_end", &self.range_end)
            .field("next_yield", &self.next_yield)
            .field("in_progress", &self.in_progress.len())
            .field("buffered", &self.buffered.len())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strata_interfaces::test_utils::{ChainFixture, TestPeer, TestStorage};
    use strata_peers::{DistributorConfig, PeerRegistry, RegistryConfig, RequestDistributor};

    fn storage_with_headers(chain: &ChainFixture) -> Arc<TestStorage> {
        use strata_interfaces::provider::ChainStorage;
        let storage = Arc::new(TestStorage::with_genesis(chain.genesis().clone()));
        for number in 1..=chain.len() {
            storage
                .write_block(chain.validated_block(number), chain.total_difficulty(number))
                .unwrap();
        }
        storage
    }

    fn distributor_with_peers(
        chain: &Arc<ChainFixture>,
        count: u8,
    ) -> (Arc<RequestDistributor>, Vec<Arc<TestPeer>>) {
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor =
            Arc::new(RequestDistributor::new(registry, DistributorConfig::default()));
        let peers: Vec<_> = (1..=count)
            .map(|i| {
                let peer = Arc::new(TestPeer::new(i, Arc::clone(chain)));
                distributor.register_peer(peer.id(), Arc::clone(&peer) as _);
                peer
            })
            .collect();
        (distributor, peers)
    }

    #[tokio::test]
    async fn downloads_bodies_in_order_with_empty_shortcuts() {
        let chain = Arc::new(ChainFixture::generate(30, 2));
        let storage = storage_with_headers(&chain);
        let (distributor, _peers) = distributor_with_peers(&chain, 2);
        let downloader = BodyDownloader::new(
            distributor,
            storage,
            BodyDownloaderConfig { batch_size: 7, ..Default::default() },
        );

        let blocks: Vec<_> =
            downloader.stream(1..=30).map(|result| result.unwrap()).collect().await;
        assert_eq!(blocks.len(), 30);
        for (i, block) in blocks.iter().enumerate() {
            let number = i as u64 + 1;
            assert_eq!(block.number(), number);
            let header = chain.header(number).unwrap();
            match block {
                BlockResponse::Empty(h) => {
                    assert!(h.is_empty());
                    assert_eq!(h, header);
                }
                BlockResponse::Full(full) => {
                    assert!(!full.header.is_empty());
                    assert_eq!(&full.body, chain.body(&header.hash()).unwrap());
                }
            }
        }
    }

    #[tokio::test]
    async fn corrupt_bodies_are_refetched_from_another_peer() {
        let chain = Arc::new(ChainFixture::generate(12, 3));
        let storage = storage_with_headers(&chain);
        let (distributor, peers) = distributor_with_peers(&chain, 2);
        peers[0].set_corrupt_bodies(true);
        let downloader = BodyDownloader::new(
            Arc::clone(&distributor),
            storage,
            BodyDownloaderConfig { batch_size: 12, ..Default::default() },
        );

        let blocks: Vec<_> =
            downloader.stream(1..=12).map(|result| result.unwrap()).collect().await;
        assert_eq!(blocks.len(), 12);

        // The corrupt peer is penalized once its batch fails the root check.
        if peers[0].request_count() > 0 {
            let reputation = distributor.registry().reputation(&peers[0].id());
            assert!(reputation.is_none() || reputation.unwrap() < 0);
        }
    }

    #[tokio::test]
    async fn lone_corrupt_peer_exhausts_the_stage() {
        let chain = Arc::new(ChainFixture::generate(6, 3));
        let storage = storage_with_headers(&chain);
        let (distributor, peers) = distributor_with_peers(&chain, 1);
        peers[0].set_corrupt_bodies(true);
        let downloader = BodyDownloader::new(
            distributor,
            storage,
            BodyDownloaderConfig { batch_size: 6, max_batch_retries: 3, ..Default::default() },
        );

        let mut stream = downloader.stream(1..=6);
        let mut saw_failure = false;
        while let Some(result) = stream.next().await {
            if let Err(error) = result {
                assert!(error.is_fatal());
                assert_matches!(
                    error,
                    DownloadError::BodyValidation { .. } | DownloadError::ExhaustedRetries
                );
                saw_failure = true;
                break
            }
        }
        assert!(saw_failure);
    }
}
