use futures::{stream::FuturesUnordered, Future, Stream, StreamExt};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use strata_interfaces::{
    consensus::Consensus,
    p2p::{
        client::{HeadersClient, HeadersRequest},
        error::{DownloadError, DownloadResult, PeerRequestResult, RequestError},
    },
};
use strata_primitives::{BlockNumber, Header, PeerId, SealedHeader};
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

/// Configuration for the [`HeaderDownloader`].
#[derive(Debug, Clone)]
pub struct HeaderDownloaderConfig {
    /// Maximum headers requested in a single batch.
    pub batch_size: u64,
    /// Maximum batch requests in flight at once.
    pub max_concurrent_requests: usize,
    /// How many peers one batch may be attempted on before the stage fails.
    pub max_batch_retries: usize,
    /// Window without accepted headers after which the stream signals a
    /// stall.
    pub stall_timeout: Duration,
}

impl Default for HeaderDownloaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 192,
            max_concurrent_requests: 5,
            max_batch_retries: 5,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads headers for an ascending block range, in order.
///
/// The range is split into batches requested concurrently; responses are
/// reassembled by block number before validation, so consumers observe a
/// gap-free ascending sequence of headers that each passed ancestor linkage
/// and [`Consensus::validate_header`] against the previously accepted one.
#[derive(Debug)]
pub struct HeaderDownloader<H, C> {
    client: Arc<H>,
    consensus: Arc<C>,
    config: HeaderDownloaderConfig,
}

impl<H, C> HeaderDownloader<H, C>
where
    H: HeadersClient + 'static,
    C: Consensus + 'static,
{
    /// Create a downloader fetching through `client` and validating with
    /// `consensus`.
    pub fn new(client: Arc<H>, consensus: Arc<C>, config: HeaderDownloaderConfig) -> Self {
        Self { client, consensus, config }
    }

    /// Start a download of `(local_head.number, target]`.
    ///
    /// The stream is finite and not restartable once consumed.
    pub fn stream(&self, local_head: SealedHeader, target: BlockNumber) -> HeadersDownload<H, C> {
        let next = local_head.number + 1;
        HeadersDownload {
            client: Arc::clone(&self.client),
            consensus: Arc::clone(&self.consensus),
            config: self.config.clone(),
            last_accepted: local_head,
            target,
            next_request_start: next,
            next_yield: next,
            in_progress: FuturesUnordered::new(),
            buffered: BinaryHeap::new(),
            ready: VecDeque::new(),
            stall: Box::pin(tokio::time::sleep(self.config.stall_timeout)),
        }
    }
}

/// A batch request with its retry bookkeeping.
#[derive(Debug)]
struct BatchRequest {
    start: BlockNumber,
    limit: u64,
    /// Peers that already failed this batch.
    tried: Vec<PeerId>,
    attempt: usize,
}

/// A received batch waiting for its predecessors.
#[derive(Debug)]
struct BufferedBatch {
    start: BlockNumber,
    headers: Vec<SealedHeader>,
    peer: PeerId,
    tried: Vec<PeerId>,
    attempt: usize,
}

impl BufferedBatch {
    /// First block number past this batch.
    fn end(&self) -> BlockNumber {
        self.start + self.headers.len() as u64
    }
}

impl PartialEq for BufferedBatch {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for BufferedBatch {}

impl PartialOrd for BufferedBatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferedBatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.cmp(&other.start)
    }
}

type HeadersFut = Pin<Box<dyn Future<Output = (BatchRequest, PeerRequestResult<Vec<Header>>)> + Send>>;

/// An in-progress header download, yielding validated headers ascending by
/// block number.
#[must_use = "streams do nothing unless polled"]
pub struct HeadersDownload<H, C> {
    client: Arc<H>,
    consensus: Arc<C>,
    config: HeaderDownloaderConfig,
    /// Last header accepted and yielded, the linkage anchor for the next one.
    last_accepted: SealedHeader,
    target: BlockNumber,
    next_request_start: BlockNumber,
    next_yield: BlockNumber,
    in_progress: FuturesUnordered<HeadersFut>,
    buffered: BinaryHeap<Reverse<BufferedBatch>>,
    ready: VecDeque<SealedHeader>,
    stall: Pin<Box<Sleep>>,
}

impl<H, C> HeadersDownload<H, C>
where
    H: HeadersClient + 'static,
    C: Consensus + 'static,
{
    fn submit_request(&self, batch: BatchRequest) {
        trace!(
            target: "downloaders::headers",
            start = batch.start,
            limit = batch.limit,
            attempt = batch.attempt,
            "requesting headers"
        );
        let client = Arc::clone(&self.client);
        self.in_progress.push(Box::pin(async move {
            let request = HeadersRequest {
                start: batch.start,
                limit: batch.limit,
                exclude: batch.tried.clone(),
            };
            let result = client.get_headers(request).await;
            (batch, result)
        }));
    }

    /// Penalize the peer, then re-request the batch elsewhere or give up.
    fn retry_batch(
        &mut self,
        mut batch: BatchRequest,
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
            target: "downloaders::headers",
            %error,
            start = batch.start,
            attempt = batch.attempt,
            "invalid batch, retrying on another peer"
        );
        self.submit_request(batch);
        None
    }

    /// Handle one completed batch request. Returns a fatal error, if any.
    fn on_response(
        &mut self,
        batch: BatchRequest,
        result: PeerRequestResult<Vec<Header>>,
    ) -> Option<DownloadError> {
        let response = match result {
            Ok(response) => response,
            Err(RequestError::ChannelClosed) => return Some(DownloadError::Cancelled),
            Err(error) if error.is_retryable() => {
                // The distributor already rotated through untried peers.
                return Some(DownloadError::ExhaustedRetries)
            }
            Err(error) => return Some(error.into()),
        };
        let (peer, headers) = response.split();
        let headers: Vec<SealedHeader> = headers.into_iter().map(Header::seal).collect();

        if headers.is_empty() {
            return self.retry_batch(batch, peer, DownloadError::EmptyResponse)
        }
        if headers.len() as u64 > batch.limit {
            let error = DownloadError::TooManyItems {
                received: headers.len(),
                expected: batch.limit as usize,
            };
            return self.retry_batch(batch, peer, error)
        }
        if headers[0].number != batch.start {
            let error = DownloadError::HeadersResponseStartMismatch {
                received: headers[0].number,
                expected: batch.start,
            };
            return self.retry_batch(batch, peer, error)
        }
        if let Some(broken) = headers
            .windows(2)
            .find(|pair| pair[1].number != pair[0].number + 1 || pair[1].parent_hash != pair[0].hash())
        {
            let error = DownloadError::MismatchedHeaders {
                header_number: broken[1].number,
                header_hash: broken[1].hash(),
                parent_number: broken[0].number,
                parent_hash: broken[0].hash(),
            };
            return self.retry_batch(batch, peer, error)
        }

        // A short but well-formed response is accepted; the tail is
        // re-requested from scratch.
        if (headers.len() as u64) < batch.limit {
            let served = headers.len() as u64;
            self.submit_request(BatchRequest {
                start: batch.start + served,
                limit: batch.limit - served,
                tried: Vec::new(),
                attempt: 0,
            });
        }

        self.buffered.push(Reverse(BufferedBatch {
            start: batch.start,
            headers,
            peer,
            tried: batch.tried,
            attempt: batch.attempt,
        }));
        None
    }

    /// Validate and move contiguous buffered batches into the ready queue.
    fn drain_buffered(&mut self) -> Option<DownloadError> {
        let mut progressed = false;
        while self.buffered.peek().is_some_and(|Reverse(top)| top.start == self.next_yield) {
            let Reverse(batch) = self.buffered.pop().expect("peeked above");
            let end = batch.end();
            let BufferedBatch { headers, peer, mut tried, attempt, .. } = batch;

            for header in headers {
                let result = if header.number != self.last_accepted.number + 1 ||
                    header.parent_hash != self.last_accepted.hash()
                {
                    Err(DownloadError::MismatchedHeaders {
                        header_number: header.number,
                        header_hash: header.hash(),
                        parent_number: self.last_accepted.number,
                        parent_hash: self.last_accepted.hash(),
                    })
                } else {
                    self.consensus.validate_header(&header, &self.last_accepted).map_err(
                        |error| DownloadError::HeaderValidation { hash: header.hash(), error },
                    )
                };

                match result {
                    Ok(()) => {
                        self.next_yield = header.number + 1;
                        self.last_accepted = header.clone();
                        self.ready.push_back(header);
                        progressed = true;
                    }
                    Err(error) => {
                        self.client.report_bad_message(peer);
                        tried.push(peer);
                        let attempt = attempt + 1;
                        if attempt >= self.config.max_batch_retries {
                            return Some(error)
                        }
                        debug!(
                            target: "downloaders::headers",
                            %error,
                            start = self.next_yield,
                            attempt,
                            "header failed validation, refetching tail elsewhere"
                        );
                        self.submit_request(BatchRequest {
                            start: self.next_yield,
                            limit: end - self.next_yield,
                            tried,
                            attempt,
                        });
                        if progressed {
                            self.reset_stall();
                        }
                        return None
                    }
                }
            }
        }
        if progressed {
            self.reset_stall();
        }
        None
    }

    fn reset_stall(&mut self) {
        let deadline = Instant::now() + self.config.stall_timeout;
        self.stall.as_mut().reset(deadline);
    }
}

impl<H, C> Stream for HeadersDownload<H, C>
where
    H: HeadersClient + 'static,
    C: Consensus + 'static,
{
    type Item = DownloadResult<SealedHeader>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(header) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(header)))
            }

            if this.next_yield > this.target &&
                this.in_progress.is_empty() &&
                this.buffered.is_empty()
            {
                return Poll::Ready(None)
            }

            while this.in_progress.len() < this.config.max_concurrent_requests &&
                this.next_request_start <= this.target
            {
                let limit =
                    (this.target - this.next_request_start + 1).min(this.config.batch_size);
                let batch = BatchRequest {
                    start: this.next_request_start,
                    limit,
                    tried: Vec::new(),
                    attempt: 0,
                };
                this.next_request_start += limit;
                this.submit_request(batch);
            }

            match this.in_progress.poll_next_unpin(cx) {
                Poll::Ready(Some((batch, result))) => {
                    if let Some(fatal) = this.on_response(batch, result) {
                        return Poll::Ready(Some(Err(fatal)))
                    }
                    if let Some(fatal) = this.drain_buffered() {
                        return Poll::Ready(Some(Err(fatal)))
                    }
                    continue
                }
                Poll::Ready(None) | Poll::Pending => {}
            }

            if this.stall.as_mut().poll(cx).is_ready() {
                this.reset_stall();
                return Poll::Ready(Some(Err(DownloadError::Stalled)))
            }
            return Poll::Pending
        }
    }
}

impl<H, C> std::fmt::Debug for HeadersDownload<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadersDownload")
            .field("target", &self.target)
            .field("next_request_start", &self.next_request_start)
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
    use strata_interfaces::test_utils::{ChainFixture, TestConsensus, TestPeer};
    use strata_peers::{DistributorConfig, PeerRegistry, RegistryConfig, RequestDistributor};

    fn distributor_with_peers(
        chain: &Arc<ChainFixture>,
        delays: &[Duration],
    ) -> (Arc<RequestDistributor>, Vec<Arc<TestPeer>>) {
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor =
            Arc::new(RequestDistributor::new(registry, DistributorConfig::default()));
        let peers: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, delay)| {
                let peer =
                    Arc::new(TestPeer::new(i as u8 + 1, Arc::clone(chain)).with_delay(*delay));
                distributor.register_peer(peer.id(), Arc::clone(&peer) as _);
                peer
            })
            .collect();
        (distributor, peers)
    }

    #[tokio::test]
    async fn downloads_the_full_range_in_order() {
        let chain = Arc::new(ChainFixture::generate(50, 0));
        let (distributor, _peers) = distributor_with_peers(
            &chain,
            &[Duration::from_millis(5), Duration::from_millis(20)],
        );
        let downloader = HeaderDownloader::new(
            distributor,
            Arc::new(TestConsensus::default()),
            HeaderDownloaderConfig { batch_size: 7, ..Default::default() },
        );

        let mut stream = downloader.stream(chain.genesis().clone(), 50);
        let mut expected = 1;
        while let Some(result) = stream.next().await {
            let header = result.unwrap();
            assert_eq!(header.number, expected);
            assert_eq!(&header, chain.header(expected).unwrap());
            expected += 1;
        }
        assert_eq!(expected, 51);
    }

    #[tokio::test]
    async fn reassembles_out_of_order_batches() {
        // Peers with very different latencies complete batches out of order.
        let chain = Arc::new(ChainFixture::generate(40, 0));
        let (distributor, _peers) = distributor_with_peers(
            &chain,
            &[Duration::from_millis(1), Duration::from_millis(40), Duration::from_millis(80)],
        );
        let downloader = HeaderDownloader::new(
            distributor,
            Arc::new(TestConsensus::default()),
            HeaderDownloaderConfig { batch_size: 5, ..Default::default() },
        );

        let headers: Vec<_> = downloader
            .stream(chain.genesis().clone(), 40)
            .map(|result| result.unwrap())
            .collect()
            .await;
        let numbers: Vec<_> = headers.iter().map(|h| h.number).collect();
        assert_eq!(numbers, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn oversized_batches_are_retried_on_another_peer() {
        // The fixture extends past the target so the overserving peer always
        // has a surplus header to tack on.
        let chain = Arc::new(ChainFixture::generate(40, 0));
        let (distributor, peers) =
            distributor_with_peers(&chain, &[Duration::ZERO, Duration::from_millis(3)]);
        peers[0].set_overserve_headers(true);
        let downloader = HeaderDownloader::new(
            distributor,
            Arc::new(TestConsensus::default()),
            HeaderDownloaderConfig { batch_size: 8, ..Default::default() },
        );

        let headers: Vec<_> = downloader
            .stream(chain.genesis().clone(), 30)
            .map(|result| result.unwrap())
            .collect()
            .await;
        let numbers: Vec<_> = headers.iter().map(|h| h.number).collect();
        assert_eq!(numbers, (1..=30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_stream_when_already_at_target() {
        let chain = Arc::new(ChainFixture::generate(4, 0));
        let (distributor, _peers) = distributor_with_peers(&chain, &[Duration::ZERO]);
        let downloader = HeaderDownloader::new(
            distributor,
            Arc::new(TestConsensus::default()),
            HeaderDownloaderConfig::default(),
        );
        let head = chain.header(4).unwrap().clone();
        let headers: Vec<_> = downloader.stream(head, 4).collect().await;
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn stall_is_signalled_without_ending_the_stream() {
        let chain = Arc::new(ChainFixture::generate(6, 0));
        let (distributor, _peers) =
            distributor_with_peers(&chain, &[Duration::from_millis(300)]);
        let downloader = HeaderDownloader::new(
            distributor,
            Arc::new(TestConsensus::default()),
            HeaderDownloaderConfig {
                batch_size: 6,
                stall_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let mut stream = downloader.stream(chain.genesis().clone(), 6);
        assert_matches!(stream.next().await, Some(Err(DownloadError::Stalled)));
        // The slow batch eventually lands and the stream recovers.
        assert_matches!(stream.next().await, Some(Ok(header)) if header.number == 1);
    }

    #[tokio::test]
    async fn consensus_rejection_fails_the_stage_after_retries() {
        let chain = Arc::new(ChainFixture::generate(6, 0));
        let (distributor, _peers) = distributor_with_peers(
            &chain,
            &[Duration::ZERO, Duration::ZERO],
        );
        let consensus = Arc::new(TestConsensus::default());
        consensus.set_fail_validation(true);
        let downloader = HeaderDownloader::new(
            distributor,
            consensus,
            HeaderDownloaderConfig { batch_size: 6, max_batch_retries: 2, ..Default::default() },
        );

        let mut stream = downloader.stream(chain.genesis().clone(), 6);
        assert_matches!(
            stream.next().await,
            Some(Err(DownloadError::HeaderValidation { .. }))
        );
    }
}
