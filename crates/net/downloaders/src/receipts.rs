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
        client::{ReceiptsClient, ReceiptsRequest},
        error::{DownloadError, DownloadResult, PeerRequestResult, RequestError},
    },
    provider::{HeaderProvider, ProviderError},
};
use strata_primitives::{
    constants::EMPTY_ROOT, proofs, BlockNumber, PeerId, Receipt, SealedHeader,
};
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

/// The receipts of one block, paired with its accepted header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReceipts {
    /// The accepted header the receipts belong to.
    pub header: SealedHeader,
    /// The block's receipts, in transaction order. Empty for empty blocks.
    pub receipts: Vec<Receipt>,
}

impl BlockReceipts {
    /// Block number of this entry.
    pub fn number(&self) -> BlockNumber {
        self.header.number
    }
}

/// Configuration for the [`ReceiptDownloader`].
#[derive(Debug, Clone)]
pub struct ReceiptDownloaderConfig {
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

impl Default for ReceiptDownloaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_concurrent_requests: 5,
            max_batch_retries: 5,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads receipt lists for a range of locally accepted headers.
///
/// The receipt root recomputed from each fetched list must equal the paired
/// header's `receipts_root` before anything is yielded. Blocks whose header
/// declares the empty receipt root are answered locally.
#[derive(Debug)]
pub struct ReceiptDownloader<R, P> {
    client: Arc<R>,
    provider: Arc<P>,
    config: ReceiptDownloaderConfig,
}

impl<R, P> ReceiptDownloader<R, P>
where
    R: ReceiptsClient + 'static,
    P: HeaderProvider + 'static,
{
    /// Create a downloader reading headers from `provider` and fetching
    /// receipts through `client`.
    pub fn new(client: Arc<R>, provider: Arc<P>, config: ReceiptDownloaderConfig) -> Self {
        Self { client, provider, config }
    }

    /// Start a download over the accepted header range.
    pub fn stream(&self, range: RangeInclusive<BlockNumber>) -> ReceiptsDownload<R, P> {
        ReceiptsDownload {
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

fn has_receipts(header: &SealedHeader) -> bool {
    header.receipts_root != EMPTY_ROOT
}

#[derive(Debug)]
struct ReceiptBatch {
    headers: Vec<SealedHeader>,
    tried: Vec<PeerId>,
    attempt: usize,
}

impl ReceiptBatch {
    fn start(&self) -> BlockNumber {
        self.headers[0].number
    }

    fn request_hashes(&self) -> Vec<strata_primitives::B256> {
        self.headers.iter().filter(|h| has_receipts(h)).map(|h| h.hash()).collect()
    }
}

#[derive(Debug)]
struct BufferedReceipts {
    start: BlockNumber,
    blocks: Vec<BlockReceipts>,
}

impl PartialEq for BufferedReceipts {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for BufferedReceipts {}

impl PartialOrd for BufferedReceipts {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferedReceipts {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.cmp(&other.start)
    }
}

type ReceiptsFut =
    Pin<Box<dyn Future<Output = (ReceiptBatch, PeerRequestResult<Vec<Vec<Receipt>>>)> + Send>>;

/// An in-progress receipt download, yielding [`BlockReceipts`] ascending by
/// block number.
#[must_use = "streams do nothing unless polled"]
pub struct ReceiptsDownload<R, P> {
    client: Arc<R>,
    provider: Arc<P>,
    config: ReceiptDownloaderConfig,
    next_to_schedule: BlockNumber,
    range_end: BlockNumber,
    next_yield: BlockNumber,
    in_progress: FuturesUnordered<ReceiptsFut>,
    buffered: BinaryHeap<Reverse<BufferedReceipts>>,
    ready: VecDeque<BlockReceipts>,
    stall: Pin<Box<Sleep>>,
    failed: Option<DownloadError>,
}

impl<R, P> ReceiptsDownload<R, P>
where
    R: ReceiptsClient + 'static,
    P: HeaderProvider + 'static,
{
    fn submit_request(&self, batch: ReceiptBatch) {
        let hashes = batch.request_hashes();
        trace!(
            target: "downloaders::receipts",
            start = batch.start(),
            blocks = batch.headers.len(),
            requested = hashes.len(),
            attempt = batch.attempt,
            "requesting receipts"
        );
        let client = Arc::clone(&self.client);
        let exclude = batch.tried.clone();
        self.in_progress.push(Box::pin(async move {
            let result = client.get_receipts(ReceiptsRequest { hashes, exclude }).await;
            (batch, result)
        }));
    }

    fn schedule_next_batch(&mut self) -> Result<bool, DownloadError> {
        if self.next_to_schedule > self.range_end {
            return Ok(false)
        }
        let end = (self.next_to_schedule + self.config.batch_size as u64 - 1).min(self.range_end);
        let headers = self.provider.sealed_headers_range(self.next_to_schedule..end + 1)?;
        if headers.is_empty() || headers[0].number != self.next_to_schedule {
            return Err(DownloadError::Provider(ProviderError::HeaderNotFound {
                number: self.next_to_schedule,
            }))
        }
        self.next_to_schedule = headers.last().expect("non-empty").number + 1;

        if headers.iter().all(|header| !has_receipts(header)) {
            let start = headers[0].number;
            let blocks = headers
                .into_iter()
                .map(|header| BlockReceipts { header, receipts: Vec::new() })
                .collect();
            self.buffered.push(Reverse(BufferedReceipts { start, blocks }));
        } else {
            self.submit_request(ReceiptBatch { headers, tried: Vec::new(), attempt: 0 });
        }
        Ok(true)
    }

    fn retry_batch(
        &mut self,
        mut batch: ReceiptBatch,
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
            target: "downloaders::receipts",
            %error,
            start = batch.start(),
            attempt = batch.attempt,
            "invalid receipts, retrying on another peer"
        );
        self.submit_request(batch);
        None
    }

    fn on_response(
        &mut self,
        batch: ReceiptBatch,
        result: PeerRequestResult<Vec<Vec<Receipt>>>,
    ) -> Option<DownloadError> {
        let response = match result {
            Ok(response) => response,
            Err(RequestError::ChannelClosed) => return Some(DownloadError::Cancelled),
            Err(error) if error.is_retryable() => return Some(DownloadError::ExhaustedRetries),
            Err(error) => return Some(error.into()),
        };
        let (peer, lists) = response.split();
        let requested = batch.request_hashes().len();

        if lists.is_empty() {
            return self.retry_batch(batch, peer, DownloadError::EmptyResponse)
        }
        if lists.len() > requested {
            return self.retry_batch(
                batch,
                peer,
                DownloadError::TooManyItems { received: lists.len(), expected: requested },
            )
        }

        let start = batch.start();
        let mut blocks = Vec::with_capacity(batch.headers.len());
        let mut lists = lists.into_iter();
        let mut headers = batch.headers.iter();

        while let Some(header) = headers.next() {
            if !has_receipts(header) {
                blocks.push(BlockReceipts { header: header.clone(), receipts: Vec::new() });
                continue
            }
            let Some(receipts) = lists.next() else {
                let tail: Vec<_> =
                    std::iter::once(header.clone()).chain(headers.cloned()).collect();
                self.submit_request(ReceiptBatch {
                    headers: tail,
                    tried: batch.tried.clone(),
                    attempt: batch.attempt,
                });
                break
            };
            let receipts_root = proofs::calculate_receipt_root(&receipts);
            if receipts_root != header.receipts_root {
                let error = DownloadError::ReceiptValidation {
                    hash: header.hash(),
                    error: ConsensusError::ReceiptRootDiff {
                        got: receipts_root,
                        expected: header.receipts_root,
                    },
                };
                let tail: Vec<_> =
                    std::iter::once(header.clone()).chain(headers.cloned()).collect();
                let fatal = self.retry_batch(
                    ReceiptBatch {
                        headers: tail,
                        tried: batch.tried.clone(),
                        attempt: batch.attempt,
                    },
                    peer,
                    error,
                );
                if fatal.is_some() {
                    return fatal
                }
                break
            }
            blocks.push(BlockReceipts { header: header.clone(), receipts });
        }

        if !blocks.is_empty() {
            self.buffered.push(Reverse(BufferedReceipts { start, blocks }));
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

impl<R, P> Stream for ReceiptsDownload<R, P>
where
    R: ReceiptsClient + 'static,
    P: HeaderProvider + 'static,
{
    type Item = DownloadResult<BlockReceipts>;

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

impl<R, P> std::fmt::Debug for ReceiptsDownload<R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptsDownload")
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
    use strata_interfaces::{
        provider::ChainStorage,
        test_utils::{ChainFixture, TestPeer, TestStorage},
    };
    use strata_peers::{DistributorConfig, PeerRegistry, RegistryConfig, RequestDistributor};

    fn setup(
        len: u64,
        max_txs: usize,
        peer_count: u8,
    ) -> (Arc<ChainFixture>, Arc<TestStorage>, Arc<RequestDistributor>, Vec<Arc<TestPeer>>) {
        let chain = Arc::new(ChainFixture::generate(len, max_txs));
        let storage = Arc::new(TestStorage::with_genesis(chain.genesis().clone()));
        for number in 1..=chain.len() {
            storage
                .write_block(chain.validated_block(number), chain.total_difficulty(number))
                .unwrap();
        }
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor =
            Arc::new(RequestDistributor::new(registry, DistributorConfig::default()));
        let peers: Vec<_> = (1..=peer_count)
            .map(|i| {
                let peer = Arc::new(TestPeer::new(i, Arc::clone(&chain)));
                distributor.register_peer(peer.id(), Arc::clone(&peer) as _);
                peer
            })
            .collect();
        (chain, storage, distributor, peers)
    }

    #[tokio::test]
    async fn downloads_receipts_matching_headers() {
        let (chain, storage, distributor, _peers) = setup(25, 3, 2);
        let downloader = ReceiptDownloader::new(
            distributor,
            storage,
            ReceiptDownloaderConfig { batch_size: 6, ..Default::default() },
        );

        let blocks: Vec<_> =
            downloader.stream(1..=25).map(|result| result.unwrap()).collect().await;
        assert_eq!(blocks.len(), 25);
        for (i, block) in blocks.iter().enumerate() {
            let number = i as u64 + 1;
            assert_eq!(block.number(), number);
            assert_eq!(
                proofs::calculate_receipt_root(&block.receipts),
                block.header.receipts_root
            );
        }
    }

    #[tokio::test]
    async fn truncated_receipt_lists_are_refetched_elsewhere() {
        let (_, storage, distributor, peers) = setup(10, 3, 2);
        peers[0].set_corrupt_receipts(true);
        let downloader = ReceiptDownloader::new(
            distributor,
            storage,
            ReceiptDownloaderConfig { batch_size: 10, ..Default::default() },
        );

        let blocks: Vec<_> =
            downloader.stream(1..=10).map(|result| result.unwrap()).collect().await;
        assert_eq!(blocks.len(), 10);
        for block in &blocks {
            assert_eq!(
                proofs::calculate_receipt_root(&block.receipts),
                block.header.receipts_root
            );
        }
    }
}
