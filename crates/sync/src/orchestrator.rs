use crate::{
    error::{SyncError, SyncResult},
    event::{SyncEvent, SyncStage, SyncStatus},
};
use futures::StreamExt;
use std::{
    collections::VecDeque,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use strata_consensus::{validate_block_post_execution, validate_block_regarding_chain};
use strata_downloaders::{
    bodies::{BlockResponse, BodyDownloader, BodyDownloaderConfig},
    headers::{HeaderDownloader, HeaderDownloaderConfig},
    receipts::{BlockReceipts, ReceiptDownloader, ReceiptDownloaderConfig},
    state::{StateSync, StateSyncConfig},
};
use strata_interfaces::{
    consensus::{BlockStatus, Consensus},
    executor::BlockExecutor,
    p2p::{
        client::{BodiesClient, HeadersClient, NodeDataClient, ReceiptsClient},
        peer::AnnouncedHead,
    },
    provider::{ChainStorage, ProviderError, TrieNodeStore},
};
use strata_primitives::{BlockNumber, ChainInfo, ValidatedBlock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// How the orchestrator obtains the state needed to consider the chain final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Execute every block locally and compare the outcome against the
    /// header claims before committing it.
    #[default]
    Full,
    /// Download the state trie of the target block and commit history on the
    /// strength of the downloader cross-checks, without re-executing it.
    Snapshot,
}

/// Configuration for [`SyncOrchestrator`].
#[derive(Clone, Debug, Default)]
pub struct SyncConfig {
    /// Whether history is re-executed or the target state is downloaded.
    pub mode: SyncMode,
    /// Header download stage tuning.
    pub headers: HeaderDownloaderConfig,
    /// Body download stage tuning.
    pub bodies: BodyDownloaderConfig,
    /// Receipt download stage tuning.
    pub receipts: ReceiptDownloaderConfig,
    /// State download tuning, used in snapshot mode only.
    pub state: StateSyncConfig,
}

/// Drives sync sessions stage by stage.
///
/// A session moves the canonical chain from the local head to an announced
/// target: headers are extended and persisted first, then bodies and
/// receipts are fetched and cross-checked against them (with the target
/// state trie downloaded concurrently in snapshot mode), and finally the
/// validated blocks are committed in strictly ascending order. Only one
/// session runs at a time.
///
/// Progress is published over a watch channel (see [`Self::status`]);
/// discrete events go to every listener registered via [`Self::events`].
/// Cancellation discards everything the committing stage has not yet
/// written.
pub struct SyncOrchestrator<N, C, E, S, T> {
    client: Arc<N>,
    consensus: Arc<C>,
    executor: Arc<E>,
    storage: Arc<S>,
    node_store: Arc<T>,
    config: SyncConfig,
    running: AtomicBool,
    session_cancel: Mutex<CancellationToken>,
    status_tx: watch::Sender<SyncStatus>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

impl<N, C, E, S, T> SyncOrchestrator<N, C, E, S, T>
where
    N: HeadersClient + BodiesClient + ReceiptsClient + NodeDataClient + 'static,
    C: Consensus + 'static,
    E: BlockExecutor + 'static,
    S: ChainStorage + 'static,
    T: TrieNodeStore + 'static,
{
    /// Create an idle orchestrator over the given backends.
    pub fn new(
        client: Arc<N>,
        consensus: Arc<C>,
        executor: Arc<E>,
        storage: Arc<S>,
        node_store: Arc<T>,
        config: SyncConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            client,
            consensus,
            executor,
            storage,
            node_store,
            config,
            running: AtomicBool::new(false),
            session_cancel: Mutex::new(CancellationToken::new()),
            status_tx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to progress snapshots.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Register a new event listener.
    pub fn events(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    /// Cancel the running session, if any.
    ///
    /// Safe to call at any time and from any thread; calling it repeatedly
    /// or without a running session has no effect.
    pub fn cancel(&self) {
        self.session_cancel.lock().unwrap().cancel();
    }

    /// Run a sync session towards `target`.
    ///
    /// Returns once the session completed, failed or was cancelled. Targets
    /// that do not outweigh the local chain are rejected up front, as is a
    /// second session while one is running.
    pub async fn start_sync(&self, target: AnnouncedHead) -> SyncResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadySyncing)
        }
        let cancel = CancellationToken::new();
        *self.session_cancel.lock().unwrap() = cancel.clone();

        let result = self.run_session(&target, &cancel).await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                self.set_status(|status| {
                    status.stage = SyncStage::Idle;
                    status.last_error = None;
                });
                self.notify(SyncEvent::SessionCompleted {
                    target_block: target.number,
                    target_hash: target.hash,
                });
            }
            Err(SyncError::Cancelled) => {
                self.set_status(|status| status.stage = SyncStage::Cancelled);
                self.notify(SyncEvent::SessionCancelled);
            }
            Err(err) => {
                self.set_status(|status| {
                    status.stage = SyncStage::Idle;
                    status.last_error = Some(err.clone());
                });
                self.notify(SyncEvent::SessionFailed { error: err.clone() });
            }
        }
        result
    }

    async fn run_session(
        &self,
        target: &AnnouncedHead,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let info = self.storage.chain_info()?;
        if target.total_difficulty <= info.total_difficulty {
            return Err(SyncError::TargetWeightTooLow {
                target: target.total_difficulty,
                local: info.total_difficulty,
            })
        }
        info!(
            target: "sync",
            from = info.best_number,
            to = target.number,
            mode = ?self.config.mode,
            "starting sync session"
        );
        self.set_status(|status| {
            *status = SyncStatus {
                stage: SyncStage::Headers,
                current_block: info.best_number,
                target_block: target.number,
                last_error: None,
            }
        });

        self.sync_headers(target, &info, cancel).await?;
        let pairs = self.fetch_blocks(info.best_number + 1..=target.number, target, cancel).await?;
        self.commit_blocks(pairs, cancel).await?;

        info!(target: "sync", number = target.number, "sync session reached its target");
        Ok(())
    }

    /// Stage 1: extend the header chain from the local head to the target.
    ///
    /// Accepted headers are persisted as they arrive. Once the target height
    /// is reached, the tip hash and the recomputed cumulative weight are
    /// checked against the announcement; a peer that lied about either ends
    /// the session here, before any body is fetched.
    async fn sync_headers(
        &self,
        target: &AnnouncedHead,
        info: &ChainInfo,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.notify(SyncEvent::StageStarted { stage: SyncStage::Headers });

        let local_head = self
            .storage
            .sealed_header_by_number(info.best_number)?
            .ok_or(ProviderError::HeaderNotFound { number: info.best_number })?;
        let downloader = HeaderDownloader::new(
            Arc::clone(&self.client),
            Arc::clone(&self.consensus),
            self.config.headers.clone(),
        );
        let mut stream = downloader.stream(local_head, target.number).fuse();

        let mut weight = info.total_difficulty;
        let mut tip_hash = info.best_hash;
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                Some(Ok(header)) => {
                    weight += header.difficulty;
                    tip_hash = header.hash();
                    self.storage.write_header(header)?;
                }
                Some(Err(err)) if err.is_fatal() => return Err(err.into()),
                Some(Err(err)) => {
                    warn!(target: "sync", %err, "header download is stalling");
                }
                None => break,
            }
        }

        if tip_hash != target.hash {
            return Err(SyncError::TargetHashMismatch { expected: target.hash, got: tip_hash })
        }
        if weight != target.total_difficulty {
            return Err(SyncError::TargetWeightMismatch {
                announced: target.total_difficulty,
                computed: weight,
            })
        }

        self.notify(SyncEvent::StageCompleted { stage: SyncStage::Headers });
        Ok(())
    }

    /// Stage 2: fetch bodies and receipts for the accepted header range.
    ///
    /// In snapshot mode the state trie of the target block is downloaded
    /// concurrently; the stage only completes once both finish.
    async fn fetch_blocks(
        &self,
        range: RangeInclusive<BlockNumber>,
        target: &AnnouncedHead,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<(BlockResponse, BlockReceipts)>> {
        self.set_status(|status| status.stage = SyncStage::BodyReceipt);
        self.notify(SyncEvent::StageStarted { stage: SyncStage::BodyReceipt });

        let fetch = self.collect_block_data(range, cancel);
        let pairs = match self.config.mode {
            SyncMode::Full => fetch.await?,
            SyncMode::Snapshot => {
                let state_root = self
                    .storage
                    .sealed_header(&target.hash)?
                    .ok_or(ProviderError::HeaderNotFound { number: target.number })?
                    .state_root;
                let state_sync = StateSync::new(
                    Arc::clone(&self.client),
                    Arc::clone(&self.node_store),
                    self.config.state.clone(),
                );
                let state = async {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(SyncError::Cancelled),
                        stats = state_sync.run(state_root) => stats.map_err(SyncError::from),
                    }
                };
                let (pairs, stats) = tokio::try_join!(fetch, state)?;
                info!(
                    target: "sync",
                    nodes = stats.nodes,
                    codes = stats.codes,
                    "target state downloaded"
                );
                pairs
            }
        };

        self.notify(SyncEvent::StageCompleted { stage: SyncStage::BodyReceipt });
        Ok(pairs)
    }

    /// Drive the body and receipt streams to completion and pair their
    /// output per block.
    ///
    /// Both streams yield exactly one item per block in the range, in
    /// ascending order, so pairing is a matter of matching fronts.
    async fn collect_block_data(
        &self,
        range: RangeInclusive<BlockNumber>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<(BlockResponse, BlockReceipts)>> {
        let expected = (*range.end() + 1 - *range.start()) as usize;
        let body_downloader = BodyDownloader::new(
            Arc::clone(&self.client),
            Arc::clone(&self.storage),
            self.config.bodies.clone(),
        );
        let receipt_downloader = ReceiptDownloader::new(
            Arc::clone(&self.client),
            Arc::clone(&self.storage),
            self.config.receipts.clone(),
        );
        let mut bodies = body_downloader.stream(range.clone()).fuse();
        let mut receipts = receipt_downloader.stream(range).fuse();

        let mut body_buf = VecDeque::new();
        let mut receipt_buf = VecDeque::new();
        let mut pairs = Vec::with_capacity(expected);
        let mut bodies_done = false;
        let mut receipts_done = false;
        while !(bodies_done && receipts_done) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                item = bodies.next(), if !bodies_done => match item {
                    Some(Ok(block)) => body_buf.push_back(block),
                    Some(Err(err)) if err.is_fatal() => return Err(err.into()),
                    Some(Err(err)) => {
                        warn!(target: "sync", %err, "body download is stalling")
                    }
                    None => bodies_done = true,
                },
                item = receipts.next(), if !receipts_done => match item {
                    Some(Ok(block_receipts)) => receipt_buf.push_back(block_receipts),
                    Some(Err(err)) if err.is_fatal() => return Err(err.into()),
                    Some(Err(err)) => {
                        warn!(target: "sync", %err, "receipt download is stalling")
                    }
                    None => receipts_done = true,
                },
            }
            while !body_buf.is_empty() && !receipt_buf.is_empty() {
                let block = body_buf.pop_front().expect("checked non-empty");
                let block_receipts = receipt_buf.pop_front().expect("checked non-empty");
                debug_assert_eq!(block.number(), block_receipts.number());
                pairs.push((block, block_receipts));
            }
        }
        Ok(pairs)
    }

    /// Stage 3: apply validated blocks in strictly ascending order.
    ///
    /// Each block first passes the consensus pre-validation (ommer rules on
    /// top of the downloader's root cross-checks) and the chain-context
    /// check. In full mode each block is executed and its outcome checked against
    /// the header claims before it is written. In snapshot mode the
    /// downloader cross-checks are the acceptance criterion and the fetched
    /// receipts are stored as-is. An unknown or state-pruned ancestor is
    /// surfaced to the caller, who may respond with a deeper backfill or a
    /// state sync rather than treating the session as poisoned.
    async fn commit_blocks(
        &self,
        pairs: Vec<(BlockResponse, BlockReceipts)>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.set_status(|status| status.stage = SyncStage::Committing);
        self.notify(SyncEvent::StageStarted { stage: SyncStage::Committing });

        let mut weight = self.storage.chain_info()?.total_difficulty;
        for (block, block_receipts) in pairs {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled)
            }

            let block = block.into_block();
            self.consensus.pre_validate_block(&block)?;
            match validate_block_regarding_chain(&block, self.storage.as_ref())? {
                // Counted in the stored weight already.
                BlockStatus::AlreadyKnown => continue,
                BlockStatus::Valid => {}
            }

            let receipts = match self.config.mode {
                SyncMode::Full => {
                    let outcome = self.executor.execute(&block.header, &block.body).await?;
                    validate_block_post_execution(
                        &block.header,
                        &outcome.receipts,
                        outcome.gas_used,
                        outcome.state_root,
                    )?;
                    outcome.receipts
                }
                // Matched the header receipt root in the downloader.
                SyncMode::Snapshot => block_receipts.receipts,
            };

            weight += block.header.difficulty;
            let number = block.number();
            let hash = block.hash();
            self.storage.write_block(ValidatedBlock::new_unchecked(block, receipts), weight)?;

            self.set_status(|status| status.current_block = number);
            self.notify(SyncEvent::BlockCommitted { number, hash });
            debug!(target: "sync", number, %hash, "committed block");
        }

        self.notify(SyncEvent::StageCompleted { stage: SyncStage::Committing });
        Ok(())
    }

    fn set_status(&self, update: impl FnOnce(&mut SyncStatus)) {
        self.status_tx.send_modify(update);
    }

    fn notify(&self, event: SyncEvent) {
        self.listeners.lock().unwrap().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<N, C, E, S, T> std::fmt::Debug for SyncOrchestrator<N, C, E, S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use strata_consensus::EthConsensus;
    use strata_interfaces::{
        consensus::ConsensusError,
        test_utils::{ChainFixture, TestExecutor, TestNodeStore, TestPeer, TestStorage},
    };
    use strata_peers::{DistributorConfig, PeerRegistry, RegistryConfig, RequestDistributor};
    use strata_primitives::constants::EMPTY_ROOT;

    type TestOrchestrator =
        SyncOrchestrator<RequestDistributor, EthConsensus, TestExecutor, TestStorage, TestNodeStore>;

    fn config_for_tests(mode: SyncMode) -> SyncConfig {
        SyncConfig {
            mode,
            headers: HeaderDownloaderConfig { batch_size: 8, ..Default::default() },
            bodies: BodyDownloaderConfig { batch_size: 4, ..Default::default() },
            receipts: ReceiptDownloaderConfig { batch_size: 4, ..Default::default() },
            state: StateSyncConfig::default(),
        }
    }

    fn setup(
        chain: &Arc<ChainFixture>,
        peers: Vec<TestPeer>,
        mode: SyncMode,
    ) -> (Arc<TestOrchestrator>, Arc<TestStorage>) {
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor =
            Arc::new(RequestDistributor::new(registry, DistributorConfig::default()));
        for peer in peers {
            distributor.register_peer(peer.id(), Arc::new(peer));
        }

        let storage = Arc::new(TestStorage::with_genesis(chain.genesis().clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            distributor,
            Arc::new(EthConsensus),
            Arc::new(TestExecutor::new(Arc::clone(chain))),
            Arc::clone(&storage),
            Arc::new(TestNodeStore::default()),
            config_for_tests(mode),
        ));
        (orchestrator, storage)
    }

    fn announced_head(chain: &ChainFixture) -> AnnouncedHead {
        AnnouncedHead {
            hash: chain.head().hash(),
            number: chain.len(),
            total_difficulty: chain.total_difficulty(chain.len()),
        }
    }

    #[tokio::test]
    async fn full_sync_reaches_target() {
        let chain = Arc::new(ChainFixture::generate(60, 3));
        let peers =
            vec![TestPeer::new(1, Arc::clone(&chain)), TestPeer::new(2, Arc::clone(&chain))];
        let (orchestrator, storage) = setup(&chain, peers, SyncMode::Full);
        let mut events = orchestrator.events();

        orchestrator.start_sync(announced_head(&chain)).await.unwrap();

        let info = storage.chain_info().unwrap();
        assert_eq!(info.best_number, 60);
        assert_eq!(info.best_hash, chain.head().hash());
        assert_eq!(info.total_difficulty, chain.total_difficulty(60));

        let status = orchestrator.status().borrow().clone();
        assert_eq!(status.stage, SyncStage::Idle);
        assert_eq!(status.current_block, 60);
        assert_eq!(status.target_block, 60);
        assert_eq!(status.last_error, None);

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::SessionCompleted { target_block, .. } = event {
                assert_eq!(target_block, 60);
                completed = true;
            }
        }
        assert!(completed);

        // Committed content matches the remote chain.
        for number in 1..=60 {
            let block = storage.block_by_number(number).unwrap();
            let expected = chain.header(number).unwrap();
            assert_eq!(block.hash(), expected.hash());
            assert_eq!(
                block.receipts().len(),
                chain.receipts(&expected.hash()).unwrap().len()
            );
        }
    }

    #[tokio::test]
    async fn full_sync_accepts_ommer_bearing_blocks() {
        let chain = Arc::new(ChainFixture::generate_with_ommers(24, 2));
        let (orchestrator, storage) =
            setup(&chain, vec![TestPeer::new(1, Arc::clone(&chain))], SyncMode::Full);

        orchestrator.start_sync(announced_head(&chain)).await.unwrap();

        let info = storage.chain_info().unwrap();
        assert_eq!(info.best_number, 24);
        assert_eq!(info.best_hash, chain.head().hash());
    }

    #[tokio::test]
    async fn commit_rejects_block_with_invalid_ommer() {
        // The bad ommer is covered by its block's ommers hash, so the body
        // downloader accepts the block and only full block validation at
        // commit time can catch it.
        let chain = Arc::new(ChainFixture::generate_with_invalid_ommer(12, 0, 7));
        let (orchestrator, storage) =
            setup(&chain, vec![TestPeer::new(1, Arc::clone(&chain))], SyncMode::Full);

        assert_matches!(
            orchestrator.start_sync(announced_head(&chain)).await,
            Err(SyncError::Consensus(ConsensusError::OmmerInvalid { .. }))
        );

        // Everything before the offending block committed, nothing after.
        assert_eq!(storage.chain_info().unwrap().best_number, 6);
        assert!(storage.block_by_number(7).is_none());
    }

    #[tokio::test]
    async fn rejects_target_without_weight_gain() {
        let chain = Arc::new(ChainFixture::generate(5, 0));
        let (orchestrator, _) = setup(&chain, vec![TestPeer::new(1, Arc::clone(&chain))], SyncMode::Full);

        let target = AnnouncedHead {
            hash: chain.head().hash(),
            number: chain.len(),
            total_difficulty: chain.total_difficulty(0),
        };
        assert_matches!(
            orchestrator.start_sync(target).await,
            Err(SyncError::TargetWeightTooLow { .. })
        );
    }

    #[tokio::test]
    async fn aborts_when_announced_weight_is_a_lie() {
        let chain = Arc::new(ChainFixture::generate(20, 2));
        let (orchestrator, storage) =
            setup(&chain, vec![TestPeer::new(1, Arc::clone(&chain))], SyncMode::Full);

        let mut target = announced_head(&chain);
        target.total_difficulty += strata_primitives::U256::from(1000u64);
        assert_matches!(
            orchestrator.start_sync(target).await,
            Err(SyncError::TargetWeightMismatch { .. })
        );

        // The canonical head never moved.
        assert_eq!(storage.chain_info().unwrap().best_number, 0);
        let status = orchestrator.status().borrow().clone();
        assert_eq!(status.stage, SyncStage::Idle);
        assert_matches!(status.last_error, Some(SyncError::TargetWeightMismatch { .. }));
    }

    #[tokio::test]
    async fn snapshot_sync_commits_fetched_receipts() {
        let chain = Arc::new(ChainFixture::generate_with_state_root(30, 2, EMPTY_ROOT));
        let peers =
            vec![TestPeer::new(1, Arc::clone(&chain)), TestPeer::new(2, Arc::clone(&chain))];
        let (orchestrator, storage) = setup(&chain, peers, SyncMode::Snapshot);

        orchestrator.start_sync(announced_head(&chain)).await.unwrap();

        let info = storage.chain_info().unwrap();
        assert_eq!(info.best_number, 30);
        assert_eq!(info.best_hash, chain.head().hash());
        for number in 1..=30 {
            let block = storage.block_by_number(number).unwrap();
            let expected = chain.receipts(&block.hash()).unwrap();
            assert_eq!(block.receipts(), expected.as_slice());
        }
    }

    #[tokio::test]
    async fn cancel_discards_uncommitted_progress() {
        let chain = Arc::new(ChainFixture::generate(40, 2));
        let peers = vec![
            TestPeer::new(1, Arc::clone(&chain)).with_delay(Duration::from_millis(30)),
            TestPeer::new(2, Arc::clone(&chain)).with_delay(Duration::from_millis(30)),
        ];
        let (orchestrator, storage) = setup(&chain, peers, SyncMode::Full);
        let mut events = orchestrator.events();

        let session = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.start_sync(announced_head(&chain)).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        orchestrator.cancel();

        assert_matches!(session.await.unwrap(), Err(SyncError::Cancelled));
        assert_eq!(orchestrator.status().borrow().stage, SyncStage::Cancelled);

        // Whatever was committed before the cancellation is a gap-free
        // prefix; nothing beyond the canonical head made it to storage.
        let info = storage.chain_info().unwrap();
        for number in 1..=info.best_number {
            assert!(storage.block_by_number(number).is_some());
        }
        for number in info.best_number + 1..=40 {
            assert!(storage.block_by_number(number).is_none());
        }

        let mut cancelled = false;
        while let Ok(event) = events.try_recv() {
            cancelled |= matches!(event, SyncEvent::SessionCancelled);
        }
        assert!(cancelled);
    }

    #[tokio::test]
    async fn cancel_without_session_does_not_poison_the_next_one() {
        let chain = Arc::new(ChainFixture::generate(10, 1));
        let (orchestrator, storage) =
            setup(&chain, vec![TestPeer::new(1, Arc::clone(&chain))], SyncMode::Full);

        orchestrator.cancel();
        orchestrator.cancel();

        orchestrator.start_sync(announced_head(&chain)).await.unwrap();
        assert_eq!(storage.chain_info().unwrap().best_number, 10);
    }
}
