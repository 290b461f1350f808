use alloy_rlp::{Decodable, RlpDecodable};
use alloy_trie::nodes::TrieNode;
use cuckoofilter::CuckooFilter;
use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet, VecDeque},
    pin::Pin,
    sync::Arc,
};
use strata_interfaces::{
    p2p::{
        client::{NodeDataClient, NodeDataRequest},
        error::{DownloadError, DownloadResult, PeerRequestResult, RequestError},
    },
    provider::TrieNodeStore,
};
use strata_primitives::{
    constants::{EMPTY_ROOT, KECCAK_EMPTY},
    keccak256, Bytes, PeerId, B256, U256,
};
use tracing::{debug, info, trace};

/// Configuration for [`StateSync`].
#[derive(Debug, Clone)]
pub struct StateSyncConfig {
    /// Maximum node hashes per request.
    pub batch_size: usize,
    /// Maximum requests in flight at once.
    pub max_concurrent_requests: usize,
    /// How many peers one node may be attempted on before the sync fails.
    pub max_retries: usize,
    /// Capacity of the approximate already-seen filter.
    pub filter_capacity: usize,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            max_concurrent_requests: 5,
            max_retries: 5,
            filter_capacity: 1 << 20,
        }
    }
}

/// Counters reported after a completed state sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSyncStats {
    /// Trie nodes fetched and stored.
    pub nodes: u64,
    /// Contract code blobs fetched and stored.
    pub codes: u64,
    /// Child references skipped because they were probably already seen.
    ///
    /// "Probably": the filter is approximate, so a small share of these may
    /// be false positives for hashes never actually fetched.
    pub duplicates_skipped: u64,
}

/// What a requested hash is expected to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    /// A node of the account trie.
    Account,
    /// A node of some contract's storage trie.
    Storage,
    /// A contract code blob; opaque, never decoded.
    Code,
}

#[derive(Debug, Clone)]
struct NodeRequest {
    hash: B256,
    kind: NodeKind,
    tried: Vec<PeerId>,
    attempt: usize,
}

impl NodeRequest {
    fn new(hash: B256, kind: NodeKind) -> Self {
        Self { hash, kind, tried: Vec::new(), attempt: 0 }
    }
}

/// The value stored in an account-trie leaf.
#[derive(Debug, RlpDecodable)]
#[allow(dead_code)]
struct AccountLeaf {
    nonce: u64,
    balance: U256,
    storage_root: B256,
    code_hash: B256,
}

type NodeDataFut =
    Pin<Box<dyn Future<Output = (Vec<NodeRequest>, PeerRequestResult<Vec<Bytes>>)> + Send>>;

/// Downloads the state trie rooted at a target state root.
///
/// Maintains a frontier of needed hashes seeded with the root. Every fetched
/// node is hash-verified, stored, decoded and mined for child references:
/// sub-trie nodes, per-account storage roots and code hashes. References
/// probably seen before, per an approximate membership filter, are not
/// requested again even when reached through a different path.
#[derive(Debug)]
pub struct StateSync<N, S> {
    client: Arc<N>,
    store: Arc<S>,
    config: StateSyncConfig,
}

impl<N, S> StateSync<N, S>
where
    N: NodeDataClient + 'static,
    S: TrieNodeStore + 'static,
{
    /// Create a state sync fetching through `client` and persisting into
    /// `store`.
    pub fn new(client: Arc<N>, store: Arc<S>, config: StateSyncConfig) -> Self {
        Self { client, store, config }
    }

    /// Download every node reachable from `target_state_root`.
    ///
    /// Terminal when the frontier is drained and no request is in flight.
    pub async fn run(&self, target_state_root: B256) -> DownloadResult<StateSyncStats> {
        let mut stats = StateSyncStats::default();
        if target_state_root == EMPTY_ROOT {
            return Ok(stats)
        }

        let mut walker = Walker {
            filter: CuckooFilter::with_capacity(self.config.filter_capacity),
            frontier: VecDeque::new(),
            in_flight: HashSet::new(),
        };
        walker.schedule(&*self.store, NodeRequest::new(target_state_root, NodeKind::Account), &mut stats)?;

        let mut in_progress: FuturesUnordered<NodeDataFut> = FuturesUnordered::new();

        loop {
            while in_progress.len() < self.config.max_concurrent_requests {
                let Some(batch) = walker.next_batch(self.config.batch_size) else { break };
                in_progress.push(self.submit(batch));
            }

            let Some((batch, result)) = in_progress.next().await else { break };
            self.on_response(&mut walker, &mut stats, batch, result)?;
        }

        info!(
            target: "downloaders::state",
            nodes = stats.nodes,
            codes = stats.codes,
            duplicates_skipped = stats.duplicates_skipped,
            ?target_state_root,
            "state sync complete"
        );
        Ok(stats)
    }

    fn submit(&self, batch: Vec<NodeRequest>) -> NodeDataFut {
        trace!(
            target: "downloaders::state",
            hashes = batch.len(),
            "requesting trie nodes"
        );
        let client = Arc::clone(&self.client);
        let hashes = batch.iter().map(|node| node.hash).collect();
        let exclude = batch.first().map(|node| node.tried.clone()).unwrap_or_default();
        Box::pin(async move {
            let result = client.get_node_data(NodeDataRequest { hashes, exclude }).await;
            (batch, result)
        })
    }

    fn on_response(
        &self,
        walker: &mut Walker,
        stats: &mut StateSyncStats,
        batch: Vec<NodeRequest>,
        result: PeerRequestResult<Vec<Bytes>>,
    ) -> DownloadResult<()> {
        let response = match result {
            Ok(response) => response,
            Err(RequestError::ChannelClosed) => return Err(DownloadError::Cancelled),
            Err(error) if error.is_retryable() => return Err(DownloadError::ExhaustedRetries),
            Err(error) => return Err(error.into()),
        };
        let (peer, items) = response.split();

        let mut pending: HashMap<B256, NodeRequest> =
            batch.into_iter().map(|node| (node.hash, node)).collect();
        let mut peer_at_fault = items.is_empty() || items.len() > pending.len();
        let mut mismatched = false;

        for bytes in items {
            let hash = keccak256(&bytes);
            let Some(node) = pending.remove(&hash) else {
                // Content does not hash to anything we asked for.
                peer_at_fault = true;
                mismatched = true;
                continue
            };
            walker.in_flight.remove(&hash);
            match self.process_node(walker, stats, &node, &bytes) {
                Ok(()) => {}
                Err(error) => {
                    debug!(target: "downloaders::state", %error, ?hash, "rejecting trie node");
                    peer_at_fault = true;
                    walker.requeue(node, peer, self.config.max_retries, error)?;
                }
            }
        }

        if peer_at_fault {
            self.client.report_bad_message(peer);
        }

        // Hashes the peer did not serve go back to the frontier; served but
        // unknown peers already took the blame above.
        for (_, node) in pending {
            walker.in_flight.remove(&node.hash);
            if peer_at_fault {
                let error = if mismatched {
                    DownloadError::NodeHashMismatch { hash: node.hash }
                } else {
                    DownloadError::EmptyResponse
                };
                walker.requeue(node, peer, self.config.max_retries, error)?;
            } else {
                walker.in_flight.insert(node.hash);
                walker.frontier.push_back(node);
            }
        }
        Ok(())
    }

    /// Store a hash-verified node and schedule everything it references.
    fn process_node(
        &self,
        walker: &mut Walker,
        stats: &mut StateSyncStats,
        node: &NodeRequest,
        bytes: &Bytes,
    ) -> DownloadResult<()> {
        if node.kind == NodeKind::Code {
            self.store.put(node.hash, bytes.clone())?;
            stats.codes += 1;
            return Ok(())
        }

        let decoded = TrieNode::decode(&mut bytes.as_ref())
            .map_err(|_| DownloadError::InvalidTrieNode { hash: node.hash })?;
        self.store.put(node.hash, bytes.clone())?;
        stats.nodes += 1;

        match decoded {
            TrieNode::Branch(branch) => {
                for child in &branch.stack {
                    if let Some(child_hash) = child.as_hash() {
                        walker.schedule(
                            &*self.store,
                            NodeRequest::new(child_hash, node.kind),
                            stats,
                        )?;
                    }
                }
            }
            TrieNode::Extension(extension) => {
                if let Some(child_hash) = extension.child.as_hash() {
                    walker.schedule(
                        &*self.store,
                        NodeRequest::new(child_hash, node.kind),
                        stats,
                    )?;
                }
            }
            TrieNode::Leaf(leaf) => {
                if node.kind == NodeKind::Account {
                    let account = AccountLeaf::decode(&mut leaf.value.as_slice())
                        .map_err(|_| DownloadError::InvalidTrieNode { hash: node.hash })?;
                    if account.storage_root != EMPTY_ROOT {
                        walker.schedule(
                            &*self.store,
                            NodeRequest::new(account.storage_root, NodeKind::Storage),
                            stats,
                        )?;
                    }
                    if account.code_hash != KECCAK_EMPTY {
                        walker.schedule(
                            &*self.store,
                            NodeRequest::new(account.code_hash, NodeKind::Code),
                            stats,
                        )?;
                    }
                }
            }
            TrieNode::EmptyRoot => {}
        }
        Ok(())
    }
}

/// Frontier state of one sync run.
struct Walker {
    /// Approximate set of hashes already requested or present.
    filter: CuckooFilter<DefaultHasher>,
    frontier: VecDeque<NodeRequest>,
    in_flight: HashSet<B256>,
}

impl Walker {
    /// Queue a reference unless it was probably seen already.
    fn schedule<S: TrieNodeStore>(
        &mut self,
        store: &S,
        node: NodeRequest,
        stats: &mut StateSyncStats,
    ) -> DownloadResult<()> {
        if self.in_flight.contains(&node.hash) || self.filter.contains(node.hash.as_slice()) {
            stats.duplicates_skipped += 1;
            return Ok(())
        }
        let _ = self.filter.add(node.hash.as_slice());
        if store.contains(&node.hash)? {
            return Ok(())
        }
        self.in_flight.insert(node.hash);
        self.frontier.push_back(node);
        Ok(())
    }

    /// Put a failed request back, attributed to the peer that failed it.
    fn requeue(
        &mut self,
        mut node: NodeRequest,
        peer: PeerId,
        max_retries: usize,
        error: DownloadError,
    ) -> DownloadResult<()> {
        node.tried.push(peer);
        node.attempt += 1;
        if node.attempt >= max_retries {
            return Err(error)
        }
        self.in_flight.insert(node.hash);
        // Retries jump the queue and travel alone, preserving their
        // exclusion set.
        self.frontier.push_front(node);
        Ok(())
    }

    /// Pop the next batch off the frontier.
    ///
    /// Nodes carrying an exclusion set are dispatched as singleton batches so
    /// the exclusion applies exactly.
    fn next_batch(&mut self, batch_size: usize) -> Option<Vec<NodeRequest>> {
        let first = self.frontier.pop_front()?;
        if !first.tried.is_empty() {
            return Some(vec![first])
        }
        let mut batch = vec![first];
        while batch.len() < batch_size {
            match self.frontier.front() {
                Some(node) if node.tried.is_empty() => {
                    batch.push(self.frontier.pop_front().expect("peeked above"));
                }
                _ => break,
            }
        }
        Some(batch)
    }
}

impl std::fmt::Debug for Walker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walker")
            .field("frontier", &self.frontier.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Encodable;
    use assert_matches::assert_matches;
    use alloy_trie::{
        nodes::{BranchNode, LeafNode, RlpNode},
        Nibbles, TrieMask,
    };
    use strata_interfaces::test_utils::{TestNodeStore, TestPeer};
    use strata_peers::{DistributorConfig, PeerRegistry, RegistryConfig, RequestDistributor};

    fn encode_node(node: &TrieNode) -> (B256, Bytes) {
        let mut buf = Vec::new();
        node.encode(&mut buf);
        (keccak256(&buf), buf.into())
    }

    /// A small account trie: two accounts sharing one storage trie and one
    /// code blob.
    fn fixture_trie() -> (B256, HashMap<B256, Bytes>, usize) {
        let mut nodes = HashMap::new();

        let code = Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]);
        let code_hash = keccak256(&code);
        nodes.insert(code_hash, code);

        let storage_value = alloy_rlp::encode(U256::from(42u64));
        let storage_leaf = TrieNode::Leaf(LeafNode::new(
            Nibbles::unpack(B256::repeat_byte(0x11)),
            storage_value,
        ));
        let (storage_root, storage_bytes) = encode_node(&storage_leaf);
        nodes.insert(storage_root, storage_bytes);

        let mut account_value = Vec::new();
        #[derive(alloy_rlp::RlpEncodable)]
        struct Account {
            nonce: u64,
            balance: U256,
            storage_root: B256,
            code_hash: B256,
        }
        Account { nonce: 1, balance: U256::from(1_000u64), storage_root, code_hash }
            .encode(&mut account_value);

        let leaf_a = TrieNode::Leaf(LeafNode::new(
            Nibbles::unpack(B256::repeat_byte(0xaa)),
            account_value.clone(),
        ));
        let (hash_a, bytes_a) = encode_node(&leaf_a);
        nodes.insert(hash_a, bytes_a);

        let leaf_b = TrieNode::Leaf(LeafNode::new(
            Nibbles::unpack(B256::repeat_byte(0xbb)),
            account_value,
        ));
        let (hash_b, bytes_b) = encode_node(&leaf_b);
        nodes.insert(hash_b, bytes_b);

        let root_node = TrieNode::Branch(BranchNode::new(
            vec![RlpNode::word_rlp(&hash_a), RlpNode::word_rlp(&hash_b)],
            TrieMask::new(0b11),
        ));
        let (root, root_bytes) = encode_node(&root_node);
        nodes.insert(root, root_bytes);

        let total = nodes.len();
        (root, nodes, total)
    }

    fn distributor_with_node_peers(
        nodes: &HashMap<B256, Bytes>,
        count: u8,
    ) -> (Arc<RequestDistributor>, Vec<Arc<TestPeer>>) {
        let chain = Arc::new(strata_interfaces::test_utils::ChainFixture::generate(1, 0));
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let distributor =
            Arc::new(RequestDistributor::new(registry, DistributorConfig::default()));
        let peers: Vec<_> = (1..=count)
            .map(|i| {
                let peer = Arc::new(
                    TestPeer::new(i, Arc::clone(&chain)).with_node_data(nodes.clone()),
                );
                distributor.register_peer(peer.id(), Arc::clone(&peer) as _);
                peer
            })
            .collect();
        (distributor, peers)
    }

    #[tokio::test]
    async fn downloads_the_whole_trie_and_dedups_shared_subtries() {
        let (root, nodes, total) = fixture_trie();
        let (distributor, _peers) = distributor_with_node_peers(&nodes, 2);
        let store = Arc::new(TestNodeStore::default());
        let sync = StateSync::new(distributor, Arc::clone(&store), StateSyncConfig::default());

        let stats = sync.run(root).await.unwrap();

        assert_eq!(store.len(), total);
        for (hash, bytes) in &nodes {
            assert_eq!(store.get(hash).as_ref(), Some(bytes));
        }
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.codes, 1);
        // The second account references the same storage root and code hash.
        assert_eq!(stats.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn corrupt_nodes_are_refetched_from_another_peer() {
        let (root, nodes, total) = fixture_trie();
        let (distributor, peers) = distributor_with_node_peers(&nodes, 2);
        peers[0].set_corrupt_node_data(true);
        let store = Arc::new(TestNodeStore::default());
        let sync = StateSync::new(
            Arc::clone(&distributor),
            Arc::clone(&store),
            StateSyncConfig::default(),
        );

        let stats = sync.run(root).await.unwrap();
        assert_eq!(store.len(), total);
        assert_eq!(stats.nodes + stats.codes, total as u64);
    }

    #[tokio::test]
    async fn outright_garbage_surfaces_a_hash_mismatch() {
        let (root, nodes, _) = fixture_trie();
        let (distributor, peers) = distributor_with_node_peers(&nodes, 2);
        for peer in &peers {
            peer.set_corrupt_node_data(true);
        }
        let store = Arc::new(TestNodeStore::default());
        let config = StateSyncConfig { max_retries: 2, ..Default::default() };
        let sync = StateSync::new(distributor, Arc::clone(&store), config);

        assert_matches!(
            sync.run(root).await,
            Err(DownloadError::NodeHashMismatch { hash }) if hash == root
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_root_completes_without_requests() {
        let (_, nodes, _) = fixture_trie();
        let (distributor, peers) = distributor_with_node_peers(&nodes, 1);
        let store = Arc::new(TestNodeStore::default());
        let sync = StateSync::new(distributor, Arc::clone(&store), StateSyncConfig::default());

        let stats = sync.run(EMPTY_ROOT).await.unwrap();
        assert_eq!(stats, StateSyncStats::default());
        assert!(store.is_empty());
        assert_eq!(peers[0].request_count(), 0);
    }
}
