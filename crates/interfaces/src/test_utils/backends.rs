use crate::{
    consensus::{Consensus, ConsensusError},
    executor::{BlockExecutor, ExecutionOutcome, ExecutorError},
    provider::{ChainStorage, HeaderProvider, ProviderError, ProviderResult, TrieNodeStore},
    test_utils::ChainFixture,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use strata_primitives::{
    BlockBody, BlockHash, BlockNumber, Bytes, ChainInfo, SealedBlock, SealedHeader,
    ValidatedBlock, B256, U256,
};

/// Consensus backend that accepts everything unless told to fail.
#[derive(Debug, Default)]
pub struct TestConsensus {
    fail_validation: AtomicBool,
}

impl TestConsensus {
    /// Make every validation call fail from now on.
    pub fn set_fail_validation(&self, val: bool) {
        self.fail_validation.store(val, Ordering::SeqCst);
    }

    fn result(&self) -> Result<(), ConsensusError> {
        if self.fail_validation.load(Ordering::SeqCst) {
            Err(ConsensusError::TimestampIsInPast { parent_timestamp: 1, timestamp: 0 })
        } else {
            Ok(())
        }
    }
}

impl Consensus for TestConsensus {
    fn validate_header(
        &self,
        _header: &SealedHeader,
        _parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        self.result()
    }

    fn pre_validate_block(&self, _block: &SealedBlock) -> Result<(), ConsensusError> {
        self.result()
    }
}

/// Executor backend that echoes the fixture's receipts and state roots.
///
/// Knobs force gas or state-root divergence so the post-execution validator
/// can be exercised without a real virtual machine.
#[derive(Debug)]
pub struct TestExecutor {
    chain: Arc<ChainFixture>,
    wrong_state_root: AtomicBool,
    missing_state: AtomicBool,
}

impl TestExecutor {
    /// Create an executor answering from `chain`.
    pub fn new(chain: Arc<ChainFixture>) -> Self {
        Self {
            chain,
            wrong_state_root: AtomicBool::new(false),
            missing_state: AtomicBool::new(false),
        }
    }

    /// Report a state root that differs from the header's.
    pub fn set_wrong_state_root(&self, val: bool) {
        self.wrong_state_root.store(val, Ordering::SeqCst);
    }

    /// Fail every execution with a missing-state error.
    pub fn set_missing_state(&self, val: bool) {
        self.missing_state.store(val, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockExecutor for TestExecutor {
    async fn execute(
        &self,
        header: &SealedHeader,
        _body: &BlockBody,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        if self.missing_state.load(Ordering::SeqCst) {
            return Err(ExecutorError::MissingState { hash: header.hash() })
        }
        let receipts = self.chain.receipts(&header.hash()).cloned().unwrap_or_default();
        let state_root = if self.wrong_state_root.load(Ordering::SeqCst) {
            B256::repeat_byte(0xba)
        } else {
            header.state_root
        };
        Ok(ExecutionOutcome { receipts, gas_used: header.gas_used, state_root })
    }
}

#[derive(Debug, Default)]
struct StorageInner {
    headers_by_hash: HashMap<BlockHash, SealedHeader>,
    // Covers staged headers too, not just the committed prefix.
    hash_by_number: HashMap<BlockNumber, BlockHash>,
    canonical: Vec<BlockHash>,
    blocks: HashMap<BlockHash, ValidatedBlock>,
    state: HashMap<BlockHash, ()>,
    total_difficulty: U256,
}

impl StorageInner {
    fn header_at(&self, number: BlockNumber) -> Option<&SealedHeader> {
        self.canonical
            .get(number as usize)
            .or_else(|| self.hash_by_number.get(&number))
            .and_then(|hash| self.headers_by_hash.get(hash))
    }
}

/// In-memory chain store.
#[derive(Debug, Default)]
pub struct TestStorage {
    inner: Mutex<StorageInner>,
}

impl TestStorage {
    /// Create a store holding only the given genesis, with state present.
    pub fn with_genesis(genesis: SealedHeader) -> Self {
        let this = Self::default();
        {
            let mut inner = this.inner.lock().unwrap();
            let hash = genesis.hash();
            inner.total_difficulty = genesis.difficulty;
            inner.hash_by_number.insert(genesis.number, hash);
            inner.headers_by_hash.insert(hash, genesis);
            inner.canonical.push(hash);
            inner.state.insert(hash, ());
        }
        this
    }

    /// Drop the recorded state for `hash`, simulating pruning.
    pub fn prune_state(&self, hash: &BlockHash) {
        self.inner.lock().unwrap().state.remove(hash);
    }

    /// Number of committed blocks, genesis included.
    pub fn canonical_len(&self) -> usize {
        self.inner.lock().unwrap().canonical.len()
    }

    /// The committed block at `number`, if any.
    pub fn block_by_number(&self, number: BlockNumber) -> Option<ValidatedBlock> {
        let inner = self.inner.lock().unwrap();
        let hash = inner.canonical.get(number as usize)?;
        inner.blocks.get(hash).cloned()
    }
}

impl HeaderProvider for TestStorage {
    fn sealed_header(&self, hash: &BlockHash) -> ProviderResult<Option<SealedHeader>> {
        Ok(self.inner.lock().unwrap().headers_by_hash.get(hash).cloned())
    }

    fn sealed_header_by_number(
        &self,
        number: BlockNumber,
    ) -> ProviderResult<Option<SealedHeader>> {
        Ok(self.inner.lock().unwrap().header_at(number).cloned())
    }

    fn sealed_headers_range(
        &self,
        range: Range<BlockNumber>,
    ) -> ProviderResult<Vec<SealedHeader>> {
        let inner = self.inner.lock().unwrap();
        Ok(range.map_while(|number| inner.header_at(number)).cloned().collect())
    }

    fn is_known(&self, hash: &BlockHash) -> ProviderResult<bool> {
        Ok(self.inner.lock().unwrap().headers_by_hash.contains_key(hash))
    }
}

impl ChainStorage for TestStorage {
    fn chain_info(&self) -> ProviderResult<ChainInfo> {
        let inner = self.inner.lock().unwrap();
        let best_hash =
            *inner.canonical.last().ok_or_else(|| ProviderError::HeaderNotFound { number: 0 })?;
        let best_number = inner.canonical.len() as u64 - 1;
        Ok(ChainInfo { best_hash, best_number, total_difficulty: inner.total_difficulty })
    }

    fn has_block(&self, hash: &BlockHash, _number: BlockNumber) -> ProviderResult<bool> {
        Ok(self.inner.lock().unwrap().blocks.contains_key(hash))
    }

    fn has_state(&self, hash: &BlockHash) -> ProviderResult<bool> {
        Ok(self.inner.lock().unwrap().state.contains_key(hash))
    }

    fn write_header(&self, header: SealedHeader) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.hash_by_number.insert(header.number, header.hash());
        inner.headers_by_hash.insert(header.hash(), header);
        Ok(())
    }

    fn write_block(&self, block: ValidatedBlock, total_difficulty: U256) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let hash = block.hash();
        let number = block.number();
        if number != inner.canonical.len() as u64 {
            return Err(ProviderError::StorageFailure {
                message: format!(
                    "non-sequential commit: got #{number}, expected #{}",
                    inner.canonical.len()
                ),
            })
        }
        inner.hash_by_number.insert(number, hash);
        inner.headers_by_hash.insert(hash, block.header().clone());
        inner.canonical.push(hash);
        inner.blocks.insert(hash, block);
        inner.state.insert(hash, ());
        inner.total_difficulty = total_difficulty;
        Ok(())
    }
}

/// In-memory trie node store.
#[derive(Debug, Default)]
pub struct TestNodeStore {
    nodes: Mutex<HashMap<B256, Bytes>>,
}

impl TestNodeStore {
    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().unwrap().is_empty()
    }

    /// Fetch a stored node by hash.
    pub fn get(&self, hash: &B256) -> Option<Bytes> {
        self.nodes.lock().unwrap().get(hash).cloned()
    }
}

impl TrieNodeStore for TestNodeStore {
    fn contains(&self, hash: &B256) -> ProviderResult<bool> {
        Ok(self.nodes.lock().unwrap().contains_key(hash))
    }

    fn put(&self, hash: B256, bytes: Bytes) -> ProviderResult<()> {
        self.nodes.lock().unwrap().insert(hash, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_headers_are_resolvable_by_number() {
        let chain = ChainFixture::generate(4, 0);
        let storage = TestStorage::with_genesis(chain.genesis().clone());

        // Stage the headers without committing any block, the way the header
        // stage does ahead of the body fetch.
        for number in 1..=4 {
            storage.write_header(chain.header(number).unwrap().clone()).unwrap();
        }

        assert_eq!(storage.chain_info().unwrap().best_number, 0);
        assert_eq!(
            storage.sealed_header_by_number(3).unwrap().as_ref(),
            chain.header(3),
        );
        let range = storage.sealed_headers_range(1..5).unwrap();
        assert_eq!(range.len(), 4);
        assert!(range.iter().zip(1..).all(|(header, number)| header.number == number));
    }
}
