use rand::{thread_rng, Rng};
use std::collections::HashMap;
use strata_primitives::{
    proofs, Address, BlockBody, BlockHash, BlockNumber, Bytes, Header, Log, Receipt, SealedBlock,
    SealedHeader, Transaction, TxKind, ValidatedBlock, B256, U256,
};

/// Generate a random header with the given number and parent hash.
///
/// The header will not pass validation against a real parent.
pub fn random_header(number: BlockNumber, parent: Option<BlockHash>) -> SealedHeader {
    let mut rng = thread_rng();
    Header {
        number,
        parent_hash: parent.unwrap_or_default(),
        nonce: rng.gen(),
        difficulty: U256::from(rng.gen::<u32>()),
        ..Default::default()
    }
    .seal()
}

/// Generate a range of random headers linked by parent hash.
///
/// The parent hash of the first header equals `head`.
pub fn random_header_range(range: std::ops::Range<u64>, head: BlockHash) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(range.end.saturating_sub(range.start) as usize);
    for number in range {
        let parent = headers.last().map(|h: &SealedHeader| h.hash()).unwrap_or(head);
        headers.push(random_header(number, Some(parent)));
    }
    headers
}

/// Generate a random transaction.
pub fn random_tx(rng: &mut impl Rng) -> Transaction {
    Transaction {
        nonce: rng.gen::<u16>() as u64,
        gas_price: rng.gen::<u32>() as u128,
        gas_limit: 21_000 + rng.gen_range(0..50_000),
        to: TxKind::Call(Address::from(rng.gen::<[u8; 20]>())),
        value: U256::from(rng.gen::<u64>()),
        input: Bytes::new(),
    }
}

fn random_log(rng: &mut impl Rng) -> Log {
    Log::new_unchecked(
        Address::from(rng.gen::<[u8; 20]>()),
        vec![B256::from(rng.gen::<[u8; 32]>())],
        Bytes::new(),
    )
}

/// A fully consistent generated chain.
///
/// Headers, bodies and receipts agree on every root the validators check:
/// the transaction/ommer/receipt roots, the logs bloom and the gas used are
/// recomputed from the generated content. State roots are synthetic but
/// stable, so a fixture-backed executor can echo them.
#[derive(Debug)]
pub struct ChainFixture {
    genesis: SealedHeader,
    headers: Vec<SealedHeader>,
    bodies: HashMap<BlockHash, BlockBody>,
    receipts: HashMap<BlockHash, Vec<Receipt>>,
    total_difficulties: Vec<U256>,
}

impl ChainFixture {
    /// Generate a chain of `len` blocks on top of a fresh genesis.
    ///
    /// Each block carries between zero and `max_txs` transactions; blocks
    /// without transactions are empty blocks with nothing to fetch.
    pub fn generate(len: u64, max_txs: usize) -> Self {
        Self::generate_inner(len, max_txs, None, false, None)
    }

    /// Generate a chain whose headers all declare the given state root.
    pub fn generate_with_state_root(len: u64, max_txs: usize, state_root: B256) -> Self {
        Self::generate_inner(len, max_txs, Some(state_root), false, None)
    }

    /// Generate a chain where every other block carries an ommer.
    ///
    /// Ommer headers pass the standalone header rules, and the ommers hash of
    /// each carrying block is recomputed from its body.
    pub fn generate_with_ommers(len: u64, max_txs: usize) -> Self {
        Self::generate_inner(len, max_txs, None, true, None)
    }

    /// Like [`Self::generate_with_ommers`], but the block at `number` carries
    /// an ommer whose declared gas used exceeds its gas limit.
    ///
    /// The carrying block stays internally consistent (its ommers hash covers
    /// the bad ommer), so only full block validation can reject it.
    pub fn generate_with_invalid_ommer(len: u64, max_txs: usize, number: BlockNumber) -> Self {
        Self::generate_inner(len, max_txs, None, true, Some(number))
    }

    fn generate_inner(
        len: u64,
        max_txs: usize,
        state_root: Option<B256>,
        with_ommers: bool,
        bad_ommer_at: Option<BlockNumber>,
    ) -> Self {
        let mut rng = thread_rng();

        let genesis = Header {
            number: 0,
            gas_limit: 30_000_000,
            timestamp: 1_600_000_000,
            difficulty: U256::from(1u64),
            state_root: state_root.unwrap_or_else(|| B256::from(rng.gen::<[u8; 32]>())),
            ..Default::default()
        }
        .seal();

        let mut headers = Vec::with_capacity(len as usize);
        let mut bodies = HashMap::new();
        let mut receipts_by_hash = HashMap::new();
        let mut total_difficulties = vec![genesis.difficulty];

        let mut parent = genesis.clone();
        for number in 1..=len {
            let tx_count = rng.gen_range(0..=max_txs);
            let transactions: Vec<_> = (0..tx_count).map(|_| random_tx(&mut rng)).collect();

            let mut cumulative_gas_used = 0;
            let receipts: Vec<_> = transactions
                .iter()
                .map(|_| {
                    cumulative_gas_used += 21_000 + rng.gen_range(0..10_000);
                    let logs: Vec<_> =
                        (0..rng.gen_range(0..3)).map(|_| random_log(&mut rng)).collect();
                    let mut receipt = Receipt {
                        success: true,
                        cumulative_gas_used,
                        bloom: Default::default(),
                        logs,
                    };
                    receipt.bloom = receipt.bloom_slow();
                    receipt
                })
                .collect();

            let mut ommers = Vec::new();
            if with_ommers && (number % 2 == 0 || bad_ommer_at == Some(number)) {
                let mut ommer = Header {
                    number: number.saturating_sub(1),
                    parent_hash: B256::from(rng.gen::<[u8; 32]>()),
                    difficulty: U256::from(rng.gen::<u32>()),
                    gas_limit: parent.gas_limit,
                    timestamp: parent.timestamp + 6,
                    ..Default::default()
                };
                if bad_ommer_at == Some(number) {
                    ommer.gas_used = ommer.gas_limit + 1;
                }
                ommers.push(ommer);
            }

            let body = BlockBody { transactions, ommers };
            let difficulty = U256::from(100u64 + rng.gen_range(0..100u64));
            let header = Header {
                parent_hash: parent.hash(),
                ommers_hash: body.calculate_ommers_root(),
                transactions_root: body.calculate_tx_root(),
                receipts_root: proofs::calculate_receipt_root(&receipts),
                logs_bloom: proofs::calculate_logs_bloom(
                    receipts.iter().flat_map(|r| r.logs.iter()),
                ),
                state_root: state_root.unwrap_or_else(|| B256::from(rng.gen::<[u8; 32]>())),
                difficulty,
                number,
                gas_limit: parent.gas_limit,
                gas_used: cumulative_gas_used,
                timestamp: parent.timestamp + 12,
                ..Default::default()
            }
            .seal();

            total_difficulties.push(total_difficulties.last().copied().unwrap_or_default() + difficulty);
            bodies.insert(header.hash(), body);
            receipts_by_hash.insert(header.hash(), receipts);
            parent = header.clone();
            headers.push(header);
        }

        Self { genesis, headers, bodies, receipts: receipts_by_hash, total_difficulties }
    }

    /// The genesis header.
    pub fn genesis(&self) -> &SealedHeader {
        &self.genesis
    }

    /// The chain tip.
    pub fn head(&self) -> &SealedHeader {
        self.headers.last().unwrap_or(&self.genesis)
    }

    /// Number of blocks on top of genesis.
    pub fn len(&self) -> u64 {
        self.headers.len() as u64
    }

    /// Whether the fixture holds only a genesis.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Header by block number, including genesis.
    pub fn header(&self, number: BlockNumber) -> Option<&SealedHeader> {
        if number == 0 {
            return Some(&self.genesis)
        }
        self.headers.get(number as usize - 1)
    }

    /// Contiguous headers `[start, start + limit)`, truncated at the tip.
    pub fn headers_range(&self, start: BlockNumber, limit: u64) -> Vec<SealedHeader> {
        (start..start.saturating_add(limit))
            .map_while(|number| self.header(number).cloned())
            .collect()
    }

    /// Body by block hash.
    pub fn body(&self, hash: &BlockHash) -> Option<&BlockBody> {
        self.bodies.get(hash)
    }

    /// Receipts by block hash.
    pub fn receipts(&self, hash: &BlockHash) -> Option<&Vec<Receipt>> {
        self.receipts.get(hash)
    }

    /// Cumulative difficulty up to and including `number`.
    pub fn total_difficulty(&self, number: BlockNumber) -> U256 {
        self.total_difficulties.get(number as usize).copied().unwrap_or_default()
    }

    /// Assemble the validated block at `number`.
    ///
    /// Panics if the number is out of range; fixture blocks passed generation
    /// by construction.
    pub fn validated_block(&self, number: BlockNumber) -> ValidatedBlock {
        let header = self.header(number).expect("block number in fixture range").clone();
        let body = self.bodies.get(&header.hash()).cloned().unwrap_or_default();
        let receipts = self.receipts.get(&header.hash()).cloned().unwrap_or_default();
        ValidatedBlock::new_unchecked(SealedBlock::new(header, body), receipts)
    }
}
