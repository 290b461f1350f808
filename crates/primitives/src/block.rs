use crate::{proofs, BlockHash, BlockNumber, Header, Receipt, SealedHeader, Transaction};
use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// The transactions and ommers belonging to a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockBody {
    /// Ordered list of transactions.
    pub transactions: Vec<Transaction>,
    /// Ommer headers included in this block.
    pub ommers: Vec<Header>,
}

impl BlockBody {
    /// Recompute the transaction root from the body's ordered transaction list.
    pub fn calculate_tx_root(&self) -> B256 {
        proofs::calculate_transaction_root(&self.transactions)
    }

    /// Recompute the ommers hash from the body's ommers list.
    pub fn calculate_ommers_root(&self) -> B256 {
        proofs::calculate_ommers_root(&self.ommers)
    }

    /// Returns whether the body carries neither transactions nor ommers.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.ommers.is_empty()
    }
}

/// A sealed header paired with its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SealedBlock {
    /// The sealed header.
    pub header: SealedHeader,
    /// The block body.
    pub body: BlockBody,
}

impl SealedBlock {
    /// Create a new sealed block.
    pub fn new(header: SealedHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// Block number of this block.
    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Hash of this block.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

/// A block that passed the pre-execution validator gate and, in full sync,
/// the post-execution validator.
///
/// Construction is restricted to `new_unchecked`; callers are expected to only
/// build one from validator output. Once built it is immutable and eligible
/// for canonical commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedBlock {
    block: SealedBlock,
    receipts: Vec<Receipt>,
}

impl ValidatedBlock {
    /// Assemble a validated block from parts that already passed the gates.
    pub fn new_unchecked(block: SealedBlock, receipts: Vec<Receipt>) -> Self {
        Self { block, receipts }
    }

    /// The sealed block.
    pub fn block(&self) -> &SealedBlock {
        &self.block
    }

    /// The sealed header.
    pub fn header(&self) -> &SealedHeader {
        &self.block.header
    }

    /// The execution receipts of the block.
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Block number of this block.
    pub fn number(&self) -> BlockNumber {
        self.block.number()
    }

    /// Hash of this block.
    pub fn hash(&self) -> BlockHash {
        self.block.hash()
    }

    /// Split into block and receipts.
    pub fn split(self) -> (SealedBlock, Vec<Receipt>) {
        (self.block, self.receipts)
    }
}
