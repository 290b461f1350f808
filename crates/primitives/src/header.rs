use crate::{
    constants::{EMPTY_OMMER_ROOT, EMPTY_ROOT},
    BlockHash, BlockNumber,
};
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, U256};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};
use std::ops::Deref;

/// Block header.
///
/// The compact commitment to a block: parent linkage, the roots of the
/// transaction/ommer/receipt/state tries, and execution metadata. Everything
/// the sync engine validates against is declared here.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Header {
    /// Hash of the parent header.
    pub parent_hash: B256,
    /// Commitment to the ommers list of this block.
    pub ommers_hash: B256,
    /// Address rewarded for producing this block.
    pub beneficiary: Address,
    /// Root of the state trie after executing this block.
    pub state_root: B256,
    /// Root of the trie built from this block's ordered transaction list.
    pub transactions_root: B256,
    /// Root of the trie built from this block's ordered receipt list.
    pub receipts_root: B256,
    /// Union of the blooms of every receipt in this block.
    pub logs_bloom: Bloom,
    /// Consensus difficulty of this block.
    pub difficulty: U256,
    /// Block height.
    pub number: BlockNumber,
    /// Maximum gas allowed in this block.
    pub gas_limit: u64,
    /// Gas consumed by the transactions in this block.
    pub gas_used: u64,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// Arbitrary producer-supplied data, at most 32 bytes.
    pub extra_data: Bytes,
    /// Consensus mix hash.
    pub mix_hash: B256,
    /// Consensus nonce.
    pub nonce: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMER_ROOT,
            beneficiary: Address::ZERO,
            state_root: EMPTY_ROOT,
            transactions_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            logs_bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            mix_hash: B256::ZERO,
            nonce: 0,
        }
    }
}

impl Header {
    /// Heavy function that hashes the RLP encoding of the header.
    pub fn hash_slow(&self) -> B256 {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        keccak256(&buf)
    }

    /// Returns whether the block carries neither transactions nor ommers.
    ///
    /// Empty blocks have nothing to fetch: their bodies and receipts are
    /// fully determined by the header.
    pub fn is_empty(&self) -> bool {
        self.transactions_root == EMPTY_ROOT && self.ommers_hash == EMPTY_OMMER_ROOT
    }

    /// Seal the header by memoizing its hash.
    pub fn seal(self) -> SealedHeader {
        let hash = self.hash_slow();
        SealedHeader { header: self, hash }
    }
}

/// A [`Header`] with its hash memoized.
///
/// The hash is computed on creation and never recomputed, so a sealed header
/// must not be mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedHeader {
    header: Header,
    hash: BlockHash,
}

impl Default for SealedHeader {
    fn default() -> Self {
        Header::default().seal()
    }
}

impl SealedHeader {
    /// Seal the header with a known hash.
    ///
    /// The caller is responsible for the hash being correct.
    pub fn new(header: Header, hash: BlockHash) -> Self {
        Self { header, hash }
    }

    /// The memoized header hash.
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Extract the inner header, discarding the hash.
    pub fn unseal(self) -> Header {
        self.header
    }

    /// Returns the block number and hash as a pair.
    pub fn num_hash(&self) -> (BlockNumber, BlockHash) {
        (self.header.number, self.hash)
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

impl AsRef<Header> for SealedHeader {
    fn as_ref(&self) -> &Header {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Decodable;

    #[test]
    fn header_rlp_roundtrip() {
        let header = Header {
            parent_hash: B256::repeat_byte(1),
            number: 17,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_700_000_000,
            difficulty: U256::from(131_072u64),
            extra_data: Bytes::from_static(b"strata"),
            ..Default::default()
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        let decoded = Header::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash_slow(), header.hash_slow());
    }

    #[test]
    fn sealed_header_hash_is_stable() {
        let header = Header { number: 5, ..Default::default() };
        let expected = header.hash_slow();
        let sealed = header.seal();
        assert_eq!(sealed.hash(), expected);
        assert_eq!(sealed.clone().unseal().hash_slow(), expected);
    }

    #[test]
    fn default_header_is_empty() {
        assert!(Header::default().is_empty());
    }
}
