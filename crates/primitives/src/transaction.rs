use alloy_primitives::{keccak256, Bytes, TxKind, B256, U256};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};

/// A signed transaction as it appears in a block body.
///
/// The sync engine never interprets transactions; it only needs them to be
/// encodable so the transaction root of a body can be recomputed and checked
/// against the header.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Transaction {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Call target, or create.
    pub to: TxKind,
    /// Transferred value in wei.
    pub value: U256,
    /// Call input data.
    pub input: Bytes,
}

impl Transaction {
    /// Heavy function that hashes the RLP encoding of the transaction.
    pub fn hash_slow(&self) -> B256 {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        keccak256(&buf)
    }
}
