//! Helpers for recomputing the commitment roots a header declares.

use crate::{
    constants::{EMPTY_OMMER_ROOT, EMPTY_ROOT},
    Header, Receipt, Transaction,
};
use alloy_primitives::{keccak256, Bloom, Log, B256};
use alloy_rlp::Encodable;
use alloy_trie::{HashBuilder, Nibbles};
use bytes::{BufMut, BytesMut};

/// Adjust the index of an item for rlp encoding.
///
/// The items of an ordered trie are keyed by their RLP-encoded index. Inserting
/// in this adjusted order keeps the hash builder's input sorted by nibbles.
pub const fn adjust_index_for_rlp(i: usize, len: usize) -> usize {
    if i > 0x7f {
        i
    } else if i == 0x7f || i + 1 == len {
        0
    } else {
        i + 1
    }
}

/// Compute the trie root of an ordered collection of RLP encodable items.
pub fn ordered_trie_root<T: Encodable>(items: &[T]) -> B256 {
    ordered_trie_root_with_encoder(items, |item, buf| item.encode(buf))
}

/// Compute the trie root of an ordered collection with a custom encoder.
pub fn ordered_trie_root_with_encoder<T, F>(items: &[T], mut encode: F) -> B256
where
    F: FnMut(&T, &mut dyn BufMut),
{
    if items.is_empty() {
        return EMPTY_ROOT
    }

    let mut index_buffer = BytesMut::new();
    let mut value_buffer = BytesMut::new();

    let mut hb = HashBuilder::default();
    let items_len = items.len();
    for i in 0..items_len {
        let index = adjust_index_for_rlp(i, items_len);

        index_buffer.clear();
        index.encode(&mut index_buffer);

        value_buffer.clear();
        encode(&items[index], &mut value_buffer);

        hb.add_leaf(Nibbles::unpack(&index_buffer), &value_buffer);
    }

    hb.root()
}

/// Calculate the root of a block body's ordered transaction list.
pub fn calculate_transaction_root(transactions: &[Transaction]) -> B256 {
    ordered_trie_root(transactions)
}

/// Calculate the root of a block's ordered receipt list.
pub fn calculate_receipt_root(receipts: &[Receipt]) -> B256 {
    ordered_trie_root(receipts)
}

/// Calculate the ommers hash of a list of ommer headers.
pub fn calculate_ommers_root(ommers: &[Header]) -> B256 {
    if ommers.is_empty() {
        return EMPTY_OMMER_ROOT
    }
    keccak256(encode_header_list(ommers))
}

/// RLP encoding of a list of headers.
fn encode_header_list(headers: &[Header]) -> Vec<u8> {
    let mut payload = Vec::new();
    for header in headers {
        header.encode(&mut payload);
    }
    let mut buf = Vec::new();
    alloy_rlp::Header { list: true, payload_length: payload.len() }.encode(&mut buf);
    buf.extend_from_slice(&payload);
    buf
}

/// Union of the blooms of a block's receipts.
pub fn calculate_logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue_log(log);
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, U256};

    #[test]
    fn empty_roots_match_constants() {
        assert_eq!(calculate_transaction_root(&[]), EMPTY_ROOT);
        assert_eq!(calculate_receipt_root(&[]), EMPTY_ROOT);
        assert_eq!(calculate_ommers_root(&[]), EMPTY_OMMER_ROOT);
    }

    #[test]
    fn transaction_root_depends_on_order() {
        let a = Transaction { nonce: 0, value: U256::from(1u64), ..Default::default() };
        let b = Transaction { nonce: 1, value: U256::from(2u64), ..Default::default() };

        let forward = calculate_transaction_root(&[a.clone(), b.clone()]);
        let reverse = calculate_transaction_root(&[b, a]);
        assert_ne!(forward, reverse);
    }

    #[test]
    fn transaction_root_changes_with_content() {
        let a = Transaction { nonce: 0, input: Bytes::from_static(b"a"), ..Default::default() };
        let mut tampered = a.clone();
        tampered.input = Bytes::from_static(b"b");

        assert_ne!(calculate_transaction_root(&[a]), calculate_transaction_root(&[tampered]));
    }

    #[test]
    fn ommers_root_is_hash_of_list() {
        let ommer = Header { number: 1, ..Default::default() };
        let root = calculate_ommers_root(std::slice::from_ref(&ommer));
        assert_ne!(root, EMPTY_OMMER_ROOT);
        assert_eq!(root, keccak256(encode_header_list(std::slice::from_ref(&ommer))));
    }

    #[test]
    fn large_list_indices_stay_sorted() {
        // Crossing the 0x7f index boundary exercises the index adjustment.
        let txs: Vec<_> = (0..130u64)
            .map(|nonce| Transaction { nonce, ..Default::default() })
            .collect();
        // The root is deterministic regardless of how often it is computed.
        assert_eq!(calculate_transaction_root(&txs), calculate_transaction_root(&txs));
    }
}
