#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Commonly used types in strata.
//!
//! This crate contains the chain primitive types shared by the sync engine:
//! headers, blocks, receipts and the helpers for recomputing the commitment
//! roots a header claims.

mod block;
pub mod constants;
mod header;
mod peer;
mod receipt;
mod transaction;

/// Helper functions for calculating Merkle roots and log blooms.
pub mod proofs;

pub use block::{BlockBody, SealedBlock, ValidatedBlock};
pub use constants::{EMPTY_OMMER_ROOT, EMPTY_ROOT, KECCAK_EMPTY, MIN_GAS_LIMIT};
pub use header::{Header, SealedHeader};
pub use peer::{PeerId, WithPeerId};
pub use receipt::Receipt;
pub use transaction::Transaction;

pub use alloy_primitives::{keccak256, Address, Bloom, BloomInput, Bytes, Log, TxKind, B256, B512, U256};

/// A block number.
pub type BlockNumber = u64;

/// A block hash.
pub type BlockHash = B256;

/// Current status of the canonical chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainInfo {
    /// Hash of the best block.
    pub best_hash: BlockHash,
    /// Number of the best block.
    pub best_number: BlockNumber,
    /// Cumulative fork-choice weight of the best block.
    pub total_difficulty: U256,
}
