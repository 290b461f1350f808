//! Implements the staged downloaders of the sync engine.
//!
//! Each staged downloader pulls a contiguous range of block numbers: requests
//! are batched, issued concurrently, reassembled into block-number order and
//! validated before anything is yielded. Consumers never observe gaps,
//! duplicates or out-of-order items.
//!
//! The state fetcher is a different shape: it walks the target state trie
//! from the root hash, scheduling every referenced child node, storage root
//! and code hash it has not seen yet.

#![warn(missing_docs, unreachable_pub)]

/// Block body downloader.
pub mod bodies;
/// Block header downloader.
pub mod headers;
/// Receipt downloader.
pub mod receipts;
/// Trie-driven state downloader.
pub mod state;
