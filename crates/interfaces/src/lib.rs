#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Traits and errors at the seams of the strata sync engine.
//!
//! Everything the engine consumes from the outside world (consensus rules,
//! block execution, chain storage and peer transport) is abstracted here so
//! sync sessions are independently testable.

/// Consensus verification capability.
pub mod consensus;

/// Block execution capability.
pub mod executor;

/// Peer transport and download client abstractions.
pub mod p2p;

/// Chain and trie-node storage abstractions.
pub mod provider;

#[cfg(any(test, feature = "test-utils"))]
/// Common test helpers: generators, scripted peers and in-memory backends.
pub mod test_utils;
