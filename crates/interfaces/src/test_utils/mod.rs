//! Shared test helpers for the sync engine.

mod backends;
/// Random chain generators.
pub mod generators;
mod peers;

pub use backends::{TestConsensus, TestExecutor, TestNodeStore, TestStorage};
pub use generators::ChainFixture;
pub use peers::TestPeer;
