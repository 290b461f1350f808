//! Sync session orchestration.
//!
//! The [`SyncOrchestrator`] turns an announced remote head into a committed
//! canonical chain. It runs the stages in order: header download, body and
//! receipt download (with a concurrent state trie download in snapshot
//! mode), and a strictly ascending commit of validated blocks. Fetching,
//! scoring and validation live in the downloader, peer and consensus crates;
//! this crate wires them together, publishes progress and handles
//! cancellation.

#![warn(missing_docs, unreachable_pub)]

mod error;
mod event;
mod orchestrator;

pub use error::{SyncError, SyncResult};
pub use event::{SyncEvent, SyncStage, SyncStatus};
pub use orchestrator::{SyncConfig, SyncMode, SyncOrchestrator};
