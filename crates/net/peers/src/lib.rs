//! Peer registry, throughput scoring and request distribution.
//!
//! The [`PeerRegistry`] tracks every sync-capable session together with its
//! reputation and per-request-kind throughput estimates. The
//! [`RequestDistributor`] sits on top and implements the download client
//! traits: it leases the best available peer for each request, feeds
//! measurements back into the scorer and retries failed requests on other
//! peers.

#![warn(missing_docs, unreachable_pub)]

mod distributor;
mod registry;
mod reputation;

pub use distributor::{DistributorConfig, RequestDistributor};
pub use registry::{PeerRegistry, RegistryConfig, RequestKind};
pub use reputation::{
    is_banned_reputation, Reputation, ReputationChangeKind, ReputationChangeWeights,
    BANNED_REPUTATION, DEFAULT_REPUTATION,
};
