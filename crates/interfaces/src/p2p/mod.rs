//! Peer transport and download client abstractions.
//!
//! [`peer::PeerConnection`] is one live session with a remote peer;
//! [`client`] holds the typed download clients the staged fetchers consume.
//! A client implementation is expected to multiplex requests over many peer
//! connections and handle selection, timeouts and retries.

/// Typed download clients.
pub mod client;

/// Request and download error types.
pub mod error;

/// A single peer session.
pub mod peer;
