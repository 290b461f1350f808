use crate::reputation::{
    is_banned_reputation, Reputation, ReputationChangeKind, ReputationChangeWeights,
    DEFAULT_REPUTATION,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use strata_interfaces::p2p::peer::{DisconnectReason, PeerConnection};
use strata_primitives::PeerId;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Blending factor of a new throughput measurement into the running estimate.
const MEASUREMENT_IMPACT: f64 = 0.1;

/// The kinds of download requests a peer can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Header range requests.
    Headers,
    /// Block body requests.
    Bodies,
    /// Receipt list requests.
    Receipts,
    /// Raw trie node and code requests.
    NodeData,
}

impl RequestKind {
    const COUNT: usize = 4;

    const fn index(&self) -> usize {
        match self {
            Self::Headers => 0,
            Self::Bodies => 1,
            Self::Receipts => 2,
            Self::NodeData => 3,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Headers => f.write_str("headers"),
            Self::Bodies => f.write_str("bodies"),
            Self::Receipts => f.write_str("receipts"),
            Self::NodeData => f.write_str("node_data"),
        }
    }
}

/// Configuration for the [`PeerRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrent requests leased to a single peer.
    pub max_requests_per_peer: usize,
    /// First backoff applied after a timeout; doubles per consecutive strike.
    pub backoff_base: Duration,
    /// Ceiling for the exponential backoff.
    pub backoff_max: Duration,
    /// Reputation weights applied by [`PeerRegistry::penalize`].
    pub weights: ReputationChangeWeights,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_requests_per_peer: 4,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(64),
            weights: ReputationChangeWeights::default(),
        }
    }
}

#[derive(Debug)]
struct PeerState {
    connection: Arc<dyn PeerConnection>,
    reputation: Reputation,
    /// Items per second served, one running estimate per request kind.
    throughput: [f64; RequestKind::COUNT],
    in_flight: usize,
    /// Selection stamp for least-recently-used tie breaking.
    last_selected: u64,
    backoff_until: Option<Instant>,
    timeout_strikes: u32,
}

impl PeerState {
    fn new(connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            connection,
            reputation: DEFAULT_REPUTATION,
            throughput: [0.0; RequestKind::COUNT],
            in_flight: 0,
            last_selected: 0,
            backoff_until: None,
            timeout_strikes: 0,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    peers: HashMap<PeerId, PeerState>,
    selection_counter: u64,
}

/// Tracks every sync-capable peer session with its reputation and measured
/// throughput.
///
/// Leases are explicit: [`PeerRegistry::acquire`] hands out the best idle
/// peer for a request kind and [`PeerRegistry::release`] returns it.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    inner: Mutex<RegistryInner>,
    config: RegistryConfig,
}

impl PeerRegistry {
    /// Create a registry with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        Self { inner: Mutex::new(RegistryInner::default()), config }
    }

    /// Track a new peer session.
    ///
    /// Re-registering an existing peer replaces its connection and resets its
    /// score.
    pub fn register(&self, peer_id: PeerId, connection: Arc<dyn PeerConnection>) {
        trace!(target: "peers", ?peer_id, "registering peer");
        self.inner.lock().unwrap().peers.insert(peer_id, PeerState::new(connection));
    }

    /// Remove a peer session.
    ///
    /// Requests already leased to the peer are not interrupted; they observe
    /// their own transport error.
    pub fn unregister(&self, peer_id: &PeerId) -> Option<Arc<dyn PeerConnection>> {
        trace!(target: "peers", ?peer_id, "unregistering peer");
        self.inner.lock().unwrap().peers.remove(peer_id).map(|state| state.connection)
    }

    /// Whether the peer is currently registered.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.inner.lock().unwrap().peers.contains_key(peer_id)
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().peers.is_empty()
    }

    /// Whether any registered peer is outside the exclusion set, busy or not.
    ///
    /// Callers use this to distinguish "wait for a lease" from "nobody can
    /// ever serve this".
    pub fn has_candidate(&self, exclude: &[PeerId]) -> bool {
        self.inner.lock().unwrap().peers.keys().any(|id| !exclude.contains(id))
    }

    /// Lease the best available peer for a request of the given kind.
    ///
    /// Eligible peers are below the per-peer request cap, outside their
    /// backoff window and not in `exclude`. Among those the highest
    /// throughput estimate for `kind` wins; ties go to the least recently
    /// selected peer.
    pub fn acquire(
        &self,
        kind: RequestKind,
        exclude: &[PeerId],
    ) -> Option<(PeerId, Arc<dyn PeerConnection>)> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let idx = kind.index();

        let best = inner
            .peers
            .iter()
            .filter(|(id, state)| {
                !exclude.contains(id) &&
                    state.in_flight < self.config.max_requests_per_peer &&
                    state.backoff_until.map_or(true, |until| until <= now)
            })
            .max_by(|(_, a), (_, b)| {
                a.throughput[idx]
                    .total_cmp(&b.throughput[idx])
                    .then(b.last_selected.cmp(&a.last_selected))
            })
            .map(|(id, _)| *id)?;

        inner.selection_counter += 1;
        let stamp = inner.selection_counter;
        let state = inner.peers.get_mut(&best).expect("peer selected above");
        state.in_flight += 1;
        state.last_selected = stamp;
        Some((best, Arc::clone(&state.connection)))
    }

    /// Return a leased peer.
    pub fn release(&self, peer_id: &PeerId) {
        if let Some(state) = self.inner.lock().unwrap().peers.get_mut(peer_id) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Fold one completed request into the peer's throughput estimate.
    ///
    /// The new measurement contributes [`MEASUREMENT_IMPACT`] of the updated
    /// estimate, keeping the score stable under noisy samples.
    pub fn update_throughput(
        &self,
        peer_id: &PeerId,
        kind: RequestKind,
        items: usize,
        elapsed: Duration,
    ) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let measured = items as f64 / secs;
        if let Some(state) = self.inner.lock().unwrap().peers.get_mut(peer_id) {
            let estimate = &mut state.throughput[kind.index()];
            *estimate = (1.0 - MEASUREMENT_IMPACT) * *estimate + MEASUREMENT_IMPACT * measured;
            trace!(target: "peers", ?peer_id, %kind, throughput = *estimate, "updated throughput");
        }
    }

    /// Penalize a peer for a failed or invalid request.
    ///
    /// All throughput estimates are halved so the scorer stops preferring the
    /// peer, the reputation weight for `kind` is applied, and timeouts put
    /// the peer into an exponentially growing backoff window. A peer whose
    /// reputation crosses the ban threshold is evicted and disconnected.
    ///
    /// Returns `true` if the peer was evicted.
    pub fn penalize(&self, peer_id: &PeerId, kind: ReputationChangeKind) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.peers.get_mut(peer_id) else { return false };

        for estimate in &mut state.throughput {
            *estimate /= 2.0;
        }
        state.reputation = state.reputation.saturating_add(self.config.weights.change(kind));

        if kind == ReputationChangeKind::Timeout {
            state.timeout_strikes += 1;
            let exp = state.timeout_strikes.saturating_sub(1).min(16);
            let backoff = self
                .config
                .backoff_base
                .saturating_mul(1u32 << exp)
                .min(self.config.backoff_max);
            state.backoff_until = Some(Instant::now() + backoff);
        } else {
            state.timeout_strikes = 0;
        }

        debug!(
            target: "peers",
            ?peer_id,
            ?kind,
            reputation = state.reputation,
            "penalized peer"
        );

        if is_banned_reputation(state.reputation) {
            let state = inner.peers.remove(peer_id).expect("peer present above");
            let reason = match kind {
                ReputationChangeKind::Timeout => DisconnectReason::Timeouts,
                ReputationChangeKind::Dropped => DisconnectReason::UselessPeer,
                ReputationChangeKind::BadMessage | ReputationChangeKind::BadProtocol => {
                    DisconnectReason::ProtocolViolation
                }
            };
            debug!(target: "peers", ?peer_id, ?reason, "evicting banned peer");
            state.connection.disconnect(reason);
            return true
        }
        false
    }

    /// Current reputation of a peer, if registered.
    pub fn reputation(&self, peer_id: &PeerId) -> Option<Reputation> {
        self.inner.lock().unwrap().peers.get(peer_id).map(|state| state.reputation)
    }

    /// Current throughput estimate of a peer for a request kind.
    pub fn throughput(&self, peer_id: &PeerId, kind: RequestKind) -> Option<f64> {
        self.inner
            .lock()
            .unwrap()
            .peers
            .get(peer_id)
            .map(|state| state.throughput[kind.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_interfaces::test_utils::{ChainFixture, TestPeer};

    fn registry_with_peers(count: u8) -> (Arc<PeerRegistry>, Vec<PeerId>) {
        let chain = Arc::new(ChainFixture::generate(4, 2));
        let registry = Arc::new(PeerRegistry::new(RegistryConfig::default()));
        let ids = (1..=count)
            .map(|i| {
                let peer = Arc::new(TestPeer::new(i, Arc::clone(&chain)));
                let id = peer.id();
                registry.register(id, peer);
                id
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn acquire_prefers_highest_throughput() {
        let (registry, ids) = registry_with_peers(3);
        registry.update_throughput(&ids[0], RequestKind::Headers, 10, Duration::from_secs(1));
        registry.update_throughput(&ids[1], RequestKind::Headers, 100, Duration::from_secs(1));
        registry.update_throughput(&ids[2], RequestKind::Headers, 50, Duration::from_secs(1));

        let (best, _) = registry.acquire(RequestKind::Headers, &[]).unwrap();
        assert_eq!(best, ids[1]);

        // Scores are tracked per kind; bodies estimates are untouched.
        assert_eq!(registry.throughput(&ids[1], RequestKind::Bodies), Some(0.0));
    }

    #[test]
    fn throughput_update_blends_measurements() {
        let (registry, ids) = registry_with_peers(1);
        registry.update_throughput(&ids[0], RequestKind::Bodies, 100, Duration::from_secs(1));
        let first = registry.throughput(&ids[0], RequestKind::Bodies).unwrap();
        assert!((first - 10.0).abs() < 1e-9);

        registry.update_throughput(&ids[0], RequestKind::Bodies, 100, Duration::from_secs(1));
        let second = registry.throughput(&ids[0], RequestKind::Bodies).unwrap();
        assert!((second - 19.0).abs() < 1e-9);
    }

    #[test]
    fn acquire_skips_excluded_and_saturated_peers() {
        let (registry, ids) = registry_with_peers(2);
        registry.update_throughput(&ids[0], RequestKind::Bodies, 100, Duration::from_secs(1));

        // Saturate the fast peer.
        for _ in 0..RegistryConfig::default().max_requests_per_peer {
            let (id, _) = registry.acquire(RequestKind::Bodies, &[]).unwrap();
            assert_eq!(id, ids[0]);
        }
        let (id, _) = registry.acquire(RequestKind::Bodies, &[]).unwrap();
        assert_eq!(id, ids[1]);

        // Everyone is excluded or saturated now.
        assert!(registry.acquire(RequestKind::Bodies, &[ids[1]]).is_none());

        registry.release(&ids[0]);
        let (id, _) = registry.acquire(RequestKind::Bodies, &[ids[1]]).unwrap();
        assert_eq!(id, ids[0]);
    }

    #[test]
    fn ties_go_to_least_recently_selected() {
        let (registry, ids) = registry_with_peers(2);
        let (first, _) = registry.acquire(RequestKind::Headers, &[]).unwrap();
        registry.release(&first);
        let (second, _) = registry.acquire(RequestKind::Headers, &[]).unwrap();
        assert_ne!(first, second);
        assert!(ids.contains(&second));
    }

    #[test]
    fn repeated_bad_messages_evict_the_peer() {
        let (registry, ids) = registry_with_peers(1);
        let mut evicted = false;
        for _ in 0..200 {
            if registry.penalize(&ids[0], ReputationChangeKind::BadMessage) {
                evicted = true;
                break
            }
        }
        assert!(evicted);
        assert!(!registry.contains(&ids[0]));
    }

    #[test]
    fn penalty_halves_throughput() {
        let (registry, ids) = registry_with_peers(1);
        registry.update_throughput(&ids[0], RequestKind::Headers, 100, Duration::from_secs(1));
        registry.update_throughput(&ids[0], RequestKind::NodeData, 100, Duration::from_secs(1));
        registry.penalize(&ids[0], ReputationChangeKind::BadMessage);
        assert!((registry.throughput(&ids[0], RequestKind::Headers).unwrap() - 5.0).abs() < 1e-9);
        assert!((registry.throughput(&ids[0], RequestKind::NodeData).unwrap() - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_back_the_peer_off_exponentially() {
        let (registry, ids) = registry_with_peers(1);

        registry.penalize(&ids[0], ReputationChangeKind::Timeout);
        assert!(registry.acquire(RequestKind::Headers, &[]).is_none());

        // First strike backs off for the base duration.
        tokio::time::advance(Duration::from_millis(1100)).await;
        let (id, _) = registry.acquire(RequestKind::Headers, &[]).unwrap();
        assert_eq!(id, ids[0]);
        registry.release(&ids[0]);

        // Second strike doubles the window.
        registry.penalize(&ids[0], ReputationChangeKind::Timeout);
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(registry.acquire(RequestKind::Headers, &[]).is_none());
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(registry.acquire(RequestKind::Headers, &[]).is_some());
    }
}
