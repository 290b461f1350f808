//! Peer reputation management

/// The default reputation of a peer
pub const DEFAULT_REPUTATION: Reputation = 0;

/// The minimal unit we're measuring reputation
const REPUTATION_UNIT: i32 = -1024;

/// The reputation value below which a peer is evicted from the registry.
pub const BANNED_REPUTATION: i32 = 50 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that failed to respond in time.
const TIMEOUT_REPUTATION_CHANGE: i32 = 4 * REPUTATION_UNIT;

/// The reputation change to apply to a peer whose response failed validation.
const BAD_MESSAGE_REPUTATION_CHANGE: i32 = 16 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that dropped the connection.
const DROPPED_REPUTATION_CHANGE: i32 = 4 * REPUTATION_UNIT;

/// The reputation change to apply to a peer which violates protocol rules:
/// minimal reputation
const BAD_PROTOCOL_REPUTATION_CHANGE: i32 = i32::MIN;

/// Returns `true` if the given reputation is below the [`BANNED_REPUTATION`]
/// threshold
#[inline]
pub const fn is_banned_reputation(reputation: i32) -> bool {
    reputation < BANNED_REPUTATION
}

/// The type that tracks the reputation score.
pub type Reputation = i32;

/// Various kinds of reputation changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReputationChangeKind {
    /// Peer failed to respond in time.
    Timeout,
    /// Peer sent data that failed validation against accepted headers.
    BadMessage,
    /// Peer does not adhere to network protocol rules.
    BadProtocol,
    /// Connection dropped by peer.
    Dropped,
}

/// How the [`ReputationChangeKind`] are weighted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationChangeWeights {
    /// Weight for [`ReputationChangeKind::Timeout`]
    pub timeout: Reputation,
    /// Weight for [`ReputationChangeKind::BadMessage`]
    pub bad_message: Reputation,
    /// Weight for [`ReputationChangeKind::BadProtocol`]
    pub bad_protocol: Reputation,
    /// Weight for [`ReputationChangeKind::Dropped`]
    pub dropped: Reputation,
}

impl ReputationChangeWeights {
    /// Returns the quantifiable reputation change for the given kind.
    pub const fn change(&self, kind: ReputationChangeKind) -> Reputation {
        match kind {
            ReputationChangeKind::Timeout => self.timeout,
            ReputationChangeKind::BadMessage => self.bad_message,
            ReputationChangeKind::BadProtocol => self.bad_protocol,
            ReputationChangeKind::Dropped => self.dropped,
        }
    }
}

impl Default for ReputationChangeWeights {
    fn default() -> Self {
        Self {
            timeout: TIMEOUT_REPUTATION_CHANGE,
            bad_message: BAD_MESSAGE_REPUTATION_CHANGE,
            bad_protocol: BAD_PROTOCOL_REPUTATION_CHANGE,
            dropped: DROPPED_REPUTATION_CHANGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_threshold_takes_repeated_bad_messages() {
        let weights = ReputationChangeWeights::default();
        let mut reputation = DEFAULT_REPUTATION;
        let mut strikes = 0;
        while !is_banned_reputation(reputation) {
            reputation =
                reputation.saturating_add(weights.change(ReputationChangeKind::BadMessage));
            strikes += 1;
        }
        assert!(strikes > 1, "a single bad message must not ban a peer");
    }

    #[test]
    fn protocol_violation_bans_immediately() {
        let weights = ReputationChangeWeights::default();
        let reputation = DEFAULT_REPUTATION
            .saturating_add(weights.change(ReputationChangeKind::BadProtocol));
        assert!(is_banned_reputation(reputation));
    }
}
