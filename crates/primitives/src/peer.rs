use alloy_primitives::B512;

/// Network identifier of a peer.
pub type PeerId = B512;

/// A value tagged with the peer it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithPeerId<T>(PeerId, T);

impl<T> From<(PeerId, T)> for WithPeerId<T> {
    fn from(value: (PeerId, T)) -> Self {
        Self(value.0, value.1)
    }
}

impl<T> WithPeerId<T> {
    /// Wrap a value with the id of the peer that supplied it.
    pub fn new(peer: PeerId, value: T) -> Self {
        Self(peer, value)
    }

    /// The id of the supplying peer.
    pub fn peer_id(&self) -> PeerId {
        self.0
    }

    /// The wrapped value.
    pub fn data(&self) -> &T {
        &self.1
    }

    /// Consume, returning the wrapped value.
    pub fn into_data(self) -> T {
        self.1
    }

    /// Split into peer id and value.
    pub fn split(self) -> (PeerId, T) {
        (self.0, self.1)
    }

    /// Map the wrapped value, keeping the peer id.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WithPeerId<U> {
        WithPeerId(self.0, f(self.1))
    }
}
