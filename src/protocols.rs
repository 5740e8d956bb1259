//! Collaborator trait definitions for the publish subsystem.
//!
//! The underlying overlay engine owns topology (subscriptions, mesh
//! membership) and the transport owns connections; this module defines the
//! seams through which the publish path talks to both.
//!
//! ## Seams
//!
//! | Collaborator | Trait | Purpose |
//! |--------------|-------|---------|
//! | Overlay engine | [`OverlayView`] | Subscription / mesh topology queries |
//! | Transport | [`MessageWire`] | Per-peer envelope dispatch |
//!
//! ## Design
//!
//! The router is a single component parameterized by these traits rather
//! than a subclass of a flood or gossip publisher: per-peer capability is
//! data ([`Peer::protocols`]), and topic state is answered by the injected
//! [`OverlayView`]. Traits live here, away from implementations, so the
//! publish path depends only on the seam.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::messages::WireEnvelope;

/// Pubsub forwarding capability a peer advertises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerProtocol {
    /// Simple broadcast semantics: send to every interested peer.
    Flood,
    /// Mesh/fanout semantics: send to a bounded peer set per topic.
    Gossip,
}

/// An overlay neighbor as seen by the router: identity plus advertised
/// capability set. Subscription membership is answered per topic by
/// [`OverlayView::subscribed_peers`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub identity: Identity,
    pub protocols: Vec<PeerProtocol>,
}

impl Peer {
    pub fn new(identity: Identity, protocols: Vec<PeerProtocol>) -> Self {
        Self {
            identity,
            protocols,
        }
    }

    /// A flood-capable peer.
    pub fn flood(identity: Identity) -> Self {
        Self::new(identity, vec![PeerProtocol::Flood])
    }

    /// A gossip-capable peer.
    pub fn gossip(identity: Identity) -> Self {
        Self::new(identity, vec![PeerProtocol::Gossip])
    }

    #[inline]
    pub fn supports(&self, protocol: PeerProtocol) -> bool {
        self.protocols.contains(&protocol)
    }
}

/// Read-only topology queries answered by the underlying overlay engine.
///
/// The engine is the sole writer of subscription and mesh state; the router
/// only reads through this trait. Implementations must answer from local
/// state without blocking.
pub trait OverlayView: Send + Sync + 'static {
    /// Peers subscribed to `topic`, regardless of protocol capability.
    fn subscribed_peers(&self, topic: &str) -> Vec<Peer>;

    /// Peers currently in the stable gossip mesh for `topic`, if the local
    /// node maintains one. `None` when the node is not meshed into the
    /// topic (the router then falls back to its fanout set).
    fn mesh_peers(&self, topic: &str) -> Option<Vec<Identity>>;

    /// Whether the local node is itself subscribed to `topic`.
    /// Drives self-emission.
    fn is_subscribed(&self, topic: &str) -> bool;
}

/// Per-peer envelope dispatch supplied by the transport layer.
#[async_trait]
pub trait MessageWire: Send + Sync + 'static {
    /// Send an outbound envelope to a peer.
    ///
    /// Failures are reported per peer; the publish path never lets one
    /// peer's failure affect sends to others.
    async fn send_envelope(&self, to: &Identity, envelope: WireEnvelope) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn peer_capability_predicates() {
        let identity = Keypair::generate().identity();

        let flood = Peer::flood(identity);
        assert!(flood.supports(PeerProtocol::Flood));
        assert!(!flood.supports(PeerProtocol::Gossip));

        let gossip = Peer::gossip(identity);
        assert!(gossip.supports(PeerProtocol::Gossip));
        assert!(!gossip.supports(PeerProtocol::Flood));

        let both = Peer::new(identity, vec![PeerProtocol::Flood, PeerProtocol::Gossip]);
        assert!(both.supports(PeerProtocol::Flood));
        assert!(both.supports(PeerProtocol::Gossip));
    }
}
