//! # Dualsub - Identity-Delegated Dual-Mode Publish
//!
//! Dualsub is the publish subsystem of a gossip/flood pubsub overlay: it
//! builds, signs, caches, deduplicates and forwards messages, choosing per
//! destination peer between flood-style and gossip mesh/fanout-style
//! forwarding.
//!
//! - **Delegated identity**: a message can be signed as any identity the
//!   caller holds a keypair for, not only the node's own
//! - **Dual-mode routing**: flood-capable subscribers receive everything;
//!   gossip-capable subscribers are reached through the topic mesh, or a
//!   lazily created fanout set when the node is not meshed in
//! - **Dedup**: locally-originated message ids enter a bounded seen cache
//!   at signing time, so looped-back copies are not re-emitted
//! - **Inbound verification**: signatures are checked against an embedded
//!   or originator-derived key before a message is accepted
//!
//! ## Architecture
//!
//! Subscription bookkeeping, mesh maintenance and transport connections are
//! owned by the underlying overlay engine. This crate composes over two
//! injected seams: an `OverlayView` answering topology queries and a
//! `MessageWire` carrying per-peer envelopes.
//!
//! ## Security Model
//!
//! - Identity = Ed25519 public key (no separate identity layer)
//! - Message signatures are domain-separated to prevent cross-protocol replay
//! - All caches are bounded; malformed inbound messages are dropped, never
//!   crash local processing
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `publish` | Message builder, dual-mode router, publish facade |
//! | `verify` | Inbound signature verification |
//! | `seen` | Bounded dedup cache of message identities |
//! | `identity` | Keypairs and public-key identities |
//! | `crypto` | Domain-separated Ed25519 signing |
//! | `messages` | Wire message, canonical encoding, envelopes |
//! | `protocols` | Overlay and transport trait seams |

mod crypto;
mod identity;
mod messages;
mod protocols;
mod publish;
mod seen;
mod verify;

pub use crypto::{
    decode_public_key, sign_with_domain, verify_with_domain, SignatureError,
    PUBSUB_SIGNATURE_DOMAIN,
};
pub use identity::{Identity, Keypair, IDENTITY_LEN};
pub use messages::{
    deserialize_bounded, deserialize_envelope, serialize_envelope, LocalMessage, Message,
    MessageId, WireEnvelope, MAX_ENVELOPE_SIZE, SEQNO_LEN,
};
pub use protocols::{MessageWire, OverlayView, Peer, PeerProtocol};
pub use publish::{
    is_valid_topic, PublishConfig, PublishError, Publisher, DEFAULT_BUILD_CONCURRENCY,
    DEFAULT_FANOUT_DEGREE, MAX_MESSAGE_SIZE, MAX_TOPIC_LENGTH,
};
pub use seen::{SeenCache, DEFAULT_SEEN_CACHE_CAPACITY, DEFAULT_SEEN_TTL};
pub use verify::{MessageValidator, ValidationFailure, VerificationSource};
