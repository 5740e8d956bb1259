//! # Identity-Delegated Dual-Mode Publish
//!
//! This module implements the outbound half of the pubsub boundary: building
//! and signing messages under an arbitrary identity, recording them in the
//! seen cache, and forwarding them to peers selected per capability.
//!
//! ## Publish Flow
//!
//! 1. **Build**: each payload becomes an immutable message with a fresh
//!    random seqno, signed under the caller-supplied keypair
//! 2. **Mark seen**: the message id enters the seen cache immediately after
//!    signing, so a looped-back copy is not re-emitted locally
//! 3. **Self-emit**: when enabled and the local node subscribes to a
//!    published topic, the signed message is delivered once to the local
//!    subscriber channel, tagged with the originator's public-key bytes
//! 4. **Route**: flood-capable subscribers are selected unconditionally;
//!    gossip-capable subscribers via the topic mesh, or the (lazily created)
//!    fanout set when the node is not meshed into the topic
//! 5. **Dispatch**: one envelope per destination peer, each send an
//!    independent task
//!
//! ## Dual-Mode Selection
//!
//! | Capability | Peer set | Rule |
//! |------------|----------|------|
//! | Flood | all subscribed flood peers | broadcast to every interested peer |
//! | Gossip, meshed | topic mesh | overlay engine owns membership |
//! | Gossip, unmeshed | topic fanout | up to `fanout_degree` random subscribers, created once |
//!
//! A peer satisfying both classes lands in the destination set once.
//!
//! ## Delegation
//!
//! [`Publisher::publish_as`] signs under any keypair the caller supplies.
//! The builder takes the identity as an explicit argument; nothing defaults
//! to the node's operating identity except [`Publisher::publish`] itself.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::crypto::{sign_with_domain, PUBSUB_SIGNATURE_DOMAIN};
use crate::identity::{Identity, Keypair};
use crate::messages::{LocalMessage, Message, MessageId, WireEnvelope, SEQNO_LEN};
use crate::protocols::{MessageWire, OverlayView, PeerProtocol};
use crate::seen::{SeenCache, DEFAULT_SEEN_CACHE_CAPACITY, DEFAULT_SEEN_TTL};
use crate::verify::MessageValidator;

// ============================================================================
// Configuration Constants
// ============================================================================

/// D - Number of peers selected into a lazily created fanout set.
pub const DEFAULT_FANOUT_DEGREE: usize = 6;

/// Maximum message payload size (64 KiB).
/// SECURITY: Prevents memory exhaustion from large messages.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Width of the worker pool that builds and signs batch payloads.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 4;

/// Capacity of the local subscriber delivery channel.
pub const DEFAULT_LOCAL_CHANNEL_CAPACITY: usize = 1000;

#[inline]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LENGTH
        && topic.chars().all(|c| c.is_ascii_graphic() || c == ' ')
}

/// Publish subsystem configuration.
#[derive(Clone, Debug)]
pub struct PublishConfig {
    /// Sign outbound messages. When false the subsystem operates
    /// unauthenticated and messages leave unsigned.
    pub sign_messages: bool,
    /// Require signatures on inbound messages (see [`MessageValidator`]).
    /// `start()` rejects the combination `strict_signing && !sign_messages`:
    /// strict deployments must always configure signing.
    pub strict_signing: bool,
    /// Deliver published messages to the local subscriber path when the
    /// local node is itself subscribed to a published topic.
    pub emit_self: bool,
    /// D - peers selected into a lazily created fanout set.
    pub fanout_degree: usize,
    /// Maximum message payload size in bytes.
    pub max_message_size: usize,
    /// Seen cache capacity (message ids).
    pub seen_cache_capacity: usize,
    /// Seen cache entry time-to-live.
    pub seen_ttl: Duration,
    /// Width of the batch build/sign worker pool.
    pub build_concurrency: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            sign_messages: true,
            strict_signing: true,
            emit_self: false,
            fanout_degree: DEFAULT_FANOUT_DEGREE,
            max_message_size: MAX_MESSAGE_SIZE,
            seen_cache_capacity: DEFAULT_SEEN_CACHE_CAPACITY,
            seen_ttl: DEFAULT_SEEN_TTL,
            build_concurrency: DEFAULT_BUILD_CONCURRENCY,
        }
    }
}

/// Reasons a publish call (or a single payload within one) is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// Publish invoked before the subsystem was started.
    NotStarted,
    /// Publish invoked with no target topics.
    EmptyTopics,
    /// Payload exceeds the configured maximum message size.
    MessageTooLarge,
    /// Topic name is empty, too long, or contains non-printable characters.
    InvalidTopic,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::NotStarted => write!(f, "publish subsystem has not been started"),
            PublishError::EmptyTopics => write!(f, "publish requires at least one target topic"),
            PublishError::MessageTooLarge => write!(f, "message size exceeds maximum allowed"),
            PublishError::InvalidTopic => {
                write!(
                    f,
                    "topic name is invalid (empty, too long, or contains non-printable characters)"
                )
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// Lazily created gossip peer set for a topic the node is not meshed into.
#[derive(Debug, Clone)]
struct FanoutState {
    peers: Vec<Identity>,
    /// Most recent publish through this set. The overlay engine expires
    /// idle fanout entries via [`Publisher::expire_fanout`].
    last_publish: Instant,
}

// ============================================================================
// Message Builder
// ============================================================================

/// Construct a wire message for `payload`, signed under `keypair` when
/// `sign` is set.
///
/// The identity is an explicit argument: callers may pass any keypair, not
/// just the node's operating identity (delegated publish). Two calls never
/// produce colliding seqno values with overwhelming probability (64 random
/// bits from the OS generator).
fn build_message(
    keypair: &Keypair,
    topics: Vec<String>,
    payload: Vec<u8>,
    sign: bool,
    max_size: usize,
) -> Result<Message, PublishError> {
    if payload.len() > max_size {
        return Err(PublishError::MessageTooLarge);
    }

    let mut seqno = [0u8; SEQNO_LEN];
    OsRng.fill_bytes(&mut seqno);

    let mut message = Message {
        from: keypair.public_key_bytes().to_vec(),
        data: payload,
        seqno,
        topics,
        signature: None,
        key: None,
    };

    if sign {
        let signature = sign_with_domain(keypair, PUBSUB_SIGNATURE_DOMAIN, &message.signed_payload());
        message.signature = Some(signature);
    }

    Ok(message)
}

// ============================================================================
// Publisher (builder + dual-mode router facade)
// ============================================================================

/// The publish subsystem: message builder, seen cache, dual-mode router and
/// dispatch, composed over an injected overlay view and transport wire.
pub struct Publisher<V, W> {
    keypair: Keypair,
    local_identity: Identity,
    config: PublishConfig,
    overlay: Arc<V>,
    wire: Arc<W>,
    seen: SeenCache,
    /// Per-topic fanout sets, owned here. One lock guards the whole map so
    /// lazy creation is a single atomic read-or-create.
    fanout: Mutex<HashMap<String, FanoutState>>,
    local_tx: mpsc::Sender<LocalMessage>,
    started: AtomicBool,
}

impl<V: OverlayView, W: MessageWire> Publisher<V, W> {
    /// Create the publish subsystem around the node's operating identity.
    ///
    /// Returns the publisher and the local subscriber channel that
    /// self-emitted messages are delivered on. The publisher is created
    /// stopped; publish calls fail with [`PublishError::NotStarted`] until
    /// [`start`](Self::start) is called.
    pub fn new(
        keypair: Keypair,
        config: PublishConfig,
        overlay: Arc<V>,
        wire: Arc<W>,
    ) -> (Self, mpsc::Receiver<LocalMessage>) {
        let (local_tx, local_rx) = mpsc::channel(DEFAULT_LOCAL_CHANNEL_CAPACITY);
        let seen = SeenCache::new(config.seen_cache_capacity, config.seen_ttl);
        let local_identity = keypair.identity();

        (
            Self {
                keypair,
                local_identity,
                config,
                overlay,
                wire,
                seen,
                fanout: Mutex::new(HashMap::new()),
                local_tx,
                started: AtomicBool::new(false),
            },
            local_rx,
        )
    }

    /// Start the subsystem.
    ///
    /// Enforces the signing configuration contract: a deployment that
    /// requires signatures on inbound messages must also sign its own.
    pub fn start(&self) -> anyhow::Result<()> {
        if self.config.strict_signing && !self.config.sign_messages {
            anyhow::bail!(
                "strict signing requires a configured signing identity: enable sign_messages"
            );
        }
        self.started.store(true, Ordering::SeqCst);
        debug!(
            identity = %hex::encode(&self.local_identity.as_bytes()[..8]),
            signed = self.config.sign_messages,
            "publish subsystem started"
        );
        Ok(())
    }

    /// Stop the subsystem. Subsequent publish calls fail with
    /// [`PublishError::NotStarted`]; in-flight sends run to completion.
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The node's own operating identity.
    pub fn local_identity(&self) -> Identity {
        self.local_identity
    }

    /// Inbound-boundary validator configured consistently with this
    /// publisher's signing policy.
    pub fn validator(&self) -> MessageValidator {
        MessageValidator::new(self.config.strict_signing)
    }

    /// The seen cache recording locally-originated message ids.
    pub fn seen(&self) -> &SeenCache {
        &self.seen
    }

    /// Publish payloads under the node's own operating identity.
    pub async fn publish(
        &self,
        topics: &[&str],
        payloads: Vec<Vec<u8>>,
    ) -> anyhow::Result<Vec<MessageId>> {
        self.publish_as(&self.keypair, topics, payloads).await
    }

    /// Publish payloads under an arbitrary identity (delegated publish).
    ///
    /// Every payload is built and signed independently with bounded
    /// parallelism; a failure on one payload is logged and does not abort
    /// its batch siblings. Returns the ids of the messages dispatched, once
    /// every per-peer send has been issued (not necessarily acknowledged).
    pub async fn publish_as(
        &self,
        keypair: &Keypair,
        topics: &[&str],
        payloads: Vec<Vec<u8>>,
    ) -> anyhow::Result<Vec<MessageId>> {
        if !self.is_started() {
            return Err(PublishError::NotStarted.into());
        }
        if topics.is_empty() {
            return Err(PublishError::EmptyTopics.into());
        }
        for topic in topics {
            if !is_valid_topic(topic) {
                return Err(PublishError::InvalidTopic.into());
            }
        }

        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let emit_locally =
            self.config.emit_self && topics.iter().any(|t| self.overlay.is_subscribed(t));

        let messages = self.build_batch(keypair, &topics, payloads, emit_locally).await;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<MessageId> = messages.iter().map(Message::id).collect();

        let destinations = self.route(&topics);
        if destinations.is_empty() {
            trace!(topics = ?topics, "no destination peers for publish");
            return Ok(ids);
        }

        // Sends are independent tasks: a slow or failed peer must not delay
        // or fail the others, and none of them is cancelled once issued.
        let envelope = WireEnvelope { publish: messages };
        let peer_count = destinations.len();
        for peer in destinations {
            let wire = Arc::clone(&self.wire);
            let envelope = envelope.clone();
            tokio::spawn(async move {
                if let Err(error) = wire.send_envelope(&peer, envelope).await {
                    debug!(
                        peer = %hex::encode(&peer.as_bytes()[..8]),
                        error = %error,
                        "publish send failed"
                    );
                }
            });
        }

        debug!(
            from = %hex::encode(&keypair.identity().as_bytes()[..8]),
            messages = ids.len(),
            peers = peer_count,
            "published batch"
        );

        Ok(ids)
    }

    /// Build and sign each payload independently with a fixed-width worker
    /// pool. Each completed message is marked seen immediately and
    /// self-emitted when requested.
    async fn build_batch(
        &self,
        keypair: &Keypair,
        topics: &[String],
        payloads: Vec<Vec<u8>>,
        emit_locally: bool,
    ) -> Vec<Message> {
        let mut built = Vec::with_capacity(payloads.len());
        let mut queue = payloads.into_iter();
        let mut pool: JoinSet<Result<Message, PublishError>> = JoinSet::new();
        let width = self.config.build_concurrency.max(1);

        for payload in queue.by_ref().take(width) {
            self.spawn_build(&mut pool, keypair, topics, payload);
        }

        while let Some(result) = pool.join_next().await {
            match result {
                Ok(Ok(message)) => {
                    let msg_id = message.id();
                    self.seen.put(msg_id);
                    if emit_locally {
                        self.emit_to_self(keypair, &message, msg_id).await;
                    }
                    built.push(message);
                }
                Ok(Err(error)) => {
                    // One payload failing must not abort its batch siblings.
                    warn!(error = %error, "dropping payload from publish batch");
                }
                Err(error) => {
                    warn!(error = %error, "message build task failed");
                }
            }
            if let Some(payload) = queue.next() {
                self.spawn_build(&mut pool, keypair, topics, payload);
            }
        }

        built
    }

    fn spawn_build(
        &self,
        pool: &mut JoinSet<Result<Message, PublishError>>,
        keypair: &Keypair,
        topics: &[String],
        payload: Vec<u8>,
    ) {
        let keypair = keypair.clone();
        let topics = topics.to_vec();
        let sign = self.config.sign_messages;
        let max_size = self.config.max_message_size;
        pool.spawn(async move { build_message(&keypair, topics, payload, sign, max_size) });
    }

    /// Deliver a published message to the local subscriber path, tagged with
    /// the originator's public-key bytes for downstream attribution.
    async fn emit_to_self(&self, keypair: &Keypair, message: &Message, msg_id: MessageId) {
        let mut local = message.clone();
        local.key = Some(keypair.public_key_bytes().to_vec());
        let delivery = LocalMessage {
            message: local,
            msg_id,
            received_at: Instant::now(),
        };
        if self.local_tx.send(delivery).await.is_err() {
            trace!("local subscriber channel closed, dropping self-emission");
        }
    }

    // ========================================================================
    // Dual-Mode Router
    // ========================================================================

    /// Resolve the destination peer set for a topic list without dispatching.
    ///
    /// Flood-capable subscribers are selected unconditionally per topic;
    /// gossip-capable subscribers via the topic mesh when one is active,
    /// otherwise via the fanout set (created lazily on first use). The union
    /// deduplicates peers reachable through both capability classes or
    /// through multiple topics. A topic with no subscribed peers contributes
    /// nothing and is not an error.
    pub fn route(&self, topics: &[String]) -> HashSet<Identity> {
        let mut destinations = HashSet::new();

        for topic in topics {
            let subscribers = self.overlay.subscribed_peers(topic);
            if subscribers.is_empty() {
                trace!(topic = %topic, "no subscribed peers for topic");
                continue;
            }

            for peer in &subscribers {
                if peer.supports(PeerProtocol::Flood) {
                    destinations.insert(peer.identity);
                }
            }

            let gossip_pool: Vec<Identity> = subscribers
                .iter()
                .filter(|p| p.supports(PeerProtocol::Gossip))
                .map(|p| p.identity)
                .collect();
            if gossip_pool.is_empty() {
                continue;
            }

            match self.overlay.mesh_peers(topic) {
                Some(mesh) if !mesh.is_empty() => {
                    destinations.extend(mesh);
                }
                _ => {
                    destinations.extend(self.fanout_or_create(topic, &gossip_pool));
                }
            }
        }

        destinations.remove(&self.local_identity);
        destinations
    }

    /// Read the fanout set for `topic`, creating it from `pool` on first
    /// use. One lock guards check and create, so two concurrent publishes
    /// observe the same set rather than fabricating two different ones.
    fn fanout_or_create(&self, topic: &str, pool: &[Identity]) -> Vec<Identity> {
        let mut fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        let degree = self.config.fanout_degree;
        let state = fanout.entry(topic.to_string()).or_insert_with(|| {
            let mut rng = rand::thread_rng();
            let peers: Vec<Identity> = pool.choose_multiple(&mut rng, degree).copied().collect();
            trace!(topic = %topic, peers = peers.len(), "created fanout set");
            FanoutState {
                peers,
                last_publish: Instant::now(),
            }
        });
        state.last_publish = Instant::now();
        state.peers.clone()
    }

    /// Current fanout peers for `topic`, if a set exists.
    pub fn fanout_peers(&self, topic: &str) -> Option<Vec<Identity>> {
        let fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        fanout.get(topic).map(|state| state.peers.clone())
    }

    /// Drop the fanout set for `topic`. Called by the overlay engine, e.g.
    /// when the node joins the topic mesh.
    pub fn drop_fanout(&self, topic: &str) {
        let mut fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        fanout.remove(topic);
    }

    /// Drop fanout sets that have not been published through for `idle`.
    /// Called by the overlay engine on its maintenance schedule.
    pub fn expire_fanout(&self, idle: Duration) {
        let mut fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        fanout.retain(|topic, state| {
            let keep = state.last_publish.elapsed() <= idle;
            if !keep {
                trace!(topic = %topic, "expired idle fanout set");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_with_domain;

    #[test]
    fn config_defaults_are_sane() {
        let config = PublishConfig::default();
        assert!(config.fanout_degree > 0);
        assert!(config.max_message_size > 0);
        assert!(config.seen_cache_capacity > 0);
        assert!(config.seen_ttl.as_secs() > 0);
        assert!(config.build_concurrency > 0);
        // Strict deployments must sign; the default config honors its own
        // contract.
        assert!(config.sign_messages || !config.strict_signing);
    }

    #[test]
    fn topic_validation() {
        assert!(is_valid_topic("chat"));
        assert!(is_valid_topic("chat room 1"));
        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic(&"x".repeat(MAX_TOPIC_LENGTH + 1)));
        assert!(!is_valid_topic("bad\ntopic"));
        assert!(!is_valid_topic("bad\u{7f}topic"));
    }

    #[test]
    fn publish_error_variants_and_display() {
        let variants = [
            (PublishError::NotStarted, "publish subsystem has not been started"),
            (PublishError::EmptyTopics, "publish requires at least one target topic"),
            (PublishError::MessageTooLarge, "message size exceeds maximum allowed"),
            (
                PublishError::InvalidTopic,
                "topic name is invalid (empty, too long, or contains non-printable characters)",
            ),
        ];

        for (variant, expected) in &variants {
            let cloned = *variant;
            assert_eq!(*variant, cloned);
            let _debug = format!("{:?}", cloned);
            assert_eq!(&format!("{}", variant), *expected);
            let err: anyhow::Error = (*variant).into();
            assert!(err.to_string().contains(expected));
        }
    }

    #[test]
    fn built_message_carries_identity_and_verifies() {
        let keypair = Keypair::generate();
        let message = build_message(
            &keypair,
            vec!["chat".to_string()],
            b"hello".to_vec(),
            true,
            MAX_MESSAGE_SIZE,
        )
        .expect("build must succeed");

        assert_eq!(message.from, keypair.public_key_bytes().to_vec());
        assert_eq!(message.data, b"hello");
        assert!(message.key.is_none());
        let signature = message.signature.as_ref().expect("message must be signed");
        verify_with_domain(
            &message.from,
            PUBSUB_SIGNATURE_DOMAIN,
            &message.signed_payload(),
            signature,
        )
        .expect("signature must verify");
    }

    #[test]
    fn unsigned_mode_leaves_signature_absent() {
        let keypair = Keypair::generate();
        let message = build_message(
            &keypair,
            vec!["chat".to_string()],
            b"hello".to_vec(),
            false,
            MAX_MESSAGE_SIZE,
        )
        .expect("build must succeed");
        assert!(message.signature.is_none());
        assert!(message.key.is_none());
    }

    #[test]
    fn builds_never_reuse_seqno() {
        let keypair = Keypair::generate();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let message = build_message(
                &keypair,
                vec!["chat".to_string()],
                b"x".to_vec(),
                false,
                MAX_MESSAGE_SIZE,
            )
            .expect("build must succeed");
            assert!(seen.insert(message.seqno), "seqno collision");
        }
    }

    #[test]
    fn oversized_payload_rejected() {
        let keypair = Keypair::generate();
        let result = build_message(
            &keypair,
            vec!["chat".to_string()],
            vec![0u8; 32],
            true,
            16,
        );
        assert_eq!(result, Err(PublishError::MessageTooLarge));
    }
}
