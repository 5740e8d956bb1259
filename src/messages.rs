//! # Wire Message Types
//!
//! This module defines the pubsub wire message, its canonical signed
//! encoding, and the per-peer envelope the router hands to the transport.
//! Envelopes are serialized using bincode with size limits to prevent memory
//! exhaustion on decode.
//!
//! ## Message IDs
//!
//! Messages are identified by a 32-byte `MessageId` computed as
//! `blake3(from || seqno)`. The originator identity plus a fresh random
//! sequence token uniquely names a message, so the id doubles as the
//! seen-cache dedup key.
//!
//! ## Canonical Signed Encoding
//!
//! The bytes that get signed are a deterministic, length-prefixed
//! concatenation of every field except `signature` and `key`:
//!
//! `from_len(4 LE) || from || data_len(4 LE) || data || seqno(8) ||
//!  topic_count(4 LE) || (topic_len(4 LE) || topic)*`
//!
//! Any verifier performing the same canonicalization reproduces the signed
//! bytes exactly.

use std::time::Instant;

use bincode::Options;
use blake3::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::identity::Identity;

/// Width in bytes of a message sequence token.
pub const SEQNO_LEN: usize = 8;

/// Maximum serialized size of a wire envelope (1 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Maximum buffer size for deserialization.
/// Set slightly larger than MAX_ENVELOPE_SIZE to allow for framing overhead.
pub const MAX_DESERIALIZE_SIZE: u64 = (MAX_ENVELOPE_SIZE as u64) + 4096;

/// Returns bincode options with size limits enforced.
/// SECURITY: Always use this for deserialization to prevent OOM attacks.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DESERIALIZE_SIZE)
        .with_fixint_encoding()
}

/// Deserialize with size bounds enforced.
/// SECURITY: Use this instead of raw bincode::deserialize.
pub fn deserialize_bounded<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode_options().deserialize(bytes)
}

pub fn serialize_envelope(envelope: &WireEnvelope) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(envelope)
}

pub fn deserialize_envelope(data: &[u8]) -> Result<WireEnvelope, bincode::Error> {
    bincode_options().deserialize(data)
}

/// Content-derived identifier of a pubsub message: `blake3(from || seqno)`.
pub type MessageId = [u8; 32];

/// A pubsub wire message.
///
/// `from` carries the raw identity-key bytes of the claimed originator. When
/// the message is signed, `signature` covers the domain-separated canonical
/// encoding of every other field; `key` optionally embeds the originator's
/// public key for verifiers that cannot derive one from `from`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Raw identity-key bytes of the claimed originator.
    pub from: Vec<u8>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Fixed-width random sequence token, fresh per message.
    pub seqno: [u8; SEQNO_LEN],
    /// Topics this message is published to. Never empty on the wire.
    pub topics: Vec<String>,
    /// Ed25519 signature over the domain-separated canonical encoding.
    pub signature: Option<Vec<u8>>,
    /// Embedded public-key bytes, when `from` alone is not recoverable.
    pub key: Option<Vec<u8>>,
}

impl Message {
    /// Compute this message's identity: `blake3(from || seqno)`.
    pub fn id(&self) -> MessageId {
        let mut hasher = Hasher::new();
        hasher.update(&self.from);
        hasher.update(&self.seqno);
        *hasher.finalize().as_bytes()
    }

    /// Build the canonical encoding that gets signed.
    ///
    /// Every field except `signature` and `key` is concatenated in fixed
    /// order with 4-byte little-endian length prefixes, so signer and
    /// verifier produce identical bytes regardless of how the message was
    /// transported.
    pub fn signed_payload(&self) -> Vec<u8> {
        let topics_len: usize = self.topics.iter().map(|t| 4 + t.len()).sum();
        let mut payload =
            Vec::with_capacity(4 + self.from.len() + 4 + self.data.len() + SEQNO_LEN + 4 + topics_len);

        payload.extend_from_slice(&(self.from.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.from);

        payload.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.data);

        payload.extend_from_slice(&self.seqno);

        payload.extend_from_slice(&(self.topics.len() as u32).to_le_bytes());
        for topic in &self.topics {
            let bytes = topic.as_bytes();
            payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            payload.extend_from_slice(bytes);
        }

        payload
    }

    /// The claimed originator as an [`Identity`], when `from` is 32 bytes.
    pub fn originator(&self) -> Option<Identity> {
        Identity::from_slice(&self.from)
    }
}

/// Per-peer outbound envelope handed to the transport.
///
/// A single publish call batches all messages it built for the same topic
/// set into one envelope per destination peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Full messages being pushed to the peer.
    pub publish: Vec<Message>,
}

/// A message delivered to the local subscriber path via self-emission.
///
/// Carries the same signed object that went out on the wire, with `key`
/// populated with the originator's public-key bytes for downstream
/// attribution.
#[derive(Clone, Debug)]
pub struct LocalMessage {
    pub message: Message,
    pub msg_id: MessageId,
    pub received_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            from: vec![1u8; 32],
            data: b"payload".to_vec(),
            seqno: [7u8; SEQNO_LEN],
            topics: vec!["chat".to_string(), "news".to_string()],
            signature: None,
            key: None,
        }
    }

    #[test]
    fn message_id_is_deterministic() {
        let msg = sample_message();
        assert_eq!(msg.id(), msg.id());
    }

    #[test]
    fn message_id_changes_with_seqno_and_from() {
        let msg = sample_message();
        let mut other_seqno = msg.clone();
        other_seqno.seqno = [8u8; SEQNO_LEN];
        assert_ne!(msg.id(), other_seqno.id());

        let mut other_from = msg.clone();
        other_from.from = vec![2u8; 32];
        assert_ne!(msg.id(), other_from.id());
    }

    #[test]
    fn message_id_ignores_payload_and_topics() {
        // Identity is (from, seqno): the same originator never reuses a
        // seqno, so payload bytes do not participate.
        let msg = sample_message();
        let mut other = msg.clone();
        other.data = b"different".to_vec();
        other.topics = vec!["other".to_string()];
        assert_eq!(msg.id(), other.id());
    }

    #[test]
    fn signed_payload_excludes_signature_and_key() {
        let msg = sample_message();
        let mut signed = msg.clone();
        signed.signature = Some(vec![0xAB; 64]);
        signed.key = Some(vec![1u8; 32]);
        assert_eq!(msg.signed_payload(), signed.signed_payload());
    }

    #[test]
    fn signed_payload_is_injective_over_fields() {
        let msg = sample_message();

        let mut other_data = msg.clone();
        other_data.data = b"payloae".to_vec();
        assert_ne!(msg.signed_payload(), other_data.signed_payload());

        let mut other_topics = msg.clone();
        other_topics.topics = vec!["chat".to_string()];
        assert_ne!(msg.signed_payload(), other_topics.signed_payload());

        let mut other_seqno = msg.clone();
        other_seqno.seqno = [8u8; SEQNO_LEN];
        assert_ne!(msg.signed_payload(), other_seqno.signed_payload());
    }

    #[test]
    fn originator_requires_32_byte_from() {
        let msg = sample_message();
        assert!(msg.originator().is_some());

        let mut short = msg.clone();
        short.from = vec![1u8; 16];
        assert!(short.originator().is_none());
    }

    #[test]
    fn envelope_serialization_round_trip() {
        let envelope = WireEnvelope {
            publish: vec![sample_message()],
        };
        let bytes = serialize_envelope(&envelope).expect("serialize must succeed");
        let decoded = deserialize_envelope(&bytes).expect("deserialize must succeed");
        assert_eq!(decoded.publish, envelope.publish);
    }

    #[test]
    fn bounded_deserialization_rejects_oversized_input() {
        // A length prefix claiming more data than MAX_DESERIALIZE_SIZE must
        // fail cleanly instead of allocating.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(u64::MAX).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(deserialize_bounded::<WireEnvelope>(&bytes).is_err());
    }
}
