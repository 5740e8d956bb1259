//! # Inbound Signature Verification
//!
//! Every message received from the overlay passes through
//! [`MessageValidator::validate`] before the rest of the system accepts it.
//! Validation is a drop decision: the result is a boolean and malformed
//! input from a remote peer can never crash local processing.
//!
//! ## Key Resolution
//!
//! The verifying key is resolved from one of two sources, represented
//! explicitly as [`VerificationSource`]:
//!
//! | Source | When |
//! |--------|------|
//! | `EmbeddedKey` | the message carries a `key` field |
//! | `DerivedFromOriginator` | `from` itself decodes to a public key |
//!
//! The embedded key is preferred. When neither yields a usable key the
//! message fails with a key-resolution error and is dropped.

use tracing::debug;

use crate::crypto::{verify_with_domain, SignatureError, PUBSUB_SIGNATURE_DOMAIN};
use crate::messages::Message;

/// Reasons an inbound message fails validation. Logged, never propagated
/// across the trust boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Strict signing is enabled and the message carries no signature.
    MissingSignature,
    /// Neither the embedded `key` nor `from` yields a usable public key.
    KeyResolution,
    /// The signature bytes are structurally invalid (wrong length, empty).
    MalformedSignature,
    /// The signature is well-formed but does not verify.
    SignatureMismatch,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::MissingSignature => {
                write!(f, "message carries no signature and strict signing is enabled")
            }
            ValidationFailure::KeyResolution => {
                write!(f, "no usable verifying key from embedded key or originator bytes")
            }
            ValidationFailure::MalformedSignature => write!(f, "signature bytes are malformed"),
            ValidationFailure::SignatureMismatch => write!(f, "signature does not verify"),
        }
    }
}

impl std::error::Error for ValidationFailure {}

/// Where the verifying public key for a message comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationSource {
    /// The message embeds the key bytes in its `key` field.
    EmbeddedKey(Vec<u8>),
    /// The claimed originator bytes (`from`) themselves encode the key.
    DerivedFromOriginator,
}

impl VerificationSource {
    /// Resolve the key source for a message. The embedded key is preferred.
    pub fn resolve(message: &Message) -> Self {
        match &message.key {
            Some(key) => VerificationSource::EmbeddedKey(key.clone()),
            None => VerificationSource::DerivedFromOriginator,
        }
    }

    /// The raw key bytes this source designates within `message`.
    pub fn key_bytes<'a>(&'a self, message: &'a Message) -> &'a [u8] {
        match self {
            VerificationSource::EmbeddedKey(key) => key,
            VerificationSource::DerivedFromOriginator => &message.from,
        }
    }
}

/// Inbound-boundary signature verifier.
#[derive(Debug, Clone, Copy)]
pub struct MessageValidator {
    strict_signing: bool,
}

impl MessageValidator {
    /// Create a validator. With `strict_signing` every unsigned message is
    /// rejected; without it unsigned messages pass unconditionally.
    pub fn new(strict_signing: bool) -> Self {
        Self { strict_signing }
    }

    pub fn strict_signing(&self) -> bool {
        self.strict_signing
    }

    /// Whether the message should be accepted. Failures are logged at debug
    /// and reported as `false`.
    pub fn validate(&self, message: &Message) -> bool {
        match self.check(message) {
            Ok(()) => true,
            Err(failure) => {
                debug!(
                    msg_id = %hex::encode(&message.id()[..8]),
                    reason = %failure,
                    "rejecting inbound message"
                );
                false
            }
        }
    }

    /// Validation with the failure reason, for callers that differentiate
    /// (e.g. to penalize peers relaying forged signatures).
    pub fn check(&self, message: &Message) -> Result<(), ValidationFailure> {
        let Some(signature) = &message.signature else {
            if self.strict_signing {
                return Err(ValidationFailure::MissingSignature);
            }
            return Ok(());
        };

        let source = VerificationSource::resolve(message);
        let key_bytes = source.key_bytes(message);

        verify_with_domain(
            key_bytes,
            PUBSUB_SIGNATURE_DOMAIN,
            &message.signed_payload(),
            signature,
        )
        .map_err(|error| match error {
            SignatureError::InvalidPublicKey => ValidationFailure::KeyResolution,
            SignatureError::Missing | SignatureError::InvalidLength => {
                ValidationFailure::MalformedSignature
            }
            SignatureError::VerificationFailed => ValidationFailure::SignatureMismatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_with_domain;
    use crate::identity::Keypair;
    use crate::messages::SEQNO_LEN;

    fn unsigned_message(keypair: &Keypair) -> Message {
        Message {
            from: keypair.public_key_bytes().to_vec(),
            data: b"payload".to_vec(),
            seqno: [3u8; SEQNO_LEN],
            topics: vec!["chat".to_string()],
            signature: None,
            key: None,
        }
    }

    fn signed_message(keypair: &Keypair) -> Message {
        let mut message = unsigned_message(keypair);
        let signature =
            sign_with_domain(keypair, PUBSUB_SIGNATURE_DOMAIN, &message.signed_payload());
        message.signature = Some(signature);
        message
    }

    #[test]
    fn signed_message_validates() {
        let keypair = Keypair::generate();
        let message = signed_message(&keypair);
        assert!(MessageValidator::new(true).validate(&message));
        assert!(MessageValidator::new(false).validate(&message));
    }

    #[test]
    fn strict_mode_rejects_unsigned() {
        let keypair = Keypair::generate();
        let message = unsigned_message(&keypair);
        let validator = MessageValidator::new(true);
        assert!(!validator.validate(&message));
        assert_eq!(
            validator.check(&message),
            Err(ValidationFailure::MissingSignature)
        );
    }

    #[test]
    fn permissive_mode_accepts_unsigned() {
        let keypair = Keypair::generate();
        let message = unsigned_message(&keypair);
        assert!(MessageValidator::new(false).validate(&message));
    }

    #[test]
    fn tampered_payload_fails() {
        let keypair = Keypair::generate();
        let mut message = signed_message(&keypair);
        message.data = b"tampered".to_vec();
        assert_eq!(
            MessageValidator::new(true).check(&message),
            Err(ValidationFailure::SignatureMismatch)
        );
    }

    #[test]
    fn embedded_key_is_preferred_over_originator() {
        // Originator bytes that do not decode to a key, with the real key
        // embedded: validation must resolve through the key field.
        let keypair = Keypair::generate();
        let mut message = Message {
            from: vec![0xAB; 16],
            data: b"payload".to_vec(),
            seqno: [9u8; SEQNO_LEN],
            topics: vec!["chat".to_string()],
            signature: None,
            key: Some(keypair.public_key_bytes().to_vec()),
        };
        let signature =
            sign_with_domain(&keypair, PUBSUB_SIGNATURE_DOMAIN, &message.signed_payload());
        message.signature = Some(signature);

        assert_eq!(
            VerificationSource::resolve(&message),
            VerificationSource::EmbeddedKey(keypair.public_key_bytes().to_vec())
        );
        assert!(MessageValidator::new(true).validate(&message));
    }

    #[test]
    fn key_resolution_failure_drops_message() {
        // No embedded key and an undecodable originator: terminal failure
        // for this message, not a crash.
        let keypair = Keypair::generate();
        let mut message = Message {
            from: vec![0xAB; 16],
            data: b"payload".to_vec(),
            seqno: [9u8; SEQNO_LEN],
            topics: vec!["chat".to_string()],
            signature: None,
            key: None,
        };
        let signature =
            sign_with_domain(&keypair, PUBSUB_SIGNATURE_DOMAIN, &message.signed_payload());
        message.signature = Some(signature);

        let validator = MessageValidator::new(true);
        assert!(!validator.validate(&message));
        assert_eq!(
            validator.check(&message),
            Err(ValidationFailure::KeyResolution)
        );
    }

    #[test]
    fn malformed_signature_rejected() {
        let keypair = Keypair::generate();
        let mut message = unsigned_message(&keypair);
        message.signature = Some(vec![0u8; 12]);
        assert_eq!(
            MessageValidator::new(true).check(&message),
            Err(ValidationFailure::MalformedSignature)
        );
    }

    #[test]
    fn validation_failure_display() {
        let variants = [
            ValidationFailure::MissingSignature,
            ValidationFailure::KeyResolution,
            ValidationFailure::MalformedSignature,
            ValidationFailure::SignatureMismatch,
        ];
        for variant in &variants {
            assert!(!format!("{}", variant).is_empty());
        }
    }
}
