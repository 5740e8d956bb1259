//! # Cryptographic Infrastructure
//!
//! This module provides the signature primitives for dualsub:
//!
//! - **Signatures**: Domain-separated Ed25519 signing and verification
//! - **Key decoding**: Raw public-key bytes to verifying keys
//!
//! ## Security Properties
//!
//! - Only Ed25519 signatures are accepted (no RSA, ECDSA fallback)
//! - Domain separation prevents cross-protocol signature replay
//! - `verify_strict` rejects malleable / non-canonical signatures

use ed25519_dalek::{Signature, VerifyingKey};

use crate::identity::Keypair;

// ============================================================================
// Signature Error Types
// ============================================================================

/// Error type for signature verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature is missing (empty).
    Missing,
    /// Signature has invalid length (expected 64 bytes for Ed25519).
    InvalidLength,
    /// Cryptographic verification failed.
    VerificationFailed,
    /// The public key is not a valid Ed25519 point.
    InvalidPublicKey,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::Missing => write!(f, "signature is missing"),
            SignatureError::InvalidLength => write!(f, "signature has invalid length"),
            SignatureError::VerificationFailed => write!(f, "signature verification failed"),
            SignatureError::InvalidPublicKey => write!(f, "invalid public key"),
        }
    }
}

impl std::error::Error for SignatureError {}

// ============================================================================
// Domain Separation Prefix
// ============================================================================
//
// SECURITY: Domain separation prevents cross-protocol signature replay
// attacks. Message signatures carry a fixed literal prefix so they cannot be
// reused in a different context.

/// Domain separation prefix for pubsub message signatures.
pub const PUBSUB_SIGNATURE_DOMAIN: &[u8] = b"libp2p-pubsub:";

// ============================================================================
// Domain-Separated Signature Helpers
// ============================================================================

/// Sign data with domain separation.
///
/// Prepends the domain prefix to the data before signing, preventing
/// cross-protocol signature replay attacks.
///
/// # Arguments
/// * `keypair` - The signing keypair
/// * `domain` - Domain separation prefix (e.g., `PUBSUB_SIGNATURE_DOMAIN`)
/// * `data` - The data to sign
///
/// # Returns
/// 64-byte Ed25519 signature as a Vec<u8>
pub fn sign_with_domain(keypair: &Keypair, domain: &[u8], data: &[u8]) -> Vec<u8> {
    let mut prefixed = Vec::with_capacity(domain.len() + data.len());
    prefixed.extend_from_slice(domain);
    prefixed.extend_from_slice(data);
    keypair.sign(&prefixed).to_bytes().to_vec()
}

/// Verify a signature with domain separation.
///
/// Decodes the public key from raw bytes, reconstructs the prefixed data and
/// verifies the Ed25519 signature.
///
/// # Arguments
/// * `public_key` - Raw public-key bytes of the claimed signer
/// * `domain` - Domain separation prefix (must match what was used during signing)
/// * `data` - The original data that was signed
/// * `signature` - The 64-byte Ed25519 signature
///
/// # Returns
/// `Ok(())` if signature is valid, `Err(SignatureError)` otherwise
pub fn verify_with_domain(
    public_key: &[u8],
    domain: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::Missing);
    }
    if signature.len() != 64 {
        return Err(SignatureError::InvalidLength);
    }

    let verifying_key = decode_public_key(public_key)?;

    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| SignatureError::InvalidLength)?;
    let sig = Signature::from_bytes(&sig_bytes);

    let mut prefixed = Vec::with_capacity(domain.len() + data.len());
    prefixed.extend_from_slice(domain);
    prefixed.extend_from_slice(data);

    verifying_key
        .verify_strict(&prefixed, &sig)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Decode raw public-key bytes into an Ed25519 verifying key.
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, SignatureError> {
    VerifyingKey::try_from(bytes).map_err(|_| SignatureError::InvalidPublicKey)
}
