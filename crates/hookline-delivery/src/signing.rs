//! Payload signing for outgoing webhooks.
//!
//! Endpoints verify authenticity by recomputing the HMAC-SHA256 of the raw
//! request body with the shared message secret and comparing it against the
//! signature header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature generation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Secret is unusable as a MAC key.
    #[error("invalid secret key")]
    InvalidSecret,
}

/// Produces the signature placed in the configured signature header.
pub trait PayloadSigner: Send + Sync {
    /// Signs `payload` with `secret`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError` if the secret cannot be used as a key.
    fn sign(&self, secret: &str, payload: &[u8]) -> Result<String, SignatureError>;
}

/// HMAC-SHA256 signer producing lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Signer;

impl PayloadSigner for HmacSha256Signer {
    fn sign(&self, secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
        generate_hmac_hex(payload, secret)
    }
}

/// Generates HMAC-SHA256 signature as hex string.
///
/// Any secret, including an empty one, is a valid HMAC key.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the MAC rejects the key.
pub fn generate_hmac_hex(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a received hex signature against the expected one for `payload`.
///
/// The comparison runs in time independent of where the strings differ.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    match generate_hmac_hex(payload, secret) {
        Ok(expected) => timing_safe_eq(&signature.to_ascii_lowercase(), &expected),
        Err(_) => false,
    }
}

fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
