//! Binding signatures for published key-agreement keys.
//!
//! A key publish may carry an Ed25519 signature by the account's signing key
//! over its own X25519 public key. Discovery prefers keys whose binding
//! verifies; an envelope without one is accepted for legacy compatibility but
//! flagged unverified.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::ChatError;

pub const SIGNATURE_LEN: usize = 64;

/// Sign the binding of `agreement_pub` to the holder of `signing`.
pub fn sign_key_binding(signing: &SigningKey, agreement_pub: &[u8; 32]) -> [u8; SIGNATURE_LEN] {
    signing.sign(agreement_pub).to_bytes()
}

/// Verify that `sig` binds `agreement_pub` to the signing identity
/// `signing_pub_bytes` (the raw Ed25519 public key behind an address).
pub fn verify_key_binding(
    signing_pub_bytes: &[u8; 32],
    agreement_pub: &[u8; 32],
    sig: &[u8],
) -> Result<(), ChatError> {
    let verifying = VerifyingKey::from_bytes(signing_pub_bytes)
        .map_err(|e| ChatError::InvalidPublicKey(e.to_string()))?;
    let sig: [u8; SIGNATURE_LEN] = sig
        .try_into()
        .map_err(|_| ChatError::InvalidSignature("signature must be 64 bytes".into()))?;
    verifying
        .verify(agreement_pub, &Signature::from_bytes(&sig))
        .map_err(|_| ChatError::InvalidSignature("key binding did not verify".into()))
}

/// True iff the trailing [`SIGNATURE_LEN`] bytes of `note` are a valid
/// binding of `agreement_pub` under `signing_pub_bytes`. Used by discovery
/// to classify notes without decrypting anything.
pub fn has_valid_trailing_signature(
    note: &[u8],
    signing_pub_bytes: &[u8; 32],
    agreement_pub: &[u8; 32],
) -> bool {
    if note.len() < SIGNATURE_LEN {
        return false;
    }
    let sig = &note[note.len() - SIGNATURE_LEN..];
    verify_key_binding(signing_pub_bytes, agreement_pub, sig).is_ok()
}
