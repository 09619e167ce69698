//! Identity keys: one Ed25519 signing seed, two uses.
//!
//! The chain authenticates transactions with the Ed25519 signing key; message
//! encryption runs X25519 ECDH over a key-agreement pair derived
//! deterministically from the same seed (SHA-512/clamp, RFC 7748 §5). The
//! user manages a single mnemonic, and a peer who only knows the signing
//! public key still cannot compute the key-agreement public key — it has to
//! be announced on-chain.

use bip39::Mnemonic;
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::Digest;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::address;
use crate::error::ChatError;

/// Length of a raw key-agreement public key on the wire.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Convert a 32-byte Ed25519 seed to an X25519 static secret.
/// Uses SHA-512/clamp derivation (RFC 7748 §5).
pub fn x25519_secret_from_seed(seed_bytes: &[u8; 32]) -> StaticSecret {
    let hash = sha2::Sha512::digest(seed_bytes);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash[..32]);
    key[0]  &= 248;
    key[31] &= 127;
    key[31] |= 64;
    StaticSecret::from(key)
}

/// Decode 32 raw bytes into an X25519 public key.
///
/// Rejects inputs whose length is not exactly 32 and the identity point
/// (all-zero), which would yield a non-contributory shared secret.
pub fn decode_public_key(bytes: &[u8]) -> Result<X25519Public, ChatError> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| {
        ChatError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    if arr == [0u8; 32] {
        return Err(ChatError::InvalidPublicKey("identity point".into()));
    }
    Ok(X25519Public::from(arr))
}

/// A participant's long-lived key material.
///
/// Holds the Ed25519 signing key (chain identity) and the X25519 static
/// secret derived from the same seed. The derivation is a pure function of
/// the seed: constructing twice from the same seed yields the same pair.
pub struct ChatIdentity {
    signing: SigningKey,
    agreement: StaticSecret,
}

impl ChatIdentity {
    pub fn from_signing_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let agreement = x25519_secret_from_seed(seed);
        ChatIdentity { signing, agreement }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn signing_public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The Algorand address derived from the signing public key.
    pub fn address(&self) -> String {
        address::encode(self.signing.verifying_key().as_bytes())
    }

    pub(crate) fn agreement_secret(&self) -> &StaticSecret {
        &self.agreement
    }

    /// Raw 32-byte key-agreement public key, as exchanged on the wire.
    pub fn agreement_public(&self) -> [u8; 32] {
        *X25519Public::from(&self.agreement).as_bytes()
    }
}

impl std::fmt::Debug for ChatIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never prints secret material.
        f.debug_struct("ChatIdentity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Generate a brand-new identity and its 24-word BIP-39 mnemonic.
pub fn generate_identity() -> (ChatIdentity, String) {
    let mnemonic = Mnemonic::generate(24).expect("24-word mnemonic generation is infallible");
    let identity = identity_from_mnemonic_internal(&mnemonic);
    let words: Vec<&str> = mnemonic.words().collect();
    (identity, words.join(" "))
}

/// Derive an identity from an existing 24-word BIP-39 mnemonic phrase.
pub fn identity_from_mnemonic(phrase: &str) -> Result<ChatIdentity, ChatError> {
    let mnemonic = phrase
        .parse::<Mnemonic>()
        .map_err(|e| ChatError::KeyDerivationFailed(format!("invalid mnemonic: {e}")))?;
    Ok(identity_from_mnemonic_internal(&mnemonic))
}

fn identity_from_mnemonic_internal(mnemonic: &Mnemonic) -> ChatIdentity {
    // 64-byte PBKDF2 seed (BIP-39 standard, no passphrase); the first 32
    // bytes become the Ed25519 signing seed.
    let seed = mnemonic.to_seed("");
    let seed_bytes: [u8; 32] = seed[..32].try_into().expect("seed is always 64 bytes");
    ChatIdentity::from_signing_seed(&seed_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let seed = [7u8; 32];
        let a = ChatIdentity::from_signing_seed(&seed);
        let b = ChatIdentity::from_signing_seed(&seed);
        assert_eq!(a.agreement_public(), b.agreement_public());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn signing_and_agreement_keys_differ() {
        let seed = [9u8; 32];
        let id = ChatIdentity::from_signing_seed(&seed);
        assert_ne!(id.agreement_public(), *id.signing_public().as_bytes());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(decode_public_key(&[0u8; 31]).is_err());
        assert!(decode_public_key(&[0u8; 33]).is_err());
    }

    #[test]
    fn decode_rejects_identity_point() {
        assert!(decode_public_key(&[0u8; 32]).is_err());
    }

    #[test]
    fn generate_and_reimport() {
        let (id1, mnemonic) = generate_identity();
        assert_eq!(mnemonic.split_whitespace().count(), 24);

        let id2 = identity_from_mnemonic(&mnemonic).expect("valid mnemonic");
        assert_eq!(id1.agreement_public(), id2.agreement_public());
        assert_eq!(id1.address(), id2.address());
    }

    #[test]
    fn bad_mnemonic_returns_error() {
        assert!(identity_from_mnemonic("not valid").is_err());
    }
}
