//! Shared HKDF / AEAD primitives used by the standard and PSK pipelines.
//!
//! The AEAD is IETF ChaCha20-Poly1305: 256-bit key, 12-byte nonce, 16-byte
//! tag. Nonces are drawn fresh from the OS entropy source for every seal; a
//! (key, nonce) pair is never reused. The one place a nonce appears under two
//! seals — the payload and the sealed sender-key block of one envelope — uses
//! two independent keys, which keeps the per-key uniqueness rule intact.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::ChatError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Derive a 32-byte key with HKDF-SHA256.
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; KEY_LEN] {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut key = [0u8; KEY_LEN];
    hk.expand(info, &mut key).expect("HKDF output length is valid");
    key
}

/// Like [`derive_key`] with a two-part info string (context label + bound
/// public keys), avoiding an intermediate allocation at every call site.
pub fn derive_key_bound(ikm: &[u8], salt: &[u8], label: &[u8], bound: &[&[u8]]) -> [u8; KEY_LEN] {
    let mut info = Vec::with_capacity(label.len() + bound.iter().map(|b| b.len()).sum::<usize>());
    info.extend_from_slice(label);
    for part in bound {
        info.extend_from_slice(part);
    }
    derive_key(ikm, salt, &info)
}

/// Generate a fresh 12-byte AEAD nonce from the OS entropy source.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], ChatError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| ChatError::RandomGenerationFailed)?;
    Ok(nonce)
}

/// Seal `plaintext` under `key` with `nonce`. Output is ciphertext || tag.
pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, ChatError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| ChatError::KeyDerivationFailed(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| ChatError::DecryptionFailed("AEAD seal failed".into()))
}

/// Open `ciphertext || tag`. Any mismatch — wrong key, tampered bytes,
/// truncation — reports the same `DecryptionFailed` with no partial output.
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, ChatError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| ChatError::KeyDerivationFailed(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ChatError::DecryptionFailed("wrong key or tampered ciphertext".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [3u8; KEY_LEN];
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, b"hello").unwrap();
        assert_eq!(sealed.len(), 5 + TAG_LEN);
        assert_eq!(open(&key, &nonce, &sealed).unwrap(), b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&[3u8; KEY_LEN], &nonce, b"hello").unwrap();
        assert!(open(&[4u8; KEY_LEN], &nonce, &sealed).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = [3u8; KEY_LEN];
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, b"hello").unwrap();
        assert!(open(&key, &nonce, &sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn nonces_are_unique() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn derive_key_binds_salt_and_info() {
        let ikm = [1u8; 32];
        let base = derive_key(&ikm, b"salt", b"info");
        assert_ne!(base, derive_key(&ikm, b"other", b"info"));
        assert_ne!(base, derive_key(&ikm, b"salt", b"other"));
        assert_eq!(base, derive_key(&ikm, b"salt", b"info"));
    }
}
