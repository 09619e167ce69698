//! Algorand address encoding.
//!
//! An address is `base32(pubkey[32] || checksum[4])` where the checksum is
//! the last 4 bytes of SHA-512/256 over the public key. 58 characters,
//! RFC 4648 alphabet, no padding.

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512_256};

use crate::error::ChatError;

const CHECKSUM_LEN: usize = 4;
const ADDRESS_LEN: usize = 58;

/// Encode a 32-byte Ed25519 public key as an Algorand address.
pub fn encode(pubkey: &[u8; 32]) -> String {
    let digest = Sha512_256::digest(pubkey);
    let mut raw = [0u8; 32 + CHECKSUM_LEN];
    raw[..32].copy_from_slice(pubkey);
    raw[32..].copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    BASE32_NOPAD.encode(&raw)
}

/// Decode an Algorand address back to the Ed25519 public key bytes.
pub fn decode(address: &str) -> Result<[u8; 32], ChatError> {
    if address.len() != ADDRESS_LEN {
        return Err(ChatError::InvalidPublicKey(format!(
            "address must be {ADDRESS_LEN} characters, got {}",
            address.len()
        )));
    }
    let raw = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| ChatError::InvalidPublicKey(format!("bad base32: {e}")))?;
    if raw.len() != 32 + CHECKSUM_LEN {
        return Err(ChatError::InvalidPublicKey("bad address length".into()));
    }

    let pubkey: [u8; 32] = raw[..32].try_into().expect("checked length");
    let digest = Sha512_256::digest(pubkey);
    if raw[32..] != digest[digest.len() - CHECKSUM_LEN..] {
        return Err(ChatError::InvalidPublicKey("address checksum mismatch".into()));
    }
    Ok(pubkey)
}
