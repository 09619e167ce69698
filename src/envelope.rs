//! Wire envelopes carried in transaction notes.
//!
//! Standard (ephemeral-ECDH) envelope, version 0x04 / protocol 0x01:
//!
//!   VERSION[1] | PROTOCOL[1] | SENDER_PK[32] | EPHEMERAL_PK[32] |
//!   NONCE[12] | SEALED_SENDER_KEY[48] | CIPHERTEXT[N]
//!
//! PSK-ratchet envelope, version 0x01 / protocol 0x02:
//!
//!   VERSION[1] | PROTOCOL[1] | COUNTER_BE[4] | SENDER_PK[32] |
//!   EPHEMERAL_PK[32] | NONCE[12] | SEALED_SENDER_KEY[48] | CIPHERTEXT[N]
//!
//! Notes are capped at 1024 bytes, so the payload plaintext is bounded by
//! `1024 − header − 16` per format. Envelopes are value types: immutable
//! once constructed, widths checked at the construction boundary.

use crate::crypto::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::ChatError;

/// Maximum size of a transaction note.
pub const MAX_NOTE_LEN: usize = 1024;

pub const STANDARD_VERSION: u8 = 0x04;
pub const STANDARD_PROTOCOL: u8 = 0x01;
pub const PSK_VERSION: u8 = 0x01;
pub const PSK_PROTOCOL: u8 = 0x02;

/// Sealed message-key block: 32-byte key + 16-byte tag.
pub const SEALED_KEY_LEN: usize = KEY_LEN + TAG_LEN;

pub const STANDARD_HEADER_LEN: usize = 2 + 32 + 32 + NONCE_LEN + SEALED_KEY_LEN;
pub const PSK_HEADER_LEN: usize = 2 + 4 + 32 + 32 + NONCE_LEN + SEALED_KEY_LEN;

/// Payload plaintext bound for the standard envelope (882).
pub const STANDARD_MAX_PLAINTEXT: usize = MAX_NOTE_LEN - STANDARD_HEADER_LEN - TAG_LEN;
/// Payload plaintext bound for the PSK envelope (878).
pub const PSK_MAX_PLAINTEXT: usize = MAX_NOTE_LEN - PSK_HEADER_LEN - TAG_LEN;

/// Ephemeral-ECDH message envelope (version 0x04, protocol 0x01).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEnvelope {
    pub sender_pub: [u8; 32],
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    pub sealed_sender_key: [u8; SEALED_KEY_LEN],
    /// AEAD ciphertext || tag of the payload. For a signed key publish this
    /// carries a trailing 64-byte signature after the tag.
    pub ciphertext: Vec<u8>,
}

impl StandardEnvelope {
    pub fn new(
        sender_pub: [u8; 32],
        ephemeral_pub: [u8; 32],
        nonce: [u8; NONCE_LEN],
        sealed_sender_key: [u8; SEALED_KEY_LEN],
        ciphertext: Vec<u8>,
    ) -> Result<Self, ChatError> {
        check_ciphertext_len(ciphertext.len(), STANDARD_HEADER_LEN)?;
        Ok(StandardEnvelope { sender_pub, ephemeral_pub, nonce, sealed_sender_key, ciphertext })
    }

    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STANDARD_HEADER_LEN + self.ciphertext.len());
        out.push(STANDARD_VERSION);
        out.push(STANDARD_PROTOCOL);
        out.extend_from_slice(&self.sender_pub);
        out.extend_from_slice(&self.ephemeral_pub);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed_sender_key);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ChatError> {
        check_leading_bytes(bytes, STANDARD_PROTOCOL, STANDARD_VERSION)?;
        if bytes.len() < STANDARD_HEADER_LEN + TAG_LEN {
            return Err(ChatError::InvalidEnvelope(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(StandardEnvelope {
            sender_pub: bytes[2..34].try_into().unwrap(),
            ephemeral_pub: bytes[34..66].try_into().unwrap(),
            nonce: bytes[66..78].try_into().unwrap(),
            sealed_sender_key: bytes[78..126].try_into().unwrap(),
            ciphertext: bytes[STANDARD_HEADER_LEN..].to_vec(),
        })
    }
}

/// PSK-ratchet message envelope (version 0x01, protocol 0x02).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskEnvelope {
    /// Ratchet counter, big-endian on the wire.
    pub counter: u32,
    pub sender_pub: [u8; 32],
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    pub sealed_sender_key: [u8; SEALED_KEY_LEN],
    pub ciphertext: Vec<u8>,
}

impl PskEnvelope {
    pub fn new(
        counter: u32,
        sender_pub: [u8; 32],
        ephemeral_pub: [u8; 32],
        nonce: [u8; NONCE_LEN],
        sealed_sender_key: [u8; SEALED_KEY_LEN],
        ciphertext: Vec<u8>,
    ) -> Result<Self, ChatError> {
        check_ciphertext_len(ciphertext.len(), PSK_HEADER_LEN)?;
        Ok(PskEnvelope { counter, sender_pub, ephemeral_pub, nonce, sealed_sender_key, ciphertext })
    }

    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PSK_HEADER_LEN + self.ciphertext.len());
        out.push(PSK_VERSION);
        out.push(PSK_PROTOCOL);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.sender_pub);
        out.extend_from_slice(&self.ephemeral_pub);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed_sender_key);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ChatError> {
        check_leading_bytes(bytes, PSK_PROTOCOL, PSK_VERSION)?;
        if bytes.len() < PSK_HEADER_LEN + TAG_LEN {
            return Err(ChatError::InvalidEnvelope(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(PskEnvelope {
            counter: u32::from_be_bytes(bytes[2..6].try_into().unwrap()),
            sender_pub: bytes[6..38].try_into().unwrap(),
            ephemeral_pub: bytes[38..70].try_into().unwrap(),
            nonce: bytes[70..82].try_into().unwrap(),
            sealed_sender_key: bytes[82..130].try_into().unwrap(),
            ciphertext: bytes[PSK_HEADER_LEN..].to_vec(),
        })
    }
}

fn check_leading_bytes(bytes: &[u8], protocol: u8, version: u8) -> Result<(), ChatError> {
    if bytes.len() < 2 {
        return Err(ChatError::InvalidEnvelope("missing version/protocol bytes".into()));
    }
    if bytes[1] != protocol {
        return Err(ChatError::UnsupportedProtocol(bytes[1]));
    }
    if bytes[0] != version {
        return Err(ChatError::UnsupportedVersion(bytes[0]));
    }
    Ok(())
}

fn check_ciphertext_len(len: usize, header_len: usize) -> Result<(), ChatError> {
    if len < TAG_LEN {
        return Err(ChatError::InvalidEnvelope("ciphertext shorter than AEAD tag".into()));
    }
    if header_len + len > MAX_NOTE_LEN {
        return Err(ChatError::InvalidEnvelope("envelope exceeds note size".into()));
    }
    Ok(())
}
