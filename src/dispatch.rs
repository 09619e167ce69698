//! Note routing: from raw note bytes to the right codec + decrypter.
//!
//! The chain carries plenty of unrelated traffic, so bytes whose leading
//! (version, protocol) pair is not registered are simply not ours — that is
//! `Ok(None)`, never an error. A registered pair with a malformed rest *is*
//! an error at the single-note boundary; during a stream scan such notes are
//! skipped so one bad envelope cannot poison the stream.

use log::{debug, warn};

use crate::envelope::{
    PskEnvelope, StandardEnvelope, PSK_PROTOCOL, PSK_VERSION, STANDARD_PROTOCOL, STANDARD_VERSION,
};
use crate::error::ChatError;
use crate::keys::ChatIdentity;
use crate::manager::PskManager;
use crate::payload::DecodedPayload;
use crate::psk;
use crate::standard;
use crate::chain::NoteRecord;

/// A note routed to one of the registered envelope formats.
#[derive(Debug, Clone)]
pub enum ParsedEnvelope {
    Standard(StandardEnvelope),
    Psk(PskEnvelope),
}

impl ParsedEnvelope {
    /// Sender's static key-agreement public key from the header.
    pub fn sender_pub(&self) -> &[u8; 32] {
        match self {
            ParsedEnvelope::Standard(env) => &env.sender_pub,
            ParsedEnvelope::Psk(env) => &env.sender_pub,
        }
    }
}

/// A decrypted user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub text: String,
    pub reply_to_id: Option<String>,
    pub reply_to_preview: Option<String>,
}

/// A decrypted message paired with its transaction context.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub txid: String,
    pub sender: String,
    pub receiver: String,
    pub round: u64,
    pub message: DecryptedMessage,
}

/// Route raw note bytes by their leading version/protocol pair.
///
/// `Ok(None)` means the bytes are not a chat envelope at all.
pub fn route_note(bytes: &[u8]) -> Result<Option<ParsedEnvelope>, ChatError> {
    if bytes.len() < 2 {
        return Ok(None);
    }
    match (bytes[0], bytes[1]) {
        (STANDARD_VERSION, STANDARD_PROTOCOL) => {
            StandardEnvelope::parse(bytes).map(|env| Some(ParsedEnvelope::Standard(env)))
        }
        (PSK_VERSION, PSK_PROTOCOL) => {
            PskEnvelope::parse(bytes).map(|env| Some(ParsedEnvelope::Psk(env)))
        }
        _ => Ok(None),
    }
}

fn user_message(payload: DecodedPayload) -> Option<DecryptedMessage> {
    match payload {
        DecodedPayload::KeyPublish => None,
        DecodedPayload::Text { text, reply_to_id, reply_to_preview } => {
            Some(DecryptedMessage { text, reply_to_id, reply_to_preview })
        }
    }
}

/// Decrypt one note end to end.
///
/// `Ok(None)` covers both not-ours bytes and the key-publish marker, which
/// is filtered out of user-visible streams here. `sender_address` names the
/// transaction author; it selects the PSK contact on the ratchet path.
pub async fn decrypt_note(
    identity: &ChatIdentity,
    manager: Option<&PskManager>,
    sender_address: &str,
    bytes: &[u8],
) -> Result<Option<DecryptedMessage>, ChatError> {
    let Some(parsed) = route_note(bytes)? else {
        return Ok(None);
    };
    match parsed {
        ParsedEnvelope::Standard(env) => {
            let payload = standard::decrypt(identity, &env)?;
            Ok(user_message(payload))
        }
        ParsedEnvelope::Psk(env) => {
            let manager =
                manager.ok_or_else(|| ChatError::PskNotFound(sender_address.to_string()))?;
            let payload = psk::decrypt(manager, identity, sender_address, &env).await?;
            Ok(user_message(payload))
        }
    }
}

/// Decrypt a batch of indexer records into user-visible messages.
///
/// Per-record failures are skipped: a tampered or foreign envelope in the
/// stream only costs that one record.
pub async fn scan_notes(
    identity: &ChatIdentity,
    manager: Option<&PskManager>,
    records: &[NoteRecord],
) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    for record in records {
        match decrypt_note(identity, manager, &record.sender, &record.note).await {
            Ok(Some(message)) => out.push(ChatMessage {
                txid: record.txid.clone(),
                sender: record.sender.clone(),
                receiver: record.receiver.clone(),
                round: record.round,
                message,
            }),
            Ok(None) => debug!("skipping non-message note in tx {}", record.txid),
            Err(e) => warn!("skipping undecryptable note in tx {}: {e}", record.txid),
        }
    }
    out
}
