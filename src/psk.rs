//! Hybrid PSK + ephemeral-ECDH message encryption.
//!
//! The payload key is derived from the concatenation of the ephemeral ECDH
//! output and the counter-indexed PSK, so the message stays confidential
//! while *either* the ephemeral secret *or* the pre-shared secret is
//! uncompromised — an attacker has to break both. The counter travels in
//! the envelope header; the replay window and two-phase commit live in the
//! manager (see `ratchet`).

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::{self, KEY_LEN};
use crate::envelope::{PskEnvelope, PSK_MAX_PLAINTEXT, SEALED_KEY_LEN};
use crate::error::ChatError;
use crate::keys::{decode_public_key, ChatIdentity};
use crate::manager::PskManager;
use crate::payload::{self, DecodedPayload, ReplyContext};
use crate::standard::open_payload;

const PSK_SALT: &[u8] = b"algochat/psk/v1";
const MSG_KEY_LABEL: &[u8] = b"algochat psk message key v1";
const SENDER_KEY_LABEL: &[u8] = b"algochat psk sender key v1";

/// Derive the hybrid payload key from the ECDH output and `PSK_c`.
fn hybrid_message_key(
    shared: &[u8; 32],
    psk_c: &[u8; 32],
    sender_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> [u8; KEY_LEN] {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(shared);
    ikm[32..].copy_from_slice(psk_c);
    let key = crypto::derive_key_bound(&ikm, PSK_SALT, MSG_KEY_LABEL, &[sender_pub, recipient_pub]);
    ikm.zeroize();
    key
}

fn sender_message_key(
    shared: &[u8; 32],
    ephemeral_pub: &[u8; 32],
    sender_pub: &[u8; 32],
) -> [u8; KEY_LEN] {
    crypto::derive_key_bound(shared, ephemeral_pub, SENDER_KEY_LABEL, &[sender_pub])
}

/// Encrypt `text` to a PSK contact, consuming the next send counter.
///
/// The counter is advanced (and persisted) before any sealing; a failure
/// after that point wastes a counter value, which the window absorbs.
pub async fn encrypt(
    manager: &PskManager,
    identity: &ChatIdentity,
    contact_address: &str,
    recipient_pub: &[u8; 32],
    text: &str,
    reply_to: Option<&ReplyContext>,
) -> Result<PskEnvelope, ChatError> {
    let encoded = payload::encode(text, reply_to);
    if encoded.len() > PSK_MAX_PLAINTEXT {
        return Err(ChatError::MessageTooLarge(PSK_MAX_PLAINTEXT));
    }

    let (counter, mut psk_c) = manager.next_send_counter(contact_address).await?;

    let recipient_point = decode_public_key(recipient_pub)?;
    let sender_pub = identity.agreement_public();

    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = *X25519Public::from(&ephemeral_secret).as_bytes();

    let shared = ephemeral_secret.diffie_hellman(&recipient_point);
    if !shared.was_contributory() {
        psk_c.zeroize();
        return Err(ChatError::InvalidPublicKey("non-contributory ECDH result".into()));
    }
    let mut key = hybrid_message_key(shared.as_bytes(), &psk_c, &sender_pub, recipient_pub);
    psk_c.zeroize();

    let nonce = crypto::generate_nonce()?;
    let ciphertext = crypto::seal(&key, &nonce, &encoded)?;

    // Sender-readable copy of the payload key, as in the standard pipeline.
    let shared_snd = ephemeral_secret.diffie_hellman(&decode_public_key(&sender_pub)?);
    let mut k_snd = sender_message_key(shared_snd.as_bytes(), &ephemeral_pub, &sender_pub);
    let sealed = crypto::seal(&k_snd, &nonce, &key)?;
    key.zeroize();
    k_snd.zeroize();

    let sealed_sender_key: [u8; SEALED_KEY_LEN] = sealed
        .try_into()
        .map_err(|_| ChatError::InvalidEnvelope("sealed key block width".into()))?;

    PskEnvelope::new(counter, sender_pub, ephemeral_pub, nonce, sealed_sender_key, ciphertext)
}

/// Decrypt a PSK envelope.
///
/// Recipient path: validate the counter (phase one), derive `PSK_c`, attempt
/// the AEAD open, and only then commit with `record_receive` — any failure
/// in between leaves the ratchet untouched. Author path (our own sent
/// message seen on-chain): recover the payload key from the sealed block;
/// the ratchet is not consulted.
pub async fn decrypt(
    manager: &PskManager,
    identity: &ChatIdentity,
    contact_address: &str,
    env: &PskEnvelope,
) -> Result<DecodedPayload, ChatError> {
    let my_pub = identity.agreement_public();
    let ephemeral_point = decode_public_key(&env.ephemeral_pub)?;
    let shared = identity.agreement_secret().diffie_hellman(&ephemeral_point);
    if !shared.was_contributory() {
        return Err(ChatError::InvalidPublicKey("non-contributory ECDH result".into()));
    }

    if my_pub == env.sender_pub {
        let mut k_snd = sender_message_key(shared.as_bytes(), &env.ephemeral_pub, &env.sender_pub);
        let recovered = crypto::open(&k_snd, &env.nonce, &env.sealed_sender_key);
        k_snd.zeroize();
        let recovered = recovered?;
        let mut key: [u8; KEY_LEN] = recovered
            .try_into()
            .map_err(|_| ChatError::DecryptionFailed("sealed key block is not 32 bytes".into()))?;
        let plaintext = open_payload(&key, &env.nonce, &env.ciphertext);
        key.zeroize();
        return payload::decode(&plaintext?);
    }

    manager.validate_counter(contact_address, env.counter).await?;
    let mut psk_c = manager.psk_for_counter(contact_address, env.counter).await?;
    let mut key = hybrid_message_key(shared.as_bytes(), &psk_c, &env.sender_pub, &my_pub);
    psk_c.zeroize();

    let plaintext = open_payload(&key, &env.nonce, &env.ciphertext);
    key.zeroize();
    let plaintext = plaintext?;

    // Decryption succeeded: burn the counter.
    manager.record_receive(contact_address, env.counter).await?;
    payload::decode(&plaintext)
}
