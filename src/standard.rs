//! Standard (ephemeral-ECDH) message encryption.
//!
//! # How it works
//!
//! 1. Sender generates an ephemeral X25519 keypair.
//! 2. ECDH(ephemeral_secret, recipient_static_pk) → HKDF → recipient
//!    message key `K_rcv`; the payload is sealed under it.
//! 3. ECDH(ephemeral_secret, sender_static_pk) → HKDF → sender key `K_snd`;
//!    the raw 32 bytes of `K_rcv` are sealed under `K_snd` into the 48-byte
//!    sealed sender-key block.
//! 4. Envelope: sender_pk | ephemeral_pk | nonce | sealed_key | ciphertext.
//!
//! Step 3 is what makes the ciphertext bidirectional: notes are public
//! immutable objects, and the sealed copy of `K_rcv` keeps a sent message
//! readable to its author with no extra on-chain round-trips and no
//! persistent sender-side state, while staying unreadable to anyone who
//! holds neither static private key.
//!
//! The payload seal and the sealed-key block share one 12-byte nonce. The
//! two seals use independent keys (`K_rcv` vs `K_snd`, different ECDH
//! outputs, different salt/info), and AEAD nonce-reuse rules apply per key.
//! The keys stay distinct even when sender == recipient because the info
//! strings and salts differ, so send-to-self is a first-class case.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::{self, KEY_LEN, TAG_LEN};
use crate::envelope::{StandardEnvelope, SEALED_KEY_LEN, STANDARD_MAX_PLAINTEXT};
use crate::error::ChatError;
use crate::keys::{decode_public_key, ChatIdentity};
use crate::payload::{self, DecodedPayload, ReplyContext};
use crate::signature::SIGNATURE_LEN;

const STD_SALT: &[u8] = b"algochat/std/v4";
const MSG_KEY_LABEL: &[u8] = b"algochat message key v4";
const SENDER_KEY_LABEL: &[u8] = b"algochat sender key v4";

/// Derive the recipient message key `K_rcv`.
///
/// The info string binds both static identities, so swapping sender and
/// recipient yields a different key.
fn recipient_message_key(
    shared: &[u8; 32],
    sender_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> [u8; KEY_LEN] {
    crypto::derive_key_bound(shared, STD_SALT, MSG_KEY_LABEL, &[sender_pub, recipient_pub])
}

/// Derive the sender message key `K_snd` (salt = ephemeral pk, distinct
/// label), so `K_snd != K_rcv` even when sender and recipient collapse onto
/// the same static key.
fn sender_message_key(
    shared: &[u8; 32],
    ephemeral_pub: &[u8; 32],
    sender_pub: &[u8; 32],
) -> [u8; KEY_LEN] {
    crypto::derive_key_bound(shared, ephemeral_pub, SENDER_KEY_LABEL, &[sender_pub])
}

/// Encrypt `text` (with optional reply context) to `recipient_pub`.
pub fn encrypt(
    identity: &ChatIdentity,
    recipient_pub: &[u8; 32],
    text: &str,
    reply_to: Option<&ReplyContext>,
) -> Result<StandardEnvelope, ChatError> {
    encrypt_raw(identity, recipient_pub, &payload::encode(text, reply_to))
}

/// Encrypt already-encoded payload bytes. Shared by [`encrypt`] and the
/// key-publish builder.
pub(crate) fn encrypt_raw(
    identity: &ChatIdentity,
    recipient_pub: &[u8; 32],
    encoded: &[u8],
) -> Result<StandardEnvelope, ChatError> {
    if encoded.len() > STANDARD_MAX_PLAINTEXT {
        return Err(ChatError::MessageTooLarge(STANDARD_MAX_PLAINTEXT));
    }

    let recipient_point = decode_public_key(recipient_pub)?;
    let sender_pub = identity.agreement_public();

    // Fresh ephemeral pair, consumed here and never persisted or logged.
    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = *X25519Public::from(&ephemeral_secret).as_bytes();

    let shared_rcv = ephemeral_secret.diffie_hellman(&recipient_point);
    if !shared_rcv.was_contributory() {
        return Err(ChatError::InvalidPublicKey("non-contributory ECDH result".into()));
    }
    let mut k_rcv = recipient_message_key(shared_rcv.as_bytes(), &sender_pub, recipient_pub);

    let nonce = crypto::generate_nonce()?;
    let ciphertext = crypto::seal(&k_rcv, &nonce, encoded)?;

    // Second seal: the recipient key itself, readable only by the sender.
    let shared_snd = ephemeral_secret.diffie_hellman(&decode_public_key(&sender_pub)?);
    let mut k_snd = sender_message_key(shared_snd.as_bytes(), &ephemeral_pub, &sender_pub);
    let sealed = crypto::seal(&k_snd, &nonce, &k_rcv)?;
    k_rcv.zeroize();
    k_snd.zeroize();

    let sealed_sender_key: [u8; SEALED_KEY_LEN] = sealed
        .try_into()
        .map_err(|_| ChatError::InvalidEnvelope("sealed key block width".into()))?;

    StandardEnvelope::new(sender_pub, ephemeral_pub, nonce, sealed_sender_key, ciphertext)
}

/// Decrypt a standard envelope from either side of the conversation.
///
/// If our key-agreement public key equals the envelope's sender field we are
/// the author and recover `K_rcv` from the sealed block; otherwise we derive
/// it directly as the recipient.
pub fn decrypt(identity: &ChatIdentity, env: &StandardEnvelope) -> Result<DecodedPayload, ChatError> {
    let my_pub = identity.agreement_public();
    let ephemeral_point = decode_public_key(&env.ephemeral_pub)?;

    let shared = identity.agreement_secret().diffie_hellman(&ephemeral_point);
    if !shared.was_contributory() {
        return Err(ChatError::InvalidPublicKey("non-contributory ECDH result".into()));
    }

    let mut k_rcv = if my_pub == env.sender_pub {
        // Author path: open the sealed sender-key block.
        let mut k_snd = sender_message_key(shared.as_bytes(), &env.ephemeral_pub, &env.sender_pub);
        let recovered = crypto::open(&k_snd, &env.nonce, &env.sealed_sender_key);
        k_snd.zeroize();
        let recovered = recovered?;
        let key: [u8; KEY_LEN] = recovered
            .try_into()
            .map_err(|_| ChatError::DecryptionFailed("sealed key block is not 32 bytes".into()))?;
        key
    } else {
        recipient_message_key(shared.as_bytes(), &env.sender_pub, &my_pub)
    };

    let plaintext = open_payload(&k_rcv, &env.nonce, &env.ciphertext);
    k_rcv.zeroize();
    payload::decode(&plaintext?)
}

/// Open the payload ciphertext, tolerating the 64-byte binding signature a
/// signed key publish appends after the AEAD tag. A wrong strip fails closed
/// on the tag.
pub(crate) fn open_payload(
    key: &[u8; KEY_LEN],
    nonce: &[u8; crypto::NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ChatError> {
    match crypto::open(key, nonce, ciphertext) {
        Ok(plaintext) => Ok(plaintext),
        Err(e) if ciphertext.len() >= TAG_LEN + SIGNATURE_LEN => {
            crypto::open(key, nonce, &ciphertext[..ciphertext.len() - SIGNATURE_LEN])
                .map_err(|_| e)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::STANDARD_HEADER_LEN;

    fn identity(tag: u8) -> ChatIdentity {
        let mut seed = [0u8; 32];
        seed[0] = tag;
        seed[31] = tag;
        ChatIdentity::from_signing_seed(&seed)
    }

    fn text_of(payload: DecodedPayload) -> String {
        match payload {
            DecodedPayload::Text { text, .. } => text,
            other => panic!("expected text payload, got {other:?}"),
        }
    }

    #[test]
    fn recipient_and_sender_both_decrypt() {
        let sender = identity(1);
        let recipient = identity(2);
        let env = encrypt(&sender, &recipient.agreement_public(), "Hello, Algorand!", None).unwrap();

        let parsed = StandardEnvelope::parse(&env.emit()).unwrap();
        assert_eq!(text_of(decrypt(&recipient, &parsed).unwrap()), "Hello, Algorand!");
        assert_eq!(text_of(decrypt(&sender, &parsed).unwrap()), "Hello, Algorand!");
    }

    #[test]
    fn third_party_cannot_decrypt() {
        let sender = identity(1);
        let recipient = identity(2);
        let eavesdropper = identity(3);
        let env = encrypt(&sender, &recipient.agreement_public(), "secret", None).unwrap();
        assert!(decrypt(&eavesdropper, &env).is_err());
    }

    #[test]
    fn send_to_self() {
        let me = identity(4);
        let env = encrypt(&me, &me.agreement_public(), "note to self", None).unwrap();
        assert_eq!(text_of(decrypt(&me, &env).unwrap()), "note to self");
    }

    #[test]
    fn size_boundary() {
        let sender = identity(1);
        let recipient = identity(2);
        let at_limit = "a".repeat(STANDARD_MAX_PLAINTEXT);
        assert!(encrypt(&sender, &recipient.agreement_public(), &at_limit, None).is_ok());

        let over = "a".repeat(STANDARD_MAX_PLAINTEXT + 1);
        assert!(matches!(
            encrypt(&sender, &recipient.agreement_public(), &over, None),
            Err(ChatError::MessageTooLarge(882))
        ));
    }

    #[test]
    fn reply_context_roundtrip() {
        let sender = identity(1);
        let recipient = identity(2);
        let reply = ReplyContext { txid: "TX123".into(), preview: "A".repeat(120) };
        let env = encrypt(&sender, &recipient.agreement_public(), "pong", Some(&reply)).unwrap();

        match decrypt(&recipient, &env).unwrap() {
            DecodedPayload::Text { text, reply_to_id, reply_to_preview } => {
                assert_eq!(text, "pong");
                assert_eq!(reply_to_id.as_deref(), Some("TX123"));
                assert_eq!(reply_to_preview.unwrap(), format!("{}...", "A".repeat(77)));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn successive_encryptions_differ() {
        let sender = identity(1);
        let recipient = identity(2);
        let a = encrypt(&sender, &recipient.agreement_public(), "same text", None).unwrap();
        let b = encrypt(&sender, &recipient.agreement_public(), "same text", None).unwrap();
        assert_ne!(a.ephemeral_pub, b.ephemeral_pub);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn bit_flips_are_detected() {
        let sender = identity(1);
        let recipient = identity(2);
        let bytes = encrypt(&sender, &recipient.agreement_public(), "tamper me", None)
            .unwrap()
            .emit();

        // One flipped bit in every field region must fail parse or decrypt.
        for offset in [2usize, 40, 70, STANDARD_HEADER_LEN + 3, bytes.len() - 1] {
            let mut tampered = bytes.clone();
            tampered[offset] ^= 0x01;
            let result = StandardEnvelope::parse(&tampered)
                .and_then(|env| decrypt(&recipient, &env));
            assert!(result.is_err(), "flip at offset {offset} was not detected");
        }

        // The sealed sender-key block is only consumed on the author path.
        let mut tampered = bytes.clone();
        tampered[80] ^= 0x01;
        let env = StandardEnvelope::parse(&tampered).unwrap();
        assert!(decrypt(&sender, &env).is_err());
    }

    #[test]
    fn message_keys_differ_when_identities_swap() {
        let shared = [9u8; 32];
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(
            recipient_message_key(&shared, &a, &b),
            recipient_message_key(&shared, &b, &a)
        );
    }
}
