//! End-to-end encrypted messaging over Algorand transaction notes.
//!
//! Each ciphertext rides as the opaque note of a payment transaction; the
//! chain supplies ordering, immutability and delivery, this crate supplies
//! confidentiality, sender authenticity, sender-side forward secrecy,
//! bidirectional readability (authors can decrypt their own sent notes) and
//! a replay-resistant PSK ratchet for contacts who exchanged a secret out
//! of band.
//!
//! The crypto layer (`keys`, `crypto`, `envelope`, `standard`, `psk`) is
//! synchronous and pure; only the collaborators that touch the chain or
//! storage (`chain`, `discovery`, `manager`, `storage`) suspend.

pub mod address;
pub mod chain;
pub mod crypto;
pub mod discovery;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod manager;
pub mod payload;
pub mod psk;
pub mod ratchet;
pub mod signature;
pub mod standard;
pub mod storage;
pub mod uri;

pub use chain::{
    wait_for_confirmation, CancelFlag, ChainClient, NoteIndexer, NoteRecord, PendingInfo,
    MIN_PAYMENT_AMOUNT,
};
pub use discovery::{discover_key, discover_key_cached, DiscoveredKey, PublicKeyCache};
pub use dispatch::{decrypt_note, route_note, scan_notes, ChatMessage, DecryptedMessage};
pub use envelope::{PskEnvelope, StandardEnvelope, MAX_NOTE_LEN};
pub use error::ChatError;
pub use keys::{generate_identity, identity_from_mnemonic, ChatIdentity};
pub use manager::PskManager;
pub use payload::{DecodedPayload, ReplyContext};
pub use ratchet::{PskContact, PskState};
pub use storage::{FilePskStore, MemoryPskStore, PskStore};
pub use uri::{PskUri, PskUriError};

use log::info;

/// Build the note bytes of a key publish: a standard self-envelope around
/// the reserved `{"type":"key-publish"}` payload, optionally followed by a
/// 64-byte signature binding the key-agreement key to the signing identity.
pub fn key_publish_note(identity: &ChatIdentity, signed: bool) -> Result<Vec<u8>, ChatError> {
    let env = standard::encrypt_raw(
        identity,
        &identity.agreement_public(),
        &payload::key_publish_payload(),
    )?;
    let mut note = env.emit();
    if signed {
        let sig = signature::sign_key_binding(identity.signing_key(), &identity.agreement_public());
        note.extend_from_slice(&sig);
    }
    Ok(note)
}

/// Publish our key-agreement public key as a zero-amount self-payment.
/// Returns the transaction id.
pub async fn publish_key(
    client: &dyn ChainClient,
    identity: &ChatIdentity,
    signed: bool,
) -> Result<String, ChatError> {
    let note = key_publish_note(identity, signed)?;
    let txid = client
        .submit_payment(&identity.address(), 0, &note)
        .await
        .map_err(ChatError::from)?;
    info!("published key-agreement key in tx {txid}");
    Ok(txid)
}

/// Encrypt `text` to `recipient_pub` and submit it as a payment note.
pub async fn send_message(
    client: &dyn ChainClient,
    identity: &ChatIdentity,
    recipient_address: &str,
    recipient_pub: &[u8; 32],
    text: &str,
    reply_to: Option<&ReplyContext>,
) -> Result<String, ChatError> {
    let note = standard::encrypt(identity, recipient_pub, text, reply_to)?.emit();
    client
        .submit_payment(recipient_address, MIN_PAYMENT_AMOUNT, &note)
        .await
        .map_err(ChatError::from)
}

/// Encrypt `text` with the PSK ratchet and submit it as a payment note.
pub async fn send_psk_message(
    client: &dyn ChainClient,
    manager: &PskManager,
    identity: &ChatIdentity,
    recipient_address: &str,
    recipient_pub: &[u8; 32],
    text: &str,
    reply_to: Option<&ReplyContext>,
) -> Result<String, ChatError> {
    let note = psk::encrypt(manager, identity, recipient_address, recipient_pub, text, reply_to)
        .await?
        .emit();
    client
        .submit_payment(recipient_address, MIN_PAYMENT_AMOUNT, &note)
        .await
        .map_err(ChatError::from)
}

/// Fetch and decrypt the conversation between us and `peer_address`.
///
/// Key-publish notes and undecryptable envelopes are filtered out; a bad
/// note in the stream never poisons the rest.
pub async fn fetch_conversation(
    indexer: &dyn NoteIndexer,
    identity: &ChatIdentity,
    manager: Option<&PskManager>,
    peer_address: &str,
    limit: usize,
) -> Result<Vec<ChatMessage>, ChatError> {
    let my_address = identity.address();
    let records = indexer
        .payment_notes(&my_address, limit)
        .await
        .map_err(ChatError::from)?;

    let between: Vec<NoteRecord> = records
        .into_iter()
        .filter(|r| {
            (r.sender == peer_address && r.receiver == my_address)
                || (r.sender == my_address && r.receiver == peer_address)
        })
        .collect();

    Ok(scan_notes(identity, manager, &between).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn identity(tag: u8) -> ChatIdentity {
        let mut seed = [0u8; 32];
        seed[0] = tag;
        ChatIdentity::from_signing_seed(&seed)
    }

    /// Chain double that records submissions and serves them back from the
    /// indexer surface.
    #[derive(Default)]
    struct FakeChain {
        records: Mutex<Vec<NoteRecord>>,
        sender: Mutex<String>,
    }

    impl FakeChain {
        fn for_sender(address: &str) -> Self {
            let chain = FakeChain::default();
            *chain.sender.lock().unwrap() = address.to_string();
            chain
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn submit_payment(
            &self,
            receiver: &str,
            amount: u64,
            note: &[u8],
        ) -> Result<String, ChainError> {
            let mut records = self.records.lock().unwrap();
            let txid = format!("TX{}", records.len());
            let sender = self.sender.lock().unwrap().clone();
            let round = records.len() as u64 + 1;
            records.push(NoteRecord {
                txid: txid.clone(),
                sender,
                receiver: receiver.into(),
                amount,
                round,
                note: note.to_vec(),
            });
            Ok(txid)
        }

        async fn pending_info(&self, _: &str) -> Result<PendingInfo, ChainError> {
            Ok(PendingInfo { confirmed_round: Some(1), pool_error: None })
        }
    }

    #[async_trait]
    impl NoteIndexer for FakeChain {
        async fn payment_notes(&self, address: &str, limit: usize) -> Result<Vec<NoteRecord>, ChainError> {
            let records = self.records.lock().unwrap();
            // Newest first, involving the queried address.
            Ok(records
                .iter()
                .rev()
                .filter(|r| r.sender == address || r.receiver == address)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn conversation_end_to_end() {
        let alice = identity(1);
        let bob = identity(2);

        let alice_chain = FakeChain::for_sender(&alice.address());
        publish_key(&alice_chain, &alice, true).await.unwrap();
        send_message(
            &alice_chain,
            &alice,
            &bob.address(),
            &bob.agreement_public(),
            "hello bob",
            None,
        )
        .await
        .unwrap();

        // Bob reads the conversation: key publish filtered, message visible.
        let messages =
            fetch_conversation(&alice_chain, &bob, None, &alice.address(), 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.text, "hello bob");

        // Alice can read her own sent message too.
        let mine =
            fetch_conversation(&alice_chain, &alice, None, &bob.address(), 50).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].message.text, "hello bob");
    }

    #[tokio::test]
    async fn published_key_is_discoverable() {
        let alice = identity(1);
        let chain = FakeChain::for_sender(&alice.address());
        publish_key(&chain, &alice, true).await.unwrap();

        let key = discover_key(&chain, &alice.address(), 10).await.unwrap();
        assert!(key.is_verified);
        assert_eq!(key.public_key, alice.agreement_public());
    }

    #[tokio::test]
    async fn unsigned_publish_discovers_unverified() {
        let alice = identity(1);
        let chain = FakeChain::for_sender(&alice.address());
        publish_key(&chain, &alice, false).await.unwrap();

        let key = discover_key(&chain, &alice.address(), 10).await.unwrap();
        assert!(!key.is_verified);
    }

    #[tokio::test]
    async fn owner_can_read_own_signed_key_publish() {
        let alice = identity(1);
        let note = key_publish_note(&alice, true).unwrap();
        // The trailing signature must not break the owner's decrypt; the
        // payload is the key-publish marker, so the result is filtered.
        let result = decrypt_note(&alice, None, &alice.address(), &note).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn psk_conversation_end_to_end() {
        let alice = identity(1);
        let bob = identity(2);
        let psk = [0x5Au8; 32];

        let alice_mgr = PskManager::open(Box::new(MemoryPskStore::new())).await.unwrap();
        alice_mgr.add_contact(&bob.address(), psk, None).await.unwrap();
        let bob_mgr = PskManager::open(Box::new(MemoryPskStore::new())).await.unwrap();
        bob_mgr.add_contact(&alice.address(), psk, None).await.unwrap();

        let chain = FakeChain::for_sender(&alice.address());
        send_psk_message(
            &chain,
            &alice_mgr,
            &alice,
            &bob.address(),
            &bob.agreement_public(),
            "ratchet hello",
            None,
        )
        .await
        .unwrap();

        let messages =
            fetch_conversation(&chain, &bob, Some(&bob_mgr), &alice.address(), 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.text, "ratchet hello");
    }
}
