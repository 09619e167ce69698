//! The PSK manager: exclusive owner of the contact and ratchet-state caches.
//!
//! Actor-style: one mutex guards both caches, every public method takes the
//! lock, works on in-memory state, persists through the store if it mutated
//! anything, and releases. Persist-before-update-cache is mandatory — if the
//! store refuses a write, the cache keeps its previous value so memory never
//! diverges from disk.
//!
//! `next_send_counter` holds the lock across read → derive → persist →
//! cache-update, so concurrent sends on the same contact serialize and each
//! counter is handed out exactly once. Validate-then-record on receive is
//! deliberately *not* atomic: the caller decrypts between the phases, and a
//! failed decryption leaves the counter unburned. Two concurrent receives of
//! one counter can both pass validation; the second `record_receive` loser
//! is caught as a replay on its next validate.

use std::collections::HashMap;

use log::{info, warn};
use tokio::sync::Mutex;

use crate::error::ChatError;
use crate::ratchet::{derive_psk, PskContact, PskState, SEND_COUNTER_WARN_THRESHOLD};
use crate::storage::PskStore;
use crate::uri::PskUri;

struct Caches {
    contacts: HashMap<String, PskContact>,
    states: HashMap<String, PskState>,
}

pub struct PskManager {
    caches: Mutex<Caches>,
    store: Box<dyn PskStore>,
}

impl PskManager {
    /// Create a manager over `store`, loading every persisted contact into
    /// the cache.
    pub async fn open(store: Box<dyn PskStore>) -> Result<Self, ChatError> {
        let records = store.load_all().await?;
        let mut contacts = HashMap::new();
        let mut states = HashMap::new();
        for (contact, state) in records {
            states.insert(contact.address.clone(), state);
            contacts.insert(contact.address.clone(), contact);
        }
        info!("psk manager loaded {} contact(s)", contacts.len());
        Ok(PskManager { caches: Mutex::new(Caches { contacts, states }), store })
    }

    /// Register (or replace) a PSK contact. A fresh contact starts with a
    /// zeroed ratchet state; replacing an existing contact keeps its state.
    pub async fn add_contact(
        &self,
        address: &str,
        initial_psk: [u8; 32],
        label: Option<String>,
    ) -> Result<(), ChatError> {
        let mut caches = self.caches.lock().await;
        let contact = PskContact::new(address.to_string(), initial_psk, label);
        self.store.save_contact(&contact).await?;
        if !caches.states.contains_key(address) {
            let state = PskState::new();
            self.store.save_state(address, &state).await?;
            caches.states.insert(address.to_string(), state);
        }
        caches.contacts.insert(address.to_string(), contact);
        Ok(())
    }

    /// Register a contact from a scanned out-of-band URI.
    pub async fn add_contact_from_uri(&self, uri: &PskUri) -> Result<(), ChatError> {
        self.add_contact(&uri.address, uri.psk, uri.label.clone()).await
    }

    /// Remove a contact and its ratchet state.
    pub async fn remove_contact(&self, address: &str) -> Result<(), ChatError> {
        let mut caches = self.caches.lock().await;
        self.store.delete(address).await?;
        caches.contacts.remove(address);
        caches.states.remove(address);
        Ok(())
    }

    pub async fn contact(&self, address: &str) -> Option<PskContact> {
        self.caches.lock().await.contacts.get(address).cloned()
    }

    pub async fn has_contact(&self, address: &str) -> bool {
        self.caches.lock().await.contacts.contains_key(address)
    }

    pub async fn list_contacts(&self) -> Vec<PskContact> {
        let mut contacts: Vec<_> = self.caches.lock().await.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.address.cmp(&b.address));
        contacts
    }

    /// Current ratchet state snapshot for a contact.
    pub async fn state(&self, address: &str) -> Option<PskState> {
        self.caches.lock().await.states.get(address).cloned()
    }

    /// Hand out the next send counter and its derived per-message PSK.
    ///
    /// One critical section: read state, advance, persist, update cache.
    /// On a store error the cache is untouched and the counter is not
    /// considered spent.
    pub async fn next_send_counter(&self, address: &str) -> Result<(u32, [u8; 32]), ChatError> {
        let mut caches = self.caches.lock().await;
        let contact = caches
            .contacts
            .get(address)
            .ok_or_else(|| ChatError::PskNotFound(address.to_string()))?;
        let initial_psk = contact.initial_psk;

        let state = caches
            .states
            .get(address)
            .ok_or_else(|| ChatError::PskNotFound(address.to_string()))?;

        let mut updated = state.clone();
        let counter = updated.take_send_counter();
        if counter >= SEND_COUNTER_WARN_THRESHOLD {
            warn!("send counter for {address} is approaching u32::MAX; consider re-keying");
        }

        self.store.save_state(address, &updated).await?;
        caches.states.insert(address.to_string(), updated);

        Ok((counter, derive_psk(&initial_psk, counter)))
    }

    /// Derive the PSK for an explicit counter (receive side).
    pub async fn psk_for_counter(&self, address: &str, counter: u32) -> Result<[u8; 32], ChatError> {
        let caches = self.caches.lock().await;
        let contact = caches
            .contacts
            .get(address)
            .ok_or_else(|| ChatError::PskNotFound(address.to_string()))?;
        Ok(derive_psk(&contact.initial_psk, counter))
    }

    /// Phase one of a receive: replay and window checks, no mutation.
    pub async fn validate_counter(&self, address: &str, counter: u32) -> Result<(), ChatError> {
        let caches = self.caches.lock().await;
        let state = caches
            .states
            .get(address)
            .ok_or_else(|| ChatError::PskNotFound(address.to_string()))?;
        state.validate_counter(counter)
    }

    /// Phase two of a receive: commit an accepted counter. The caller only
    /// invokes this after a successful decryption.
    pub async fn record_receive(&self, address: &str, counter: u32) -> Result<(), ChatError> {
        let mut caches = self.caches.lock().await;
        let state = caches
            .states
            .get(address)
            .ok_or_else(|| ChatError::PskNotFound(address.to_string()))?;

        let mut updated = state.clone();
        updated.record_receive(counter);

        self.store.save_state(address, &updated).await?;
        caches.states.insert(address.to_string(), updated);
        Ok(())
    }

    /// One-phase convenience for callers that do not decrypt between the
    /// phases. Prefer `validate_counter` + `record_receive`.
    pub async fn validate_and_record_receive(
        &self,
        address: &str,
        counter: u32,
    ) -> Result<(), ChatError> {
        self.validate_counter(address, counter).await?;
        self.record_receive(address, counter).await
    }
}
