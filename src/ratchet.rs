//! PSK ratchet state: per-contact counters, replay window, counter-indexed
//! key derivation.
//!
//! Each direction of a PSK relation is indexed by a monotonic u32 counter.
//! The per-message key is a pure function of `(initial_psk, counter)`, so
//! both sides derive identical keys without coordination. Receives are
//! two-phase: [`PskState::validate_counter`] checks replay and window without
//! mutating anything, the caller attempts decryption, and only a successful
//! open commits via [`PskState::record_receive`] — a failed decryption never
//! burns a counter.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::ChatError;

/// Replay-window half-width. Accepted counters lie in
/// `[max(0, peer_last − W), peer_last + W]`; the window absorbs out-of-order
/// chain inclusion while keeping `seen_counters` bounded by `2W + 1`.
pub const REPLAY_WINDOW: u32 = 200;

/// `send_counter` values above this trigger a re-key warning.
pub const SEND_COUNTER_WARN_THRESHOLD: u32 = u32::MAX - 1000;

const PSK_RATCHET_INFO: &[u8] = b"PSK ratchet v1";

/// Derive the counter-indexed key `PSK_c` from the shared `initial_psk`.
/// Pure: identical inputs yield identical keys on either side.
pub fn derive_psk(initial_psk: &[u8; 32], counter: u32) -> [u8; 32] {
    crypto::derive_key(initial_psk, &counter.to_be_bytes(), PSK_RATCHET_INFO)
}

mod serde_hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(&text).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// A peer we share a pre-shared secret with. Field order matches the sorted
/// key order of the persisted JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PskContact {
    pub address: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "serde_hex32")]
    pub initial_psk: [u8; 32],
    pub label: Option<String>,
}

impl PskContact {
    pub fn new(address: String, initial_psk: [u8; 32], label: Option<String>) -> Self {
        PskContact { address, created_at: Utc::now(), initial_psk, label }
    }
}

/// Mutable ratchet state for one contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PskState {
    /// Highest counter committed from the peer.
    pub peer_last_counter: u32,
    /// Counters already accepted inside the window; pruned on every commit.
    pub seen_counters: BTreeSet<u32>,
    /// Next counter to use on send.
    pub send_counter: u32,
}

impl Default for PskState {
    fn default() -> Self {
        PskState { peer_last_counter: 0, seen_counters: BTreeSet::new(), send_counter: 0 }
    }
}

impl PskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window bounds as of the current state.
    pub fn window(&self) -> (u32, u32) {
        (
            self.peer_last_counter.saturating_sub(REPLAY_WINDOW),
            self.peer_last_counter.saturating_add(REPLAY_WINDOW),
        )
    }

    /// Phase one of a receive: check replay and window. Read-only.
    pub fn validate_counter(&self, counter: u32) -> Result<(), ChatError> {
        if self.seen_counters.contains(&counter) {
            return Err(ChatError::PskCounterReplay);
        }
        let (lo, hi) = self.window();
        if counter < lo || counter > hi {
            return Err(ChatError::PskCounterOutOfRange);
        }
        Ok(())
    }

    /// Phase two: commit an accepted counter. Inserts it into the seen set,
    /// advances `peer_last_counter` monotonically, and prunes entries below
    /// the new lower bound.
    pub fn record_receive(&mut self, counter: u32) {
        self.seen_counters.insert(counter);
        if counter > self.peer_last_counter {
            self.peer_last_counter = counter;
        }
        let lo = self.peer_last_counter.saturating_sub(REPLAY_WINDOW);
        self.seen_counters = self.seen_counters.split_off(&lo);
    }

    /// Take the next send counter, advancing with wrap-around on overflow.
    /// Whether to wrap or re-key near `u32::MAX` is the caller's decision;
    /// the manager logs a warning past [`SEND_COUNTER_WARN_THRESHOLD`].
    pub fn take_send_counter(&mut self) -> u32 {
        let counter = self.send_counter;
        self.send_counter = self.send_counter.wrapping_add(1);
        counter
    }
}
