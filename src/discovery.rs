//! On-chain discovery of a peer's key-agreement public key.
//!
//! Every envelope a peer authors carries their static X25519 key in the
//! header, so discovery never decrypts anything: it scans the peer's
//! transaction history and reads headers. Two passes over the same records:
//! first only envelopes whose trailing binding signature verifies against
//! the peer's signing identity (verified keys), then any parsable envelope
//! (legacy, unverified). The ordering guarantees a later unsigned
//! publication cannot override an earlier signed one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::Mutex;

use crate::address;
use crate::chain::{self, CancelFlag, NoteIndexer};
use crate::dispatch::route_note;
use crate::error::ChatError;
use crate::signature::has_valid_trailing_signature;

/// Default search depth when the caller does not bound the scan.
pub const DEFAULT_SEARCH_DEPTH: usize = 100;

/// Default cache time-to-live.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A key-agreement public key recovered from chain history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredKey {
    pub public_key: [u8; 32],
    /// True only when the producing envelope carried a valid signature
    /// binding the key to the account's signing identity.
    pub is_verified: bool,
}

/// Write-through cache of discovered keys, raw bytes only so entries move
/// freely across task boundaries. TTL is checked on read.
pub struct PublicKeyCache {
    entries: Mutex<HashMap<String, (DiscoveredKey, Instant)>>,
    ttl: Duration,
}

impl Default for PublicKeyCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

impl PublicKeyCache {
    pub fn new(ttl: Duration) -> Self {
        PublicKeyCache { entries: Mutex::new(HashMap::new()), ttl }
    }

    pub async fn get(&self, address: &str) -> Option<DiscoveredKey> {
        let entries = self.entries.lock().await;
        let (key, inserted_at) = entries.get(address)?;
        if inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(*key)
    }

    pub async fn put(&self, address: &str, key: DiscoveredKey) {
        self.entries
            .lock()
            .await
            .insert(address.to_string(), (key, Instant::now()));
    }

    pub async fn invalidate(&self, address: &str) {
        self.entries.lock().await.remove(address);
    }
}

/// Scan `address`'s history for their key-agreement public key.
pub async fn discover_key(
    indexer: &dyn NoteIndexer,
    peer_address: &str,
    search_depth: usize,
) -> Result<DiscoveredKey, ChatError> {
    let signing_pub = address::decode(peer_address)?;
    let records = indexer.payment_notes(peer_address, search_depth).await.map_err(ChatError::from)?;

    let authored: Vec<_> = records.iter().filter(|r| r.sender == peer_address).collect();

    // First pass: signed envelopes only.
    for record in &authored {
        let Ok(Some(parsed)) = route_note(&record.note) else { continue };
        let candidate = *parsed.sender_pub();
        if has_valid_trailing_signature(&record.note, &signing_pub, &candidate) {
            info!("discovered verified key for {peer_address} in tx {}", record.txid);
            return Ok(DiscoveredKey { public_key: candidate, is_verified: true });
        }
    }

    // Second pass: fall back to the newest unsigned envelope.
    for record in &authored {
        match route_note(&record.note) {
            Ok(Some(parsed)) => {
                debug!("falling back to unsigned key for {peer_address} from tx {}", record.txid);
                return Ok(DiscoveredKey { public_key: *parsed.sender_pub(), is_verified: false });
            }
            Ok(None) => continue,
            Err(e) => {
                debug!("skipping malformed note in tx {}: {e}", record.txid);
                continue;
            }
        }
    }

    Err(ChatError::PublicKeyNotFound(peer_address.to_string()))
}

/// [`discover_key`] through a write-through cache.
pub async fn discover_key_cached(
    indexer: &dyn NoteIndexer,
    cache: &PublicKeyCache,
    peer_address: &str,
    search_depth: usize,
) -> Result<DiscoveredKey, ChatError> {
    if let Some(key) = cache.get(peer_address).await {
        return Ok(key);
    }
    let key = discover_key(indexer, peer_address, search_depth).await?;
    cache.put(peer_address, key).await;
    Ok(key)
}

/// Keep scanning until the key appears, the deadline passes, or `cancel`
/// fires. Per-iteration chain errors are swallowed; the final timeout
/// surfaces as `PublicKeyNotFound`.
pub async fn discover_key_until(
    indexer: &dyn NoteIndexer,
    peer_address: &str,
    search_depth: usize,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<DiscoveredKey, ChatError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut delay = chain::BACKOFF_INITIAL;

    loop {
        if cancel.is_cancelled() {
            return Err(ChatError::PublicKeyNotFound(peer_address.to_string()));
        }
        match discover_key(indexer, peer_address, search_depth).await {
            Ok(key) => return Ok(key),
            Err(e) => debug!("discovery attempt for {peer_address} failed, retrying: {e}"),
        }
        if tokio::time::Instant::now() + delay >= deadline {
            return Err(ChatError::PublicKeyNotFound(peer_address.to_string()));
        }
        tokio::time::sleep(chain::jittered(delay)).await;
        delay = chain::next_delay(delay);
    }
}
