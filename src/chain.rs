//! Chain collaborator surfaces.
//!
//! The core never talks to algod or an indexer directly; it goes through
//! these traits. Implementations sign, submit and query on their side —
//! the core only shapes notes and interprets the results.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::ChatError;

/// Minimum payment amount accepted by the network (microalgos).
pub const MIN_PAYMENT_AMOUNT: u64 = 1000;

pub(crate) const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const BACKOFF_JITTER: f64 = 0.2;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("indexer not configured")]
    IndexerNotConfigured,
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<ChainError> for ChatError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::IndexerNotConfigured => ChatError::IndexerNotConfigured,
            ChainError::InsufficientBalance { required, available } => {
                ChatError::InsufficientBalance { required, available }
            }
            other => ChatError::Chain(other.to_string()),
        }
    }
}

/// Confirmation status of a submitted transaction.
#[derive(Debug, Clone, Default)]
pub struct PendingInfo {
    pub confirmed_round: Option<u64>,
    pub pool_error: Option<String>,
}

impl PendingInfo {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_round.is_some()
    }
}

/// One payment transaction with a note, as returned by the indexer.
#[derive(Debug, Clone)]
pub struct NoteRecord {
    pub txid: String,
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    pub round: u64,
    pub note: Vec<u8>,
}

/// Node-side collaborator: signs and submits payments, reports confirmation.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a payment carrying `note` (at most
    /// [`crate::envelope::MAX_NOTE_LEN`] bytes plus a possible
    /// binding-signature trailer). Returns the transaction id.
    async fn submit_payment(
        &self,
        receiver: &str,
        amount: u64,
        note: &[u8],
    ) -> Result<String, ChainError>;

    async fn pending_info(&self, txid: &str) -> Result<PendingInfo, ChainError>;
}

/// Indexer-side collaborator: payment transactions with notes, newest first.
#[async_trait]
pub trait NoteIndexer: Send + Sync {
    async fn payment_notes(&self, address: &str, limit: usize) -> Result<Vec<NoteRecord>, ChainError>;
}

/// Cooperative cancellation flag polled between backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Apply ±20 % jitter to a backoff delay.
pub(crate) fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 - BACKOFF_JITTER + rand::thread_rng().gen::<f64>() * 2.0 * BACKOFF_JITTER;
    delay.mul_f64(factor)
}

/// Next step of the exponential backoff schedule (×1.5, capped at 5 s).
pub(crate) fn next_delay(delay: Duration) -> Duration {
    BACKOFF_CAP.min(delay.mul_f64(BACKOFF_FACTOR))
}

/// Block until `txid` is included, the deadline passes, or `cancel` fires.
///
/// Individual poll errors are ignored and retried; a cancelled or timed-out
/// wait returns `None` without raising.
pub async fn wait_for_confirmation(
    client: &dyn ChainClient,
    txid: &str,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Option<PendingInfo> {
    let deadline = Instant::now() + timeout;
    let mut delay = BACKOFF_INITIAL;

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match client.pending_info(txid).await {
            Ok(info) if info.is_confirmed() => return Some(info),
            Ok(_) => {}
            Err(e) => debug!("pending_info({txid}) failed, retrying: {e}"),
        }
        if Instant::now() + delay >= deadline {
            return None;
        }
        tokio::time::sleep(jittered(delay)).await;
        delay = next_delay(delay);
    }
}
