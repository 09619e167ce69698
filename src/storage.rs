//! Persistence for PSK contacts and ratchet state.
//!
//! The file store keeps two JSON documents per contact,
//! `<address>.contact.json` and `<address>.state.json`, pretty-printed with
//! sorted keys and ISO-8601 timestamps. The directory is created owner-only
//! on POSIX platforms. The manager persists before it updates its cache, so
//! a store error must surface rather than be swallowed.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ratchet::{PskContact, PskState};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Storage collaborator for the PSK manager.
#[async_trait]
pub trait PskStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(PskContact, PskState)>, StorageError>;
    async fn save_contact(&self, contact: &PskContact) -> Result<(), StorageError>;
    async fn save_state(&self, address: &str, state: &PskState) -> Result<(), StorageError>;
    async fn delete(&self, address: &str) -> Result<(), StorageError>;
}

// ─── File store ───────────────────────────────────────────────────────────────

pub struct FilePskStore {
    dir: PathBuf,
}

impl FilePskStore {
    /// Open (creating if needed) the store directory, mode 0o700 on Unix.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(FilePskStore { dir })
    }

    fn contact_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{address}.contact.json"))
    }

    fn state_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{address}.state.json"))
    }
}

#[async_trait]
impl PskStore for FilePskStore {
    async fn load_all(&self) -> Result<Vec<(PskContact, PskState)>, StorageError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(address) = name.strip_suffix(".contact.json") else { continue };

            let contact_bytes = tokio::fs::read(entry.path()).await?;
            let contact: PskContact = serde_json::from_slice(&contact_bytes)?;

            let state = match tokio::fs::read(self.state_path(address)).await {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => PskState::new(),
                Err(e) => return Err(e.into()),
            };
            out.push((contact, state));
        }
        Ok(out)
    }

    async fn save_contact(&self, contact: &PskContact) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(contact)?;
        tokio::fs::write(self.contact_path(&contact.address), json).await?;
        Ok(())
    }

    async fn save_state(&self, address: &str, state: &PskState) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(self.state_path(address), json).await?;
        Ok(())
    }

    async fn delete(&self, address: &str) -> Result<(), StorageError> {
        for path in [self.contact_path(address), self.state_path(address)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// Volatile store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPskStore {
    records: Mutex<HashMap<String, (PskContact, PskState)>>,
}

impl MemoryPskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PskStore for MemoryPskStore {
    async fn load_all(&self) -> Result<Vec<(PskContact, PskState)>, StorageError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn save_contact(&self, contact: &PskContact) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&contact.address) {
            Some((existing, _)) => *existing = contact.clone(),
            None => {
                records.insert(contact.address.clone(), (contact.clone(), PskState::new()));
            }
        }
        Ok(())
    }

    async fn save_state(&self, address: &str, state: &PskState) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        match records.get_mut(address) {
            Some((_, existing)) => *existing = state.clone(),
            None => return Err(StorageError::Other(format!("unknown contact {address}"))),
        }
        Ok(())
    }

    async fn delete(&self, address: &str) -> Result<(), StorageError> {
        self.records.lock().await.remove(address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePskStore::open(dir.path().join("psk")).unwrap();

        let contact = PskContact::new("PEERADDR".into(), [9u8; 32], None);
        store.save_contact(&contact).await.unwrap();

        let mut state = PskState::new();
        state.record_receive(3);
        state.take_send_counter();
        store.save_state("PEERADDR", &state).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.initial_psk, [9u8; 32]);
        assert_eq!(loaded[0].1, state);
    }

    #[tokio::test]
    async fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePskStore::open(dir.path()).unwrap();
        store.delete("NOBODY").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        let _store = FilePskStore::open(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn missing_state_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePskStore::open(dir.path()).unwrap();
        let contact = PskContact::new("PEERADDR".into(), [9u8; 32], None);
        store.save_contact(&contact).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].1, PskState::new());
    }
}
