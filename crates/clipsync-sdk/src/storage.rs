//! Storage collaborator: hosts uploaded media as opaque objects.

use async_trait::async_trait;
use clipsync_db::MediaRef;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Error reported by the storage service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Object storage with separate "write" and "address" steps.
#[async_trait]
pub trait StorageService: Send + Sync + 'static {
    /// Store bytes under `key`.
    async fn put_object(&self, key: &str, bytes: Vec<u8>, mime_type: &str)
        -> Result<(), StorageError>;

    /// A durable retrieval URL for a stored key.
    async fn public_ref(&self, key: &str) -> Result<MediaRef, StorageError>;
}

/// A stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Default)]
struct StorageFaults {
    failing_writes: u32,
    failing_addresses: u32,
    delays: Vec<(String, Duration)>,
}

/// In-memory storage for testing and simulation.
pub struct MemoryStorage {
    base_url: String,
    objects: RwLock<HashMap<String, StoredObject>>,
    faults: RwLock<StorageFaults>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("https://storage.local/public")
    }
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(HashMap::new()),
            faults: RwLock::new(StorageFaults::default()),
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Fail the next `count` writes.
    pub fn fail_writes(&self, count: u32) {
        self.faults.write().failing_writes = count;
    }

    /// Fail the next `count` address lookups.
    pub fn fail_addresses(&self, count: u32) {
        self.faults.write().failing_addresses = count;
    }

    /// Slow down writes whose key contains `pattern`.
    pub fn delay_writes_matching(&self, pattern: impl Into<String>, delay: Duration) {
        self.faults.write().delays.push((pattern.into(), delay));
    }

    fn write_delay(&self, key: &str) -> Option<Duration> {
        self.faults
            .read()
            .delays
            .iter()
            .find(|(pattern, _)| key.contains(pattern.as_str()))
            .map(|(_, delay)| *delay)
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        if let Some(delay) = self.write_delay(key) {
            tokio::time::sleep(delay).await;
        }
        {
            let mut faults = self.faults.write();
            if faults.failing_writes > 0 {
                faults.failing_writes -= 1;
                return Err(StorageError::new("bucket rejected the object"));
            }
        }
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(())
    }

    async fn public_ref(&self, key: &str) -> Result<MediaRef, StorageError> {
        {
            let mut faults = self.faults.write();
            if faults.failing_addresses > 0 {
                faults.failing_addresses -= 1;
                return Err(StorageError::new("could not sign url"));
            }
        }
        if !self.objects.read().contains_key(key) {
            return Err(StorageError::new(format!("object not found: {}", key)));
        }
        Ok(MediaRef::new(format!("{}/{}", self.base_url, key)))
    }
}
