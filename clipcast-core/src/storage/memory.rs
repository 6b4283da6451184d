// In-memory storage backend
//
// Useful for tests and for small catalogs pinned in RAM. Data is lost on
// restart.

use super::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(locator: &str, name: &str) -> String {
        format!("{locator}/{name}")
    }

    /// Seed a blob. The protocol never writes; this exists for tests and
    /// for loading a fixed clip set at startup.
    pub fn insert(&self, locator: &str, name: &str, data: Bytes) {
        self.blobs.insert(Self::key(locator, name), data);
    }

    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, locator: &str, name: &str) -> Result<Bytes> {
        self.blobs
            .get(&Self::key(locator, name))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("no blob {name:?} under {locator:?}"),
                )
            })
    }

    async fn exists(&self, locator: &str, name: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(&Self::key(locator, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_round_trip() {
        let store = MemoryBlobStore::new();
        store.insert("vault", "v0", Bytes::from_static(b"clip"));

        assert_eq!(store.blob_count(), 1);
        assert_eq!(&store.read("vault", "v0").await.unwrap()[..], b"clip");
        assert!(store.exists("vault", "v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.read("vault", "v9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!store.exists("vault", "v9").await.unwrap());
    }
}
