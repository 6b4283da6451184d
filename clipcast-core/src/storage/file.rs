// Filesystem storage backend
//
// Blobs live at <base>/<locator>/<name>. Locators come from catalog rows
// and names are server-generated, but both are checked against path
// escapes before touching the filesystem.

use super::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Error, ErrorKind, Result};
use std::path::PathBuf;
use tokio::fs;

/// Reject path components that could escape the base directory.
fn checked_component(value: &str) -> Result<&str> {
    let escapes = value.is_empty()
        || value.contains('\\')
        || value.starts_with('/')
        || value.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if escapes {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("unsafe storage path component: {value:?}"),
        ));
    }
    Ok(value)
}

pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn blob_path(&self, locator: &str, name: &str) -> Result<PathBuf> {
        let locator = checked_component(locator)?;
        let name = checked_component(name)?;
        Ok(self.base_path.join(locator).join(name))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read(&self, locator: &str, name: &str) -> Result<Bytes> {
        let path = self.blob_path(locator, name)?;
        let data = fs::read(&path).await?;

        tracing::trace!("read {:?} ({} bytes)", path, data.len());

        Ok(Bytes::from(data))
    }

    async fn exists(&self, locator: &str, name: &str) -> Result<bool> {
        let path = self.blob_path(locator, name)?;
        fs::try_exists(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> (tempfile::TempDir, FileBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vault")).await.unwrap();
        fs::write(dir.path().join("vault/v0"), b"frame zero")
            .await
            .unwrap();
        let store = FileBlobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_existing_blob() {
        let (_dir, store) = seeded_store().await;
        let data = store.read("vault", "v0").await.unwrap();
        assert_eq!(&data[..], b"frame zero");
        assert!(store.exists("vault", "v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let (_dir, store) = seeded_store().await;
        let err = store.read("vault", "v1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!store.exists("vault", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_escapes_are_rejected() {
        let (_dir, store) = seeded_store().await;
        for locator in ["../vault", "a/../b", "/etc", "", "."] {
            let err = store.read(locator, "v0").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "locator {locator:?}");
        }
        let err = store.read("vault", "../v0").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_nested_locator_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vault/alpha"))
            .await
            .unwrap();
        fs::write(dir.path().join("vault/alpha/a3"), b"audio")
            .await
            .unwrap();

        let store = FileBlobStore::new(dir.path());
        let data = store.read("vault/alpha", "a3").await.unwrap();
        assert_eq!(&data[..], b"audio");
    }
}
