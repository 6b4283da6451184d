// Clip storage abstraction
//
// Clips live in a named-blob backend: every media item owns a locator
// (its namespace) holding blobs named v{i} / a{i} per playback second.
// Backends:
// - FileBlobStore: local filesystem (default)
// - MemoryBlobStore: in-memory (testing, small deployments)
//
// The storage layer is read-only at this level and knows nothing about
// media metadata; missing blobs surface as NotFound and become holes in
// the clip service.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Result;

/// Named-blob fetcher over `(locator, name)` keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read one blob. A missing blob is a `NotFound` error; any other
    /// error kind is a backend fault.
    async fn read(&self, locator: &str, name: &str) -> Result<Bytes>;

    /// Check whether a blob exists without reading it.
    async fn exists(&self, locator: &str, name: &str) -> Result<bool>;
}

/// Storage backend selector, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    File,
    Memory,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;
