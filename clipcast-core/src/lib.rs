//! Clipcast domain layer.
//!
//! Media metadata lives in a read-only relational catalog; clip bytes live
//! in a named-blob store. This crate owns both indirections plus the
//! configuration, logging and startup wiring shared by the server binary.

pub mod bootstrap;
pub mod catalog;
pub mod clips;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;

pub use catalog::{MediaCatalog, MediaLookup, SqlCatalog};
pub use clips::ClipService;
pub use config::Config;
pub use error::{Error, Result};
pub use models::{ClipBatch, Media, MediaBrief, MediaId, MediaProxy};
pub use storage::BlobStore;
