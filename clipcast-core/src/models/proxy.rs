use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::catalog::MediaLookup;
use crate::error::{Error, Result};
use crate::models::{AudioStream, Media, MediaBrief, MediaId, VideoStream};

/// Lazy handle to a media item carrying only (id, title).
///
/// Catalog enumeration is cheap because only the brief columns are read;
/// the first accessor that needs anything else resolves the full row
/// through the catalog and memoises it for the life of the proxy.
/// Concurrent first calls are serialised by the cell, so the stored handle
/// is resolved at most once per proxy instance.
pub struct MediaProxy {
    brief: MediaBrief,
    resolver: Arc<dyn MediaLookup>,
    resolved: OnceCell<Media>,
}

impl MediaProxy {
    #[must_use]
    pub fn new(brief: MediaBrief, resolver: Arc<dyn MediaLookup>) -> Self {
        Self {
            brief,
            resolver,
            resolved: OnceCell::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &MediaId {
        &self.brief.id
    }

    /// The title is carried by the proxy itself and never triggers a
    /// catalog read.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.brief.title
    }

    /// Resolve the full media row, reading through the catalog on first use.
    pub async fn resolve(&self) -> Result<&Media> {
        self.resolved
            .get_or_try_init(|| async {
                self.resolver
                    .lookup(&self.brief.id)
                    .await?
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "media {} vanished from the catalog",
                            self.brief.id
                        ))
                    })
            })
            .await
    }

    pub async fn duration_secs(&self) -> Result<u32> {
        Ok(self.resolve().await?.duration_secs)
    }

    pub async fn video(&self) -> Result<Option<VideoStream>> {
        Ok(self.resolve().await?.video.clone())
    }

    pub async fn audio(&self) -> Result<Option<AudioStream>> {
        Ok(self.resolve().await?.audio.clone())
    }

    pub async fn locator(&self) -> Result<String> {
        Ok(self.resolve().await?.locator.clone())
    }
}

impl std::fmt::Debug for MediaProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaProxy")
            .field("id", &self.brief.id)
            .field("title", &self.brief.title)
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

/// Equality compares id and title, plus the full attributes once both
/// sides have resolved.
impl PartialEq for MediaProxy {
    fn eq(&self, other: &Self) -> bool {
        if self.brief != other.brief {
            return false;
        }
        match (self.resolved.get(), other.resolved.get()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}
