//! Clip retrieval over the blob store.
//!
//! Clip names are `v{i}` / `a{i}` under the media's locator, one pair per
//! playback second. A missing blob is a hole, and holes are paired: an
//! index that lost either track is reported as absent on both.

use std::io::ErrorKind;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::models::{ClipBatch, Media};
use crate::storage::BlobStore;

#[derive(Clone)]
pub struct ClipService {
    store: Arc<dyn BlobStore>,
}

impl ClipService {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Fetch `amount` video+audio clip pairs starting at `offset`.
    ///
    /// The range must satisfy `offset + amount <= duration`; a violation is
    /// the caller's fault (`InvalidInput`), while backend faults other than
    /// a missing blob surface as `StorageUnavailable`.
    pub async fn fetch_clips(&self, media: &Media, offset: u32, amount: u32) -> Result<ClipBatch> {
        if !media.clip_range_valid(offset, amount) {
            return Err(Error::InvalidInput(format!(
                "clip range {offset}+{amount} exceeds duration {}",
                media.duration_secs
            )));
        }

        let mut video = self.fetch_track(&media.locator, 'v', offset, amount).await?;
        let mut audio = self.fetch_track(&media.locator, 'a', offset, amount).await?;

        // Pair the holes: a second with only one surviving track plays as
        // neither.
        for (v, a) in video.iter_mut().zip(audio.iter_mut()) {
            if v.is_none() || a.is_none() {
                *v = None;
                *a = None;
            }
        }

        Ok(ClipBatch {
            media_id: media.id.clone(),
            offset,
            video,
            audio,
        })
    }

    async fn fetch_track(
        &self,
        locator: &str,
        track: char,
        offset: u32,
        amount: u32,
    ) -> Result<Vec<Option<Bytes>>> {
        let mut clips = Vec::with_capacity(amount as usize);
        for index in offset..offset + amount {
            let name = format!("{track}{index}");
            match self.store.read(locator, &name).await {
                Ok(blob) => clips.push(Some(blob)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(locator, name, "clip absent, reporting hole");
                    clips.push(None);
                }
                Err(err) => return Err(Error::StorageUnavailable(err)),
            }
        }
        Ok(clips)
    }
}
