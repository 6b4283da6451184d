use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::id::MediaId;

/// Video stream descriptor of a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStream {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub container: String,
}

/// Audio stream descriptor of a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStream {
    pub codec: String,
    pub container: String,
}

/// Immutable handle to one catalog row.
///
/// `duration_secs` is always greater than zero; every second of playback is
/// one video clip and one audio clip, addressed by index `0..duration_secs`.
/// `locator` names the media's blob namespace in clip storage and is opaque
/// outside the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub id: MediaId,
    pub title: String,
    pub duration_secs: u32,
    pub video: Option<VideoStream>,
    pub audio: Option<AudioStream>,
    pub locator: String,
}

impl Media {
    /// Whether `offset..offset + amount` is a valid clip range.
    #[must_use]
    pub fn clip_range_valid(&self, offset: u32, amount: u32) -> bool {
        amount > 0
            && offset
                .checked_add(amount)
                .is_some_and(|end| end <= self.duration_secs)
    }
}

/// The (id, title) pair of a catalog enumeration row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBrief {
    pub id: MediaId,
    pub title: String,
}

/// A fetched range of clips for one media item.
///
/// `video` and `audio` always have the requested length; a `None` element
/// is a hole. Holes are paired: an index missing either its video or its
/// audio clip is a hole on both tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipBatch {
    pub media_id: MediaId,
    pub offset: u32,
    pub video: Vec<Option<Bytes>>,
    pub audio: Vec<Option<Bytes>>,
}

impl ClipBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.video.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.video.is_empty()
    }
}
