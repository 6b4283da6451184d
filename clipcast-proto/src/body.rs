//! Binary payload codec for OK response bodies.
//!
//! The format is length-prefixed big-endian binary with a leading type tag
//! byte matching the `serialized-object` header value:
//!
//! - strings: u32 byte length + UTF-8 bytes
//! - arrays: u32 element count + elements
//! - optional blobs: presence byte (0/1), then u32 length + bytes when present
//!
//! The variant set is a closed enumeration fixed at compile time; both peers
//! of the protocol share this table.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const TAG_MEDIA_LIST: u8 = 1;
pub const TAG_MEDIA_INFO: u8 = 2;
pub const TAG_FETCHED_CLIPS: u8 = 3;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("payload ends before the declared content")]
    NotEnoughBytes,

    #[error("unknown payload tag: {0}")]
    UnknownTag(u8),

    #[error("payload string is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// Catalog listing: parallel id/title arrays in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaListBody {
    pub ids: Vec<String>,
    pub titles: Vec<String>,
}

/// Video stream descriptor carried by `MediaInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrackInfo {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub container: String,
}

/// Audio stream descriptor carried by `MediaInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrackInfo {
    pub codec: String,
    pub container: String,
}

/// Metadata for a single media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfoBody {
    pub id: String,
    pub title: String,
    pub duration_secs: u32,
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
}

/// A fetched range of clips. `video` and `audio` always have equal length
/// (the requested amount); a `None` slot is a hole — the clip is absent in
/// storage for that index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedClipsBody {
    pub id: String,
    pub offset: u32,
    pub video: Vec<Option<Bytes>>,
    pub audio: Vec<Option<Bytes>>,
}

/// The closed set of OK response payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    MediaList(MediaListBody),
    MediaInfo(MediaInfoBody),
    FetchedClips(FetchedClipsBody),
}

impl Body {
    /// Wire name written to the `serialized-object` header line.
    #[must_use]
    pub const fn object_name(&self) -> &'static str {
        match self {
            Self::MediaList(_) => "MediaList",
            Self::MediaInfo(_) => "MediaInfo",
            Self::FetchedClips(_) => "FetchedClips",
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::MediaList(list) => {
                out.put_u8(TAG_MEDIA_LIST);
                put_string_array(&mut out, &list.ids);
                put_string_array(&mut out, &list.titles);
            }
            Self::MediaInfo(info) => {
                out.put_u8(TAG_MEDIA_INFO);
                put_string(&mut out, &info.id);
                put_string(&mut out, &info.title);
                out.put_u32(info.duration_secs);
                match &info.video {
                    Some(video) => {
                        out.put_u8(1);
                        out.put_u32(video.width);
                        out.put_u32(video.height);
                        put_string(&mut out, &video.codec);
                        put_string(&mut out, &video.container);
                    }
                    None => out.put_u8(0),
                }
                match &info.audio {
                    Some(audio) => {
                        out.put_u8(1);
                        put_string(&mut out, &audio.codec);
                        put_string(&mut out, &audio.container);
                    }
                    None => out.put_u8(0),
                }
            }
            Self::FetchedClips(clips) => {
                out.put_u8(TAG_FETCHED_CLIPS);
                put_string(&mut out, &clips.id);
                out.put_u32(clips.offset);
                put_blob_array(&mut out, &clips.video);
                put_blob_array(&mut out, &clips.audio);
            }
        }
        out.freeze()
    }

    pub fn decode(payload: Bytes) -> Result<Self, BodyError> {
        let mut reader = BodyReader::new(payload);
        let body = match reader.read_u8()? {
            TAG_MEDIA_LIST => Self::MediaList(MediaListBody {
                ids: reader.read_string_array()?,
                titles: reader.read_string_array()?,
            }),
            TAG_MEDIA_INFO => {
                let id = reader.read_string()?;
                let title = reader.read_string()?;
                let duration_secs = reader.read_u32()?;
                let video = if reader.read_u8()? != 0 {
                    Some(VideoTrackInfo {
                        width: reader.read_u32()?,
                        height: reader.read_u32()?,
                        codec: reader.read_string()?,
                        container: reader.read_string()?,
                    })
                } else {
                    None
                };
                let audio = if reader.read_u8()? != 0 {
                    Some(AudioTrackInfo {
                        codec: reader.read_string()?,
                        container: reader.read_string()?,
                    })
                } else {
                    None
                };
                Self::MediaInfo(MediaInfoBody {
                    id,
                    title,
                    duration_secs,
                    video,
                    audio,
                })
            }
            TAG_FETCHED_CLIPS => Self::FetchedClips(FetchedClipsBody {
                id: reader.read_string()?,
                offset: reader.read_u32()?,
                video: reader.read_blob_array()?,
                audio: reader.read_blob_array()?,
            }),
            other => return Err(BodyError::UnknownTag(other)),
        };
        reader.finish()?;
        Ok(body)
    }
}

fn put_string(out: &mut BytesMut, value: &str) {
    out.put_u32(value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn put_string_array(out: &mut BytesMut, values: &[String]) {
    out.put_u32(values.len() as u32);
    for value in values {
        put_string(out, value);
    }
}

fn put_blob_array(out: &mut BytesMut, values: &[Option<Bytes>]) {
    out.put_u32(values.len() as u32);
    for value in values {
        match value {
            Some(blob) => {
                out.put_u8(1);
                out.put_u32(blob.len() as u32);
                out.extend_from_slice(blob);
            }
            None => out.put_u8(0),
        }
    }
}

/// Checked cursor over a payload. Every read verifies the remaining length
/// first so a truncated or hostile payload can never over-read.
struct BodyReader {
    buf: Bytes,
}

impl BodyReader {
    const fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn read_u8(&mut self) -> Result<u8, BodyError> {
        if self.buf.remaining() < 1 {
            return Err(BodyError::NotEnoughBytes);
        }
        Ok(self.buf.get_u8())
    }

    fn read_u32(&mut self) -> Result<u32, BodyError> {
        if self.buf.remaining() < 4 {
            return Err(BodyError::NotEnoughBytes);
        }
        Ok(self.buf.get_u32())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes, BodyError> {
        if self.buf.remaining() < len {
            return Err(BodyError::NotEnoughBytes);
        }
        Ok(self.buf.split_to(len))
    }

    fn read_string(&mut self) -> Result<String, BodyError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BodyError::InvalidUtf8)
    }

    fn read_string_array(&mut self) -> Result<Vec<String>, BodyError> {
        let count = self.read_u32()? as usize;
        // Each element costs at least its length prefix.
        if count > self.buf.remaining() / 4 {
            return Err(BodyError::NotEnoughBytes);
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    fn read_blob_array(&mut self) -> Result<Vec<Option<Bytes>>, BodyError> {
        let count = self.read_u32()? as usize;
        if count > self.buf.remaining() {
            return Err(BodyError::NotEnoughBytes);
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            if self.read_u8()? != 0 {
                let len = self.read_u32()? as usize;
                values.push(Some(self.read_bytes(len)?));
            } else {
                values.push(None);
            }
        }
        Ok(values)
    }

    fn finish(self) -> Result<(), BodyError> {
        if self.buf.has_remaining() {
            return Err(BodyError::TrailingBytes(self.buf.remaining()));
        }
        Ok(())
    }
}
