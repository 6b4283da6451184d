pub mod id;
pub mod media;
pub mod proxy;

pub use id::MediaId;
pub use media::{AudioStream, ClipBatch, Media, MediaBrief, VideoStream};
pub use proxy::MediaProxy;
