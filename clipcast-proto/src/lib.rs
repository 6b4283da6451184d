//! Clipcast wire protocol
//!
//! A message on the wire is a text header terminated by a blank line
//! (`\n\n`) followed by an optional binary body whose exact size is
//! announced by the `body-length` header line. Requests carry a verb
//! (LIST / INFO / FETCH) and named fields; responses carry a status
//! (OK / BAD_REQUEST / SERVER_ERROR) and, on OK, a tagged binary payload.
//!
//! Modules:
//! - [`message`] — header grammar constants, verbs and statuses
//! - [`frame`] — reading and writing complete messages with deadlines
//! - [`parser`] — extracting verb and fields from a framed request
//! - [`validate`] — field-level input validation
//! - [`body`] — the binary payload codec for OK response bodies

pub mod body;
pub mod frame;
pub mod message;
pub mod parser;
pub mod validate;

pub use body::{Body, BodyError, FetchedClipsBody, MediaInfoBody, MediaListBody};
pub use frame::{FrameError, Framer, FramerConfig};
pub use message::{Status, Verb};
pub use parser::{ParseError, RequestParser};
pub use validate::ValidateError;
