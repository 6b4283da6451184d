//! Header grammar: line keys, verbs and response statuses.
//!
//! Header lines are `key SP value` separated by `\n`. The first line of a
//! request is always `request-type <verb>`; the first line of a response is
//! always `response-type <status>`. The header ends at the first blank line.

/// Terminator between header and body.
pub const HEADER_TERMINATOR: &[u8] = b"\n\n";

/// Upper bound on the header portion of a message. A peer that streams more
/// than this without a terminator is malformed and the connection is dropped.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Upper bound on a declared body to keep a hostile peer from growing the
/// read buffer without limit.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Header line keys.
pub mod key {
    pub const REQUEST_TYPE: &str = "request-type";
    pub const RESPONSE_TYPE: &str = "response-type";
    pub const SERIALIZED_OBJECT: &str = "serialized-object";
    pub const BODY_LENGTH: &str = "body-length";
    pub const TITLE_CONTAINS: &str = "title-contains";
    pub const MEDIA_ID: &str = "media-id";
    pub const STARTING_PIECE: &str = "starting-playback-piece";
    pub const TOTAL_PIECES: &str = "total-playback-pieces";
}

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    List,
    Info,
    Fetch,
}

impl Verb {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LIST" => Some(Self::List),
            "INFO" => Some(Self::Info),
            "FETCH" => Some(Self::Fetch),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Info => "INFO",
            Self::Fetch => "FETCH",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status. A body is present iff the status is [`Status::Ok`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    ServerError,
}

impl Status {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "BAD_REQUEST" => Some(Self::BadRequest),
            "SERVER_ERROR" => Some(Self::ServerError),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "BAD_REQUEST",
            Self::ServerError => "SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
