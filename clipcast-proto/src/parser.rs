//! Request parsing: verb and named fields from a framed message.
//!
//! A parser instance is cheap and owns no I/O; the connection manager hands
//! each handler a fresh one so concurrent handlers never share state.
//! [`RequestParser::feed`] replaces any previously admitted request, making
//! one instance reusable across the requests of a connection.

use std::collections::HashMap;

use thiserror::Error;

use crate::message::{key, Verb};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("first line does not name a known verb: {0:?}")]
    UnknownVerb(String),

    #[error("request has no field named {0:?}")]
    UnknownField(String),

    #[error("request header is not parseable: {0}")]
    Malformed(String),
}

/// Parsed form of one request.
#[derive(Debug, Default)]
pub struct RequestParser {
    first_line: String,
    fields: HashMap<String, String>,
}

impl RequestParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a fresh request (header ∥ `\n` ∥ body as produced by the
    /// framer). Any previous request is discarded.
    ///
    /// Field lines after the `body-length` line belong to the body and are
    /// not interpreted.
    pub fn feed(&mut self, message: &[u8]) -> Result<(), ParseError> {
        let text = std::str::from_utf8(message)
            .map_err(|_| ParseError::Malformed("header is not valid UTF-8".to_string()))?;

        self.first_line.clear();
        self.fields.clear();

        let mut lines = text.split('\n');
        self.first_line = lines
            .next()
            .unwrap_or_default()
            .to_string();

        for line in lines {
            let Some((name, value)) = line.split_once(' ') else {
                continue;
            };
            self.fields.insert(name.to_string(), value.to_string());
            if name == key::BODY_LENGTH {
                break;
            }
        }
        Ok(())
    }

    /// The verb named on the first line.
    pub fn verb(&self) -> Result<Verb, ParseError> {
        let Some((name, value)) = self.first_line.split_once(' ') else {
            return Err(ParseError::UnknownVerb(self.first_line.clone()));
        };
        if name != key::REQUEST_TYPE {
            return Err(ParseError::UnknownVerb(self.first_line.clone()));
        }
        Verb::from_str(value).ok_or_else(|| ParseError::UnknownVerb(value.to_string()))
    }

    /// Look up a named field of the current request.
    pub fn field(&self, name: &str) -> Result<&str, ParseError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ParseError::UnknownField(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_request() {
        let mut parser = RequestParser::new();
        parser
            .feed(b"request-type LIST\ntitle-contains ^b\nbody-length 0\n")
            .unwrap();

        assert_eq!(parser.verb().unwrap(), Verb::List);
        assert_eq!(parser.field(key::TITLE_CONTAINS).unwrap(), "^b");
        assert_eq!(parser.field(key::BODY_LENGTH).unwrap(), "0");
    }

    #[test]
    fn test_parse_fetch_request() {
        let mut parser = RequestParser::new();
        parser
            .feed(
                b"request-type FETCH\nmedia-id ab12\nstarting-playback-piece 2\n\
                  total-playback-pieces 3\nbody-length 0\n",
            )
            .unwrap();

        assert_eq!(parser.verb().unwrap(), Verb::Fetch);
        assert_eq!(parser.field(key::MEDIA_ID).unwrap(), "ab12");
        assert_eq!(parser.field(key::STARTING_PIECE).unwrap(), "2");
        assert_eq!(parser.field(key::TOTAL_PIECES).unwrap(), "3");
    }

    #[test]
    fn test_unknown_verb() {
        let mut parser = RequestParser::new();
        parser.feed(b"request-type DELETE\nbody-length 0\n").unwrap();
        assert!(matches!(parser.verb(), Err(ParseError::UnknownVerb(_))));
    }

    #[test]
    fn test_first_line_must_be_request_type() {
        let mut parser = RequestParser::new();
        parser.feed(b"media-id ab\nbody-length 0\n").unwrap();
        assert!(matches!(parser.verb(), Err(ParseError::UnknownVerb(_))));
    }

    #[test]
    fn test_unknown_field() {
        let mut parser = RequestParser::new();
        parser.feed(b"request-type LIST\nbody-length 0\n").unwrap();
        assert!(matches!(
            parser.field(key::TITLE_CONTAINS),
            Err(ParseError::UnknownField(_))
        ));
    }

    #[test]
    fn test_feed_replaces_previous_request() {
        let mut parser = RequestParser::new();
        parser
            .feed(b"request-type INFO\nmedia-id ab\nbody-length 0\n")
            .unwrap();
        parser.feed(b"request-type LIST\nbody-length 0\n").unwrap();

        assert_eq!(parser.verb().unwrap(), Verb::List);
        assert!(parser.field(key::MEDIA_ID).is_err());
    }

    #[test]
    fn test_body_bytes_are_not_fields() {
        let mut parser = RequestParser::new();
        parser
            .feed(b"request-type LIST\nbody-length 8\nsneaky value")
            .unwrap();
        assert!(parser.field("sneaky").is_err());
    }
}
