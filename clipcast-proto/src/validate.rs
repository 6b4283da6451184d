//! Field-level input validation.
//!
//! Field values arrive from peers that may be buggy or hostile; these
//! validators are the single gate where shape errors become BAD_REQUEST
//! responses without touching the catalog.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ValidateError {
    #[error("invalid {field}: {message}")]
    Field {
        field: &'static str,
        message: String,
    },
}

impl ValidateError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self::Field {
            field,
            message: message.into(),
        }
    }
}

pub type ValidateResult<T> = Result<T, ValidateError>;

/// Media identifier validator: non-empty, even length, lowercase hex.
#[derive(Debug, Default)]
pub struct MediaIdValidator;

impl MediaIdValidator {
    pub fn validate(&self, field: &'static str, value: &str) -> ValidateResult<()> {
        if value.is_empty() {
            return Err(ValidateError::new(field, "must not be empty"));
        }
        if value.len() % 2 != 0 {
            return Err(ValidateError::new(field, "must have even length"));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ValidateError::new(
                field,
                "must contain only lowercase hex digits",
            ));
        }
        Ok(())
    }
}

/// Integer validator for playback piece indices and counts.
#[derive(Debug)]
pub struct IntValidator {
    require_positive: bool,
}

impl IntValidator {
    /// Accepts any integer ≥ 0.
    #[must_use]
    pub const fn non_negative() -> Self {
        Self {
            require_positive: false,
        }
    }

    /// Accepts any integer > 0.
    #[must_use]
    pub const fn positive() -> Self {
        Self {
            require_positive: true,
        }
    }

    pub fn validate(&self, field: &'static str, value: &str) -> ValidateResult<u32> {
        let parsed: u32 = value
            .parse()
            .map_err(|_| ValidateError::new(field, format!("not a non-negative integer: {value:?}")))?;
        if self.require_positive && parsed == 0 {
            return Err(ValidateError::new(field, "must be greater than zero"));
        }
        Ok(parsed)
    }
}

/// Title filter validator: compiles the LIST filter expression.
#[derive(Debug, Default)]
pub struct TitleFilterValidator;

impl TitleFilterValidator {
    pub fn validate(&self, field: &'static str, value: &str) -> ValidateResult<Regex> {
        Regex::new(value)
            .map_err(|e| ValidateError::new(field, format!("not a valid filter expression: {e}")))
    }
}
