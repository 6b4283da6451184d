use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A serializable read kept failing after the configured retry bound.
    #[error("store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable { attempts: u32, source: sqlx::Error },

    /// Clip storage backend I/O failure (not a missing blob, which is a hole).
    #[error("clip storage unavailable: {0}")]
    StorageUnavailable(std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            _ => Self::Database(err),
        }
    }
}

/// Whether an error is a serialization failure of a SERIALIZABLE
/// transaction (SQLSTATE 40001), the class that is retried.
#[must_use]
pub fn is_serialization_failure(err: &Error) -> bool {
    let Error::Database(sqlx::Error::Database(db_err)) = err else {
        return false;
    };
    db_err.code().as_deref() == Some("40001")
}

pub type Result<T> = std::result::Result<T, Error>;
