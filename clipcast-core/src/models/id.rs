use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Opaque media identifier.
///
/// Newly minted identifiers are 16 UUID bytes; identifiers arriving on the
/// wire are any non-empty even-length lowercase hex string, so the type
/// stores raw bytes rather than a fixed-width value. Two media are the same
/// iff their identifiers match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(Vec<u8>);

impl MediaId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_bytes().to_vec())
    }

    /// Parse from lowercase hex (as validated at the protocol boundary).
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::InvalidInput("media id must not be empty".to_string()));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidInput(format!("media id is not lowercase hex: {s:?}")));
        }
        let bytes = hex::decode(s)
            .map_err(|_| Error::InvalidInput(format!("media id is not hex: {s:?}")))?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Database mapping: MediaId <-> BYTEA
impl sqlx::Type<sqlx::Postgres> for MediaId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Vec<u8> as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for MediaId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <Vec<u8> as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for MediaId {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let bytes = <Vec<u8> as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(bytes))
    }
}
