//! Media catalog over the relational store.
//!
//! Every operation runs inside a SERIALIZABLE READ ONLY transaction and is
//! retried on serialization failure up to the configured bound, transparent
//! to callers; past the bound the failure surfaces as `StoreUnavailable`.
//! The brief listing is served from a shared snapshot cache.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::{is_serialization_failure, Error, Result};
use crate::models::{AudioStream, Media, MediaBrief, MediaId, MediaProxy, VideoStream};
use cache::BriefCache;

/// Single-row read-through used by media proxies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaLookup: Send + Sync {
    /// `None` when no row carries the id.
    async fn lookup(&self, id: &MediaId) -> Result<Option<Media>>;
}

/// Read-only catalog contract consumed by request handlers.
#[async_trait]
pub trait MediaCatalog: MediaLookup {
    /// Full rows.
    async fn list_all(&self) -> Result<Vec<Media>>;

    /// Fast path: only (id, title) is read; other fields resolve lazily
    /// through the returned proxies. Served from the shared cache.
    async fn list_brief(&self) -> Result<Vec<MediaProxy>>;

    /// Full-text title search; the query text is interpreted by the store.
    async fn search(&self, query: &str) -> Result<Vec<MediaProxy>>;
}

const LIST_ALL_SQL: &str = r"
    SELECT id, title, duration_secs,
           video_codec, video_container, video_width, video_height,
           audio_codec, audio_container, locator
      FROM media
     ORDER BY title";

const LIST_BRIEF_SQL: &str = r"SELECT id, title FROM media ORDER BY title";

const LOOKUP_SQL: &str = r"
    SELECT id, title, duration_secs,
           video_codec, video_container, video_width, video_height,
           audio_codec, audio_container, locator
      FROM media
     WHERE id = $1";

const SEARCH_SQL: &str = r"
    SELECT id, title
      FROM media
     WHERE to_tsvector('simple', title) @@ plainto_tsquery('simple', $1)
     ORDER BY title";

#[derive(Clone)]
pub struct SqlCatalog {
    pool: PgPool,
    retry_attempts: u32,
    brief_cache: BriefCache,
}

impl SqlCatalog {
    #[must_use]
    pub fn new(pool: PgPool, retry_attempts: u32, brief_cache_ttl: Duration) -> Self {
        Self {
            pool,
            retry_attempts,
            brief_cache: BriefCache::new(brief_cache_ttl),
        }
    }

    /// External invalidation signal for the brief cache.
    pub fn invalidate_brief(&self) {
        self.brief_cache.invalidate();
    }

    async fn run_serializable<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T>> + Send + Sync,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.try_once(&op).await {
                Ok(value) => return Ok(value),
                Err(err) if is_serialization_failure(&err) => {
                    if attempts > self.retry_attempts {
                        let Error::Database(source) = err else {
                            return Err(err);
                        };
                        return Err(Error::StoreUnavailable { attempts, source });
                    }
                    tracing::debug!(attempts, "serialization failure, retrying catalog read");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_once<T, F>(&self, op: &F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T>> + Send + Sync,
    {
        // An uncommitted transaction rolls back on drop.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY")
            .execute(&mut *tx)
            .await?;
        let value = op(&mut *tx).await?;
        tx.commit().await?;
        Ok(value)
    }

    async fn load_brief_rows(&self) -> Result<Vec<MediaBrief>> {
        self.run_serializable(|conn| {
            Box::pin(async move {
                let rows = sqlx::query(LIST_BRIEF_SQL).fetch_all(&mut *conn).await?;
                rows.iter().map(row_to_brief).collect()
            })
        })
        .await
    }

    fn proxies_for(&self, rows: &[MediaBrief]) -> Vec<MediaProxy> {
        let resolver: Arc<dyn MediaLookup> = Arc::new(self.clone());
        rows.iter()
            .map(|brief| MediaProxy::new(brief.clone(), resolver.clone()))
            .collect()
    }
}

#[async_trait]
impl MediaLookup for SqlCatalog {
    async fn lookup(&self, id: &MediaId) -> Result<Option<Media>> {
        let id = id.clone();
        self.run_serializable(move |conn| {
            let id = id.clone();
            Box::pin(async move {
                let row = sqlx::query(LOOKUP_SQL)
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
                row.as_ref().map(row_to_media).transpose()
            })
        })
        .await
    }
}

#[async_trait]
impl MediaCatalog for SqlCatalog {
    async fn list_all(&self) -> Result<Vec<Media>> {
        self.run_serializable(|conn| {
            Box::pin(async move {
                let rows = sqlx::query(LIST_ALL_SQL).fetch_all(&mut *conn).await?;
                rows.iter().map(row_to_media).collect()
            })
        })
        .await
    }

    async fn list_brief(&self) -> Result<Vec<MediaProxy>> {
        let cache = self.brief_cache.clone();
        let rows = cache.get_or_load(|| self.load_brief_rows()).await?;
        Ok(self.proxies_for(&rows))
    }

    async fn search(&self, query: &str) -> Result<Vec<MediaProxy>> {
        let query = query.to_string();
        let rows: Vec<MediaBrief> = self
            .run_serializable(move |conn| {
                let query = query.clone();
                Box::pin(async move {
                    let rows = sqlx::query(SEARCH_SQL)
                        .bind(query)
                        .fetch_all(&mut *conn)
                        .await?;
                    rows.iter().map(row_to_brief).collect()
                })
            })
            .await?;
        Ok(self.proxies_for(&rows))
    }
}

fn row_to_brief(row: &PgRow) -> Result<MediaBrief> {
    Ok(MediaBrief {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
    })
}

fn row_to_media(row: &PgRow) -> Result<Media> {
    let duration: i32 = row.try_get("duration_secs")?;
    let duration_secs = u32::try_from(duration).ok().filter(|d| *d > 0).ok_or_else(|| {
        Error::Internal(format!("catalog row carries non-positive duration {duration}"))
    })?;

    let video = match (
        row.try_get::<Option<String>, _>("video_codec")?,
        row.try_get::<Option<String>, _>("video_container")?,
        row.try_get::<Option<i32>, _>("video_width")?,
        row.try_get::<Option<i32>, _>("video_height")?,
    ) {
        (Some(codec), Some(container), Some(width), Some(height)) => Some(VideoStream {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            codec,
            container,
        }),
        _ => None,
    };

    let audio = match (
        row.try_get::<Option<String>, _>("audio_codec")?,
        row.try_get::<Option<String>, _>("audio_container")?,
    ) {
        (Some(codec), Some(container)) => Some(AudioStream { codec, container }),
        _ => None,
    };

    Ok(Media {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        duration_secs,
        video,
        audio,
        locator: row.try_get("locator")?,
    })
}
