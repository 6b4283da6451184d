//! Shared cache for the brief catalog listing.
//!
//! Reads go through a cheap atomic staleness flag first; on a miss the
//! single-writer lock is taken, the flag re-checked, the loader run once
//! and the snapshot published. Readers always see either the previous or
//! the new snapshot, never a torn one. Invalidation is externally driven
//! via [`BriefCache::invalidate`], with an optional TTL as a time-based
//! fallback.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::MediaBrief;

struct CachedBrief {
    rows: Arc<Vec<MediaBrief>>,
    loaded_at: Instant,
}

struct CacheInner {
    stale: AtomicBool,
    snapshot: RwLock<Option<CachedBrief>>,
    reload: Mutex<()>,
    ttl: Duration,
}

#[derive(Clone)]
pub struct BriefCache {
    inner: Arc<CacheInner>,
}

impl BriefCache {
    /// A zero TTL disables time-based invalidation.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                stale: AtomicBool::new(true),
                snapshot: RwLock::new(None),
                reload: Mutex::new(()),
                ttl,
            }),
        }
    }

    /// Return the cached rows, running `loader` at most once per miss even
    /// under concurrent callers.
    pub async fn get_or_load<F, Fut>(&self, loader: F) -> Result<Arc<Vec<MediaBrief>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<MediaBrief>>>,
    {
        if let Some(rows) = self.fresh_snapshot() {
            return Ok(rows);
        }

        let _writer = self.inner.reload.lock().await;
        // Another caller may have published while we waited for the lock.
        if let Some(rows) = self.fresh_snapshot() {
            return Ok(rows);
        }

        let rows = Arc::new(loader().await?);
        *self.inner.snapshot.write() = Some(CachedBrief {
            rows: rows.clone(),
            loaded_at: Instant::now(),
        });
        self.inner.stale.store(false, Ordering::Release);
        tracing::debug!(rows = rows.len(), "published brief catalog snapshot");
        Ok(rows)
    }

    /// Mark the snapshot stale; the next read reloads.
    pub fn invalidate(&self) {
        self.inner.stale.store(true, Ordering::Release);
    }

    fn fresh_snapshot(&self) -> Option<Arc<Vec<MediaBrief>>> {
        if self.inner.stale.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.inner.snapshot.read();
        let cached = guard.as_ref()?;
        if !self.inner.ttl.is_zero() && cached.loaded_at.elapsed() >= self.inner.ttl {
            return None;
        }
        Some(cached.rows.clone())
    }
}
