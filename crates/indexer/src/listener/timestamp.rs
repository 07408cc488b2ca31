//! Block → commit time resolution with a bounded LRU cache.
//!
//! Events in one batch usually share a block, so most lookups hit the cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use issuetrack_core::CommitTime;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::source::ChainSource;
use crate::error::{IndexerError, Result};

/// Default number of block timestamps to keep.
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Resolves block numbers to commit times through a chain source.
pub struct TimestampResolver {
    source: Arc<dyn ChainSource>,
    cache: Mutex<LruCache<u64, CommitTime>>,
}

impl TimestampResolver {
    /// Create a resolver holding at most `capacity` entries (minimum 1).
    pub fn new(source: Arc<dyn ChainSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Commit time of `block_number`.
    ///
    /// Provider failures surface as `TimestampUnavailable` and are not cached.
    pub async fn resolve(&self, block_number: u64) -> Result<CommitTime> {
        let cached = self.cache.lock().get(&block_number).copied();
        if let Some(time) = cached {
            debug!(block_number, "Block timestamp cache hit");
            return Ok(time);
        }

        let time = self
            .source
            .block_timestamp(block_number)
            .await
            .map_err(|e| match e {
                IndexerError::TimestampUnavailable { .. } => e,
                other => IndexerError::TimestampUnavailable {
                    block_number,
                    reason: other.to_string(),
                },
            })?;

        self.cache.lock().put(block_number, time);

        Ok(time)
    }

    /// Number of cached blocks.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}
