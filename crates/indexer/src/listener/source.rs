//! The chain event source seam.
//!
//! The reconciliation core only sees this trait; the alloy WebSocket provider
//! is one implementation, tests use in-memory ones.

use async_trait::async_trait;
use futures::stream::BoxStream;
use issuetrack_core::{CommitTime, EventKind};

use super::events::RawEntry;
use crate::error::{IndexerError, Result};

/// One delivery from a source: a decoded entry, or the reason it could not be
/// decoded.
pub type Delivery = std::result::Result<RawEntry, IndexerError>;

/// Live feed of deliveries. Ends only when the subscription is released or
/// the transport fails terminally.
pub type EventStream = BoxStream<'static, Delivery>;

/// Contract event log plus block metadata.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Subscribe to new events of one kind, in emission order.
    async fn subscribe(&self, kind: EventKind) -> Result<EventStream>;

    /// Fetch every event of one kind in `[from_block, to_block]`, ordered by
    /// `(block_number, log_index)`.
    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Delivery>>;

    /// Current chain tip.
    async fn tip(&self) -> Result<u64>;

    /// Commit time of a block.
    async fn block_timestamp(&self, block_number: u64) -> Result<CommitTime>;

    /// Release the transport handle. Further calls fail with a transport error.
    async fn release(&self) {}
}
