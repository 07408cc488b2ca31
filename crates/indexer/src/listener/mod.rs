//! Chain-facing side of the indexer.
//!
//! This module provides:
//! - IssueTracker event definitions and log decoding
//! - The `ChainSource` seam and its alloy WebSocket implementation, plus an
//!   in-memory implementation behind the `test-util` feature
//! - Pure mapping from raw entries to domain events
//! - Block timestamp resolution with a bounded cache

pub mod events;
pub mod mapper;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod provider;
pub mod source;
pub mod timestamp;

pub use events::{RawEntry, RawEventArgs};
pub use mapper::map_entry;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemorySource;
pub use provider::RpcProvider;
pub use source::{ChainSource, Delivery, EventStream};
pub use timestamp::TimestampResolver;
