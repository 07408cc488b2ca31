//! IssueTracker contract event ingestion.
//!
//! This crate provides:
//! - Typed IssueTracker event definitions and log decoding
//! - A `ChainSource` seam with WebSocket and in-memory implementations
//! - Block timestamp resolution with a bounded cache
//! - A reconciliation engine that applies events to SQLite atomically
//! - Live listening, graceful shutdown and full resync
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  issuetrack-indexer                      │
//! │                                          │
//! │  ┌─────────────────┐                     │
//! │  │  ChainSource    │ ← WebSocket RPC     │
//! │  │  (subscribe /   │   IssueTracker logs │
//! │  │   query_range)  │                     │
//! │  └────────┬────────┘                     │
//! │           │ RawEntry                     │
//! │      ┌────▼──────┐                       │
//! │      │  Mapper   │  status index check   │
//! │      └────┬──────┘                       │
//! │           │ ChainEvent + EventMeta       │
//! │      ┌────▼──────────┐   ┌────────────┐  │
//! │      │  Reconciler   │◄──│ Timestamp  │  │
//! │      │ (5 handlers)  │   │ Resolver   │  │
//! │      └────┬──────────┘   │ (LRU)      │  │
//! │           │              └────────────┘  │
//! │      ┌────▼──────┐                       │
//! │      │  Storage  │ ← SQLite, one         │
//! │      │           │   transaction / event │
//! │      └───────────┘                       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The [`lifecycle::Indexer`] drives the pipeline: concurrent handlers in live
//! mode, strictly sequential replay in resync mode.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod storage;

pub use engine::{Outcome, Reconciler, RetryPolicy};
pub use error::{IndexerError, Result};
pub use lifecycle::{Indexer, ResyncReport};

// Re-export common types
pub use issuetrack_core::{ChainEvent, CommitTime, CoreError, EventKind, EventMeta, IssueStatus};
