//! In-memory chain source.
//!
//! Holds an ordered event history and fans newly pushed entries out to live
//! subscribers. Block `n` commits at `n * BLOCK_TIME_SECS` seconds unless a
//! lookup failure was injected for it.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::DateTime;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use issuetrack_core::{CommitTime, EventKind};
use parking_lot::Mutex;
use tracing::debug;

use super::events::RawEntry;
use super::source::{ChainSource, Delivery, EventStream};
use crate::error::{IndexerError, Result};

/// Seconds between consecutive blocks.
pub const BLOCK_TIME_SECS: i64 = 12;

#[derive(Debug, Clone)]
enum Recorded {
    Entry(RawEntry),
    Malformed {
        kind: EventKind,
        block_number: u64,
        log_index: u64,
        reason: String,
    },
}

impl Recorded {
    fn kind(&self) -> EventKind {
        match self {
            Recorded::Entry(entry) => entry.kind(),
            Recorded::Malformed { kind, .. } => *kind,
        }
    }

    fn position(&self) -> (u64, u64) {
        match self {
            Recorded::Entry(entry) => (entry.block_number, entry.log_index),
            Recorded::Malformed {
                block_number,
                log_index,
                ..
            } => (*block_number, *log_index),
        }
    }

    fn delivery(&self) -> Delivery {
        match self {
            Recorded::Entry(entry) => Ok(entry.clone()),
            Recorded::Malformed { kind, reason, .. } => Err(IndexerError::Decode {
                kind: *kind,
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Default)]
struct State {
    history: Vec<Recorded>,
    subscribers: HashMap<EventKind, Vec<UnboundedSender<Delivery>>>,
    failing_blocks: HashSet<u64>,
    tip: Option<u64>,
    released: bool,
}

/// Chain source backed by process memory.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl MemorySource {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and deliver it to live subscribers of its kind.
    pub fn push(&self, entry: RawEntry) {
        self.record(Recorded::Entry(entry));
    }

    /// Record a log that fails to decode.
    pub fn push_malformed(
        &self,
        kind: EventKind,
        block_number: u64,
        log_index: u64,
        reason: impl Into<String>,
    ) {
        self.record(Recorded::Malformed {
            kind,
            block_number,
            log_index,
            reason: reason.into(),
        });
    }

    /// Make timestamp lookups for `block_number` fail.
    pub fn fail_timestamp(&self, block_number: u64) {
        self.state.lock().failing_blocks.insert(block_number);
    }

    /// Pin the reported tip. Without this the highest recorded block is used.
    pub fn set_tip(&self, tip: u64) {
        self.state.lock().tip = Some(tip);
    }

    /// Number of open live subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.state
            .lock()
            .subscribers
            .get(&kind)
            .map_or(0, |senders| {
                senders.iter().filter(|tx| !tx.is_closed()).count()
            })
    }

    /// Whether [`ChainSource::release`] has been called.
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn record(&self, recorded: Recorded) {
        let mut state = self.state.lock();
        let kind = recorded.kind();

        if let Some(senders) = state.subscribers.get_mut(&kind) {
            senders.retain(|tx| tx.unbounded_send(recorded.delivery()).is_ok());
        }
        state.history.push(recorded);
    }

    fn ensure_open(state: &State) -> Result<()> {
        if state.released {
            return Err(IndexerError::Transport("source released".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSource for MemorySource {
    async fn subscribe(&self, kind: EventKind) -> Result<EventStream> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        let (tx, rx) = mpsc::unbounded();
        state.subscribers.entry(kind).or_default().push(tx);
        debug!(%kind, "Memory subscription opened");

        Ok(rx.boxed())
    }

    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Delivery>> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;

        let mut matching: Vec<&Recorded> = state
            .history
            .iter()
            .filter(|r| r.kind() == kind)
            .filter(|r| (from_block..=to_block).contains(&r.position().0))
            .collect();
        matching.sort_by_key(|r| r.position());

        Ok(matching.into_iter().map(Recorded::delivery).collect())
    }

    async fn tip(&self) -> Result<u64> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;

        Ok(state.tip.unwrap_or_else(|| {
            state
                .history
                .iter()
                .map(|r| r.position().0)
                .max()
                .unwrap_or(0)
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<CommitTime> {
        let unavailable = |reason: &str| IndexerError::TimestampUnavailable {
            block_number,
            reason: reason.to_string(),
        };

        let state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.failing_blocks.contains(&block_number) {
            return Err(unavailable("injected failure"));
        }

        i64::try_from(block_number)
            .ok()
            .and_then(|n| n.checked_mul(BLOCK_TIME_SECS))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| unavailable("timestamp out of range"))
    }

    async fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        // Dropping the senders ends every open stream.
        state.subscribers.clear();
    }
}
