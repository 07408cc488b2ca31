//! Indexer lifecycle: live listening, shutdown and resync.
//!
//! Live mode runs one forwarding task per event kind. Each one pushes
//! deliveries into a bounded queue. A single dispatcher maps them and spawns
//! one handler task per event, capped by a semaphore. Handlers for different
//! events may run concurrently; the engine's bounded retry absorbs the
//! project/stack race that results.
//!
//! ```text
//!  subscribe(kind) x5 ──► forward ──► mpsc(queue_capacity) ──► dispatcher
//!                                                                 │ map_entry
//!                                                                 ▼
//!                                              JoinSet<handler> (≤ max_concurrent_handlers)
//!                                                                 │
//!                                                                 ▼
//!                                                            Reconciler
//! ```
//!
//! Resync replays the whole history sequentially through the same mapper and
//! engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use issuetrack_core::{ChainEvent, EventKind, EventMeta};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ListenerConfig};
use crate::engine::{Outcome, Reconciler};
use crate::error::Result;
use crate::listener::{map_entry, ChainSource, Delivery, EventStream, TimestampResolver};
use crate::storage::Storage;

/// Counters for one event kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Events that wrote rows
    pub applied: u64,
    /// Events whose rows already existed
    pub already_applied: u64,
    /// Events given up on after retries
    pub dropped: u64,
    /// Deliveries that could not be decoded or mapped
    pub skipped: u64,
    /// Events whose handler returned an error
    pub failed: u64,
}

impl Tally {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::AlreadyApplied => self.already_applied += 1,
            Outcome::Dropped { .. } => self.dropped += 1,
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.applied += other.applied;
        self.already_applied += other.already_applied;
        self.dropped += other.dropped;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Per-kind counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tallies {
    by_kind: [Tally; 5],
}

impl Tallies {
    /// Counters for `kind`.
    pub fn get(&self, kind: EventKind) -> Tally {
        self.by_kind[slot(kind)]
    }

    /// Counters summed over every kind.
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        for tally in &self.by_kind {
            total.merge(tally);
        }
        total
    }

    fn get_mut(&mut self, kind: EventKind) -> &mut Tally {
        &mut self.by_kind[slot(kind)]
    }
}

fn slot(kind: EventKind) -> usize {
    match kind {
        EventKind::OrganizationRegistered => 0,
        EventKind::ProjectCreated => 1,
        EventKind::IssuesAdded => 2,
        EventKind::IssueStatusChanged => 3,
        EventKind::StackAdded => 4,
    }
}

/// Result of one full resync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncReport {
    /// Chain tip the pass replayed up to
    pub tip: u64,
    /// Per-kind counters
    pub tallies: Tallies,
}

/// Everything the live pipeline handled between `start` and `shutdown`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveReport {
    /// Per-kind counters
    pub tallies: Tallies,
}

type Queued = (EventKind, Delivery);

struct Running {
    forwarders: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<LiveReport>,
}

/// Owns the chain source for the lifetime of the process and drives the
/// reconciler from it.
pub struct Indexer {
    source: Arc<dyn ChainSource>,
    reconciler: Reconciler,
    config: ListenerConfig,
    cancel: CancellationToken,
    running: Mutex<Option<Running>>,
    released: AtomicBool,
}

impl Indexer {
    /// Create an indexer. Nothing is subscribed until [`Indexer::start`].
    pub fn new(
        source: Arc<dyn ChainSource>,
        reconciler: Reconciler,
        config: ListenerConfig,
    ) -> Self {
        Self {
            source,
            reconciler,
            config,
            cancel: CancellationToken::new(),
            running: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Wire the timestamp resolver, reconciler and pipeline from a loaded
    /// configuration.
    pub fn from_config(source: Arc<dyn ChainSource>, storage: Storage, config: &Config) -> Self {
        let resolver = Arc::new(TimestampResolver::new(
            source.clone(),
            config.listener.timestamp_cache_size,
        ));
        let reconciler = Reconciler::new(storage, resolver, config.retry.policy());
        Self::new(source, reconciler, config.listener.clone())
    }

    /// Engine the indexer applies events through.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Subscribe to every event kind and start the live pipeline.
    ///
    /// All subscriptions are opened before any task is spawned, so a failing
    /// subscription leaves nothing running.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        if self.cancel.is_cancelled() {
            anyhow::bail!("Indexer has been shut down");
        }
        if running.is_some() {
            anyhow::bail!("Indexer already started");
        }

        let mut streams = Vec::with_capacity(EventKind::RESYNC_ORDER.len());
        for kind in EventKind::RESYNC_ORDER {
            let stream = self
                .source
                .subscribe(kind)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to subscribe to {kind}: {e}"))?;
            streams.push((kind, stream));
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let forwarders = streams
            .into_iter()
            .map(|(kind, stream)| {
                tokio::spawn(forward(kind, stream, queue_tx.clone(), self.cancel.clone()))
            })
            .collect();
        drop(queue_tx);

        let dispatcher = tokio::spawn(dispatch(
            queue_rx,
            self.reconciler.clone(),
            Arc::new(Semaphore::new(self.config.max_concurrent_handlers.max(1))),
            self.cancel.clone(),
        ));

        *running = Some(Running {
            forwarders,
            dispatcher,
        });

        info!(
            queue_capacity = self.config.queue_capacity,
            max_concurrent_handlers = self.config.max_concurrent_handlers,
            "Indexer started"
        );

        Ok(())
    }

    /// Whether the live pipeline is running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stop accepting deliveries, drain in-flight handlers and release the
    /// source. Calling it again is a no-op that returns an empty report.
    pub async fn shutdown(&self) -> LiveReport {
        self.cancel.cancel();

        let running = self.running.lock().await.take();
        let report = match running {
            Some(running) => running.stop().await,
            None => LiveReport::default(),
        };

        if !self.released.swap(true, Ordering::SeqCst) {
            self.source.release().await;
            let total = report.tallies.total();
            info!(
                applied = total.applied,
                dropped = total.dropped,
                failed = total.failed,
                "Indexer stopped"
            );
        }

        report
    }

    /// Replay every event from block 0 to the current tip, one kind at a time
    /// in dependency order.
    ///
    /// Undecodable entries are skipped. The first engine error aborts the
    /// pass; rows committed before it stay committed.
    pub async fn resync(&self) -> Result<ResyncReport> {
        let tip = self.source.tip().await?;
        info!(tip, "Starting resync");

        let mut tallies = Tallies::default();

        for kind in EventKind::RESYNC_ORDER {
            let deliveries = self.source.query_range(kind, 0, tip).await?;
            debug!(%kind, count = deliveries.len(), "Fetched events for resync");

            for delivery in deliveries {
                let (event, meta) = match delivery.and_then(|entry| map_entry(&entry)) {
                    Ok(mapped) => mapped,
                    Err(e) => {
                        warn!(%kind, error = %e, "Skipping undecodable event during resync");
                        tallies.get_mut(kind).skipped += 1;
                        continue;
                    }
                };

                match self.reconciler.apply(&event, meta).await {
                    Ok(outcome) => tallies.get_mut(kind).record(&outcome),
                    Err(e) => {
                        error!(
                            %kind,
                            subject = %event.subject(),
                            block_number = meta.block_number,
                            log_index = meta.log_index,
                            error = %e,
                            "Resync aborted"
                        );
                        return Err(e);
                    }
                }
            }

            let tally = tallies.get(kind);
            info!(
                %kind,
                applied = tally.applied,
                already_applied = tally.already_applied,
                dropped = tally.dropped,
                skipped = tally.skipped,
                "Resynced event kind"
            );
        }

        info!(tip, "Resync complete");

        Ok(ResyncReport { tip, tallies })
    }

    /// Resync only when no issue has been mirrored yet.
    ///
    /// Replaying over a populated store collides with the issues already
    /// there and aborts, so a restart skips the pass and returns `None`.
    pub async fn resync_if_empty(&self) -> Result<Option<ResyncReport>> {
        if self.reconciler.storage().has_issues().await? {
            info!("Store already holds issues, skipping resync");
            return Ok(None);
        }
        self.resync().await.map(Some)
    }
}

impl Running {
    async fn stop(self) -> LiveReport {
        for forwarder in self.forwarders {
            if let Err(e) = forwarder.await {
                error!(error = %e, "Subscription task failed");
            }
        }

        match self.dispatcher.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Dispatcher task failed");
                LiveReport::default()
            }
        }
    }
}

/// Pump one subscription into the shared queue until cancelled or the stream
/// ends. Dropping the stream releases the subscription.
async fn forward(
    kind: EventKind,
    mut stream: EventStream,
    queue: mpsc::Sender<Queued>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!(%kind, "Subscription ended");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = queue.send((kind, delivery)) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!(%kind, "Subscription released");
}

async fn dispatch(
    mut queue: mpsc::Receiver<Queued>,
    reconciler: Reconciler,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) -> LiveReport {
    let mut report = LiveReport::default();
    let mut handlers: JoinSet<(EventKind, Option<Outcome>)> = JoinSet::new();

    loop {
        while let Some(joined) = handlers.try_join_next() {
            record(&mut report, joined);
        }

        let (kind, delivery) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            queued = queue.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let (event, meta) = match delivery.and_then(|entry| map_entry(&entry)) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(%kind, error = %e, "Skipping undecodable event");
                report.tallies.get_mut(kind).skipped += 1;
                continue;
            }
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let reconciler = reconciler.clone();
        handlers.spawn(async move {
            let outcome = handle(&reconciler, &event, meta).await;
            drop(permit);
            (kind, outcome)
        });
    }

    queue.close();

    if !handlers.is_empty() {
        info!(in_flight = handlers.len(), "Draining in-flight handlers");
    }
    while let Some(joined) = handlers.join_next().await {
        record(&mut report, joined);
    }

    report
}

/// Live handler boundary: errors are logged here and go no further.
async fn handle(reconciler: &Reconciler, event: &ChainEvent, meta: EventMeta) -> Option<Outcome> {
    match reconciler.apply(event, meta).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(
                kind = %event.kind(),
                subject = %event.subject(),
                block_number = meta.block_number,
                log_index = meta.log_index,
                error = %e,
                "Failed to apply event"
            );
            None
        }
    }
}

fn record(
    report: &mut LiveReport,
    joined: std::result::Result<(EventKind, Option<Outcome>), tokio::task::JoinError>,
) {
    match joined {
        Ok((kind, Some(outcome))) => report.tallies.get_mut(kind).record(&outcome),
        Ok((kind, None)) => report.tallies.get_mut(kind).failed += 1,
        Err(e) => error!(error = %e, "Event handler task failed"),
    }
}
