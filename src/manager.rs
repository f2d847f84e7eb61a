use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::Event;
use crate::fold::Fold;
use crate::snapshot;
use crate::state::AggregateState;
use crate::stats::ActionStats;
use crate::wal::{Wal, WalRecord};

/// State shared between the ingest path, the flush worker, and readers.
struct Shared {
    /// FIFO event buffer plus the WAL handle; one lock covers both so
    /// WAL order always equals enqueue order.
    queue: Mutex<IngestQueue>,
    /// Events buffered since the last flush.
    pending: AtomicUsize,
    /// Wakes the flush worker when the size trigger fires.
    flush_signal: Notify,
    /// Published aggregate state; swapped atomically after each flush.
    state: ArcSwap<AggregateState>,
    snapshot_path: PathBuf,
    flush_event_count: usize,
    stats: ActionStats,
}

struct IngestQueue {
    events: VecDeque<Event>,
    wal: Option<Wal>,
}

/// Lifecycle owner of the aggregation pipeline.
///
/// Owns the event buffer and the WAL, runs the flush worker, and
/// publishes a consistent state handle to readers. Producers never see
/// an error from ingestion; persistence is best-effort.
pub struct Manager {
    shared: Arc<Shared>,
    flush_interval: Duration,
    report_interval: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Creates the data directory if needed, loads any previous state
    /// snapshot, and opens the WAL.
    pub async fn new(cfg: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.data_dir)
            .await
            .with_context(|| format!("creating data directory {}", cfg.data_dir.display()))?;

        let wal_path = cfg.data_dir.join("wal.log");
        let snapshot_path = cfg.data_dir.join("state.json");

        let state = snapshot::load_or_default(&snapshot_path).await;

        // A missing WAL degrades durability, not ingestion.
        let wal = match Wal::open(&wal_path).await {
            Ok(wal) => Some(wal),
            Err(e) => {
                warn!(error = %e, "WAL unavailable, events will not be journaled");
                None
            }
        };

        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(IngestQueue {
                    events: VecDeque::new(),
                    wal,
                }),
                pending: AtomicUsize::new(0),
                flush_signal: Notify::new(),
                state: ArcSwap::from_pointee(state),
                snapshot_path,
                flush_event_count: cfg.flush_event_count,
                stats: ActionStats::new(),
            }),
            flush_interval: cfg.flush_interval,
            report_interval: cfg.ingest_report_interval,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            reporter: Mutex::new(None),
        })
    }

    /// Launches the flush worker and the ingest stats reporter.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let flush_interval = self.flush_interval;
        *worker = Some(tokio::spawn(async move {
            run_flush_loop(shared, cancel, flush_interval).await;
        }));

        *self.reporter.lock().await = Some(self.spawn_reporter());

        info!(
            flush_event_count = self.shared.flush_event_count,
            flush_interval = ?self.flush_interval,
            "analytics manager started",
        );

        Ok(())
    }

    /// Stops the flush worker and drains any remaining buffered events
    /// through one final flush.
    pub async fn stop(&self) {
        info!("stopping analytics manager");
        self.cancel.cancel();
        self.shared.flush_signal.notify_waiters();

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "flush worker join failed");
            }
        }
        if let Some(reporter) = self.reporter.lock().await.take() {
            let _ = reporter.await;
        }

        if flush_pending(&self.shared, usize::MAX).await > 0 {
            self.shared.pending.store(0, Ordering::Relaxed);
        }

        info!("analytics manager stopped");
    }

    /// Accepts one event: enqueues it, journals it to the WAL, and wakes
    /// the flush worker once the size trigger is reached. Never fails
    /// from the producer's point of view.
    pub async fn ingest(&self, event: Event) {
        let action = event.action;
        let record = WalRecord::from(&event);

        {
            let mut queue = self.shared.queue.lock().await;
            queue.events.push_back(event);

            if let Some(wal) = queue.wal.as_mut() {
                if let Err(e) = wal.append(&record).await {
                    warn!(error = %e, "WAL append failed, continuing");
                }
            }

            let pending = self.shared.pending.fetch_add(1, Ordering::Relaxed) + 1;
            if pending >= self.shared.flush_event_count {
                self.shared.flush_signal.notify_one();
            }
        }

        self.shared.stats.record(action);
    }

    /// Returns a handle to the current aggregate state. The handle stays
    /// consistent even as later flushes publish new states.
    pub fn current_state(&self) -> Arc<AggregateState> {
        self.shared.state.load_full()
    }

    fn spawn_reporter(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let report_interval = self.report_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(report_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snap = shared.stats.snapshot();
                        let total: u64 = snap.iter().map(|(_, n)| n).sum();

                        if total == 0 {
                            continue;
                        }

                        info!(ingested = total, "ingest stats");
                        for (action, count) in &snap {
                            debug!(action = action.as_str(), count, "  by action");
                        }
                    }
                }
            }
        })
    }
}

/// Flush worker: folds a drained batch whenever the size trigger or the
/// time trigger fires, otherwise waits for a signal bounded by the flush
/// interval.
async fn run_flush_loop(shared: Arc<Shared>, cancel: CancellationToken, flush_interval: Duration) {
    let mut last_flush = Instant::now();

    loop {
        let due = shared.pending.load(Ordering::Relaxed) >= shared.flush_event_count
            || last_flush.elapsed() >= flush_interval;

        if due && flush_pending(&shared, shared.flush_event_count).await > 0 {
            shared.pending.store(0, Ordering::Relaxed);
            last_flush = Instant::now();
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.flush_signal.notified() => {}
            _ = tokio::time::sleep(flush_interval) => {}
        }
    }
}

/// Drains up to `max_events` buffered events in FIFO order and folds
/// them into the published state. Returns the number of events folded.
async fn flush_pending(shared: &Shared, max_events: usize) -> usize {
    let batch: Vec<Event> = {
        let mut queue = shared.queue.lock().await;
        let take = queue.events.len().min(max_events);
        queue.events.drain(..take).collect()
    };

    if batch.is_empty() {
        return 0;
    }

    let prev = shared.state.load_full();
    debug!(
        total_events = prev.total_events(),
        total_visitors = prev.total_visitors(),
        hot_post = prev
            .hot_posts()
            .first()
            .map_or("none", String::as_str),
        "state before flush",
    );

    let mut fold = Fold::new(&batch, &prev);
    fold.tally();
    fold.rank_hot_posts();
    let next = Arc::new(fold.into_state());

    shared.state.store(Arc::clone(&next));

    if let Err(e) = snapshot::save(&shared.snapshot_path, &next).await {
        warn!(error = %e, "snapshot write failed, retrying on next flush");
    }

    info!(
        batch = batch.len(),
        total_events = next.total_events(),
        total_visitors = next.total_visitors(),
        hot_posts = next.hot_posts().len(),
        post_stats = next.post_stats().len(),
        "batch flushed",
    );

    batch.len()
}
