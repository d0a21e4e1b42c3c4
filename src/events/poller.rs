use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::syncthing_client::api::{RawEvent, SyncthingApi};

use super::event::Event;

/// What the poller should do after an event has been applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resync {
    #[default]
    NotNeeded,
    /// Rebuild the model from fresh snapshots before the next batch.
    Needed,
}

/// Receives typed events, one at a time, in ID order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Resync;

    /// Called after a batch whose IDs revealed that the daemon dropped events.
    async fn events_skipped(&self);

    /// Re-fetches and applies snapshots. Runs on the poll task while no batch
    /// is in flight, so it never interleaves with event application.
    async fn resync(&self);
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub initial_delay: Duration,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub batch_limit: Option<u32>,
}

impl From<&Config> for PollerSettings {
    fn from(config: &Config) -> Self {
        Self {
            initial_delay: config.poll_initial_delay(),
            timeout: config.poll_timeout(),
            retry_delay: config.poll_retry_delay(),
            batch_limit: config.event_batch_limit,
        }
    }
}

/// Tracks the last seen event ID and spots holes in the feed.
#[derive(Debug, Default)]
pub(crate) struct GapDetector {
    last_seen_id: Option<u64>,
}

impl GapDetector {
    pub(crate) fn is_first_batch(&self) -> bool {
        self.last_seen_id.is_none()
    }

    pub(crate) fn since(&self) -> u64 {
        self.last_seen_id.unwrap_or(0)
    }

    /// Records a non-empty batch of ascending IDs, returning whether events were skipped.
    ///
    /// Holes between IDs inside the batch count too, not only at the batch boundary.
    pub(crate) fn observe(&mut self, ids: &[u64]) -> bool {
        let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
            return false;
        };

        let boundary_gap = self
            .last_seen_id
            .is_some_and(|seen| first != seen.saturating_add(1));
        let internal_gap = ids.windows(2).any(|pair| pair[1] != pair[0].saturating_add(1));

        self.last_seen_id = Some(last);
        boundary_gap || internal_gap
    }

    /// A batch starting at or below the last seen ID comes from a restarted daemon.
    pub(crate) fn went_backwards(&self, ids: &[u64]) -> bool {
        match (self.last_seen_id, ids.first()) {
            (Some(seen), Some(&first)) => first <= seen,
            _ => false,
        }
    }
}

struct Batch {
    events: Vec<RawEvent>,
    events_skipped: bool,
    done: oneshot::Sender<Resync>,
}

struct RunningPoller {
    shutdown: watch::Sender<bool>,
    poll_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

/// Long-polls the daemon's event feed and feeds an [`EventHandler`].
pub struct EventPoller {
    api: Arc<dyn SyncthingApi>,
    handler: Arc<dyn EventHandler>,
    settings: PollerSettings,
    running: Mutex<Option<RunningPoller>>,
}

impl EventPoller {
    pub fn new(
        api: Arc<dyn SyncthingApi>,
        handler: Arc<dyn EventHandler>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            api,
            handler,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Starts a new polling session. Does nothing if one is already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (batch_tx, batch_rx) = mpsc::channel(1);

        let worker_task = tokio::spawn(run_worker(Arc::clone(&self.handler), batch_rx));
        let poll_task = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            Arc::clone(&self.handler),
            self.settings.clone(),
            batch_tx,
            shutdown_rx,
        ));

        info!("Event poller started");
        *running = Some(RunningPoller {
            shutdown,
            poll_task,
            worker_task,
        });
    }

    /// Stops the session, letting a batch that is already being applied finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(err) = running.poll_task.await {
            warn!(error = ?err, "Event poll task ended abnormally");
        }
        if let Err(err) = running.worker_task.await {
            warn!(error = ?err, "Event worker task ended abnormally");
        }
        info!("Event poller stopped");
    }
}

async fn poll_loop(
    api: Arc<dyn SyncthingApi>,
    handler: Arc<dyn EventHandler>,
    settings: PollerSettings,
    batches: mpsc::Sender<Batch>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = shutdown.changed() => return,
        _ = tokio::time::sleep(settings.initial_delay) => {}
    }

    let mut gaps = GapDetector::default();
    let mut resync_after_anchor = false;
    loop {
        let first_batch = gaps.is_first_batch();
        // A fresh session only anchors on the newest event instead of replaying history.
        let (since, limit) = if first_batch {
            (0, Some(1))
        } else {
            (gaps.since(), settings.batch_limit)
        };

        let fetched = tokio::select! {
            _ = shutdown.changed() => return,
            fetched = api.fetch_events(since, limit, settings.timeout) => fetched,
        };

        let events = match fetched {
            Ok(events) => events,
            Err(err) => {
                warn!(since, error = %err, "Event poll failed, retrying");
                if err.is_connection_failure() && !first_batch {
                    // The daemon may come back with a fresh ID sequence.
                    info!(since, "Lost connection to Syncthing, re-anchoring event stream");
                    gaps = GapDetector::default();
                    resync_after_anchor = true;
                }
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(settings.retry_delay) => continue,
                }
            }
        };

        if events.is_empty() {
            continue;
        }

        let ids: Vec<u64> = events.iter().map(|event| event.id).collect();
        if gaps.went_backwards(&ids) {
            info!(since, first_id = ids[0], "Event IDs went backwards, re-anchoring event stream");
            gaps = GapDetector::default();
            resync_after_anchor = true;
            continue;
        }
        let events_skipped = gaps.observe(&ids);

        if first_batch {
            debug!(last_event_id = gaps.since(), "Anchored event stream");
            if std::mem::take(&mut resync_after_anchor) {
                handler.resync().await;
            }
            continue;
        }

        let (done, processed) = oneshot::channel();
        let batch = Batch {
            events,
            events_skipped,
            done,
        };
        if batches.send(batch).await.is_err() {
            warn!("Event worker is gone, stopping poll loop");
            return;
        }
        // The next fetch waits until this batch, and any resync it asked for, is applied.
        if let Ok(Resync::Needed) = processed.await {
            handler.resync().await;
        }
    }
}

async fn run_worker(handler: Arc<dyn EventHandler>, mut batches: mpsc::Receiver<Batch>) {
    while let Some(batch) = batches.recv().await {
        let resync = apply_batch(handler.as_ref(), batch.events, batch.events_skipped).await;
        let _ = batch.done.send(resync);
    }
}

/// Applies one batch in order, skipping events that fail to parse.
pub(crate) async fn apply_batch(
    handler: &dyn EventHandler,
    events: Vec<RawEvent>,
    events_skipped: bool,
) -> Resync {
    let mut resync = Resync::NotNeeded;
    for raw in events {
        let event_type = raw.event_type.clone();
        match Event::from_raw(raw) {
            Ok(event) => {
                if handler.handle_event(event).await == Resync::Needed {
                    resync = Resync::Needed;
                }
            }
            Err(err) => warn!(event_type = %event_type, error = %err, "Skipping malformed event"),
        }
    }

    if events_skipped {
        warn!("Event IDs are not contiguous, some events were skipped");
        handler.events_skipped().await;
        resync = Resync::Needed;
    }
    resync
}
