//! Device discovery.
//!
//! Runs a device watcher until a record is selected, the watcher stops, or
//! the configured timeout elapses. Watcher handlers post events onto a
//! channel; the caller's task is the only consumer, so the identifier map
//! and the selection state need no locking.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::platform::{BlePlatform, DeviceWatcher, WatcherEvent, WatcherQuery};
use crate::ble::record::DeviceRecord;
use crate::ble::selection::{Selection, SelectionMode, Selector};
use crate::error::Result;
use crate::pattern::Pattern;

/// State of one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiscoveryState {
    /// Watcher not started yet.
    #[default]
    Idle,
    /// Watcher running, records are evaluated.
    Watching,
    /// A record was selected and a stop was requested.
    Matched,
    /// Terminal.
    Stopped,
}

impl DiscoveryState {
    /// Whether the run still waits for events.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Watching | Self::Matched)
    }
}

impl std::fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Watching => write!(f, "Watching"),
            Self::Matched => write!(f, "Matched"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of one discovery run.
pub struct DiscoveryOutcome<P: BlePlatform> {
    /// The selected handles, if any record matched.
    pub selection: Option<Selection<P::Device>>,
    /// Every named record known when the run ended, by identifier.
    pub seen: HashMap<String, DeviceRecord>,
    /// Whether the run ended because the timeout elapsed.
    pub timed_out: bool,
}

/// Owns the watcher lifecycle for discovery runs.
pub struct DiscoveryController<'a, P: BlePlatform> {
    platform: &'a P,
    query: &'a WatcherQuery,
    timeout: Option<Duration>,
}

enum Wake {
    Event(WatcherEvent),
    Closed,
    TimedOut,
}

impl<'a, P: BlePlatform> DiscoveryController<'a, P> {
    /// Create a controller for the given platform and query.
    pub fn new(platform: &'a P, query: &'a WatcherQuery, timeout: Option<Duration>) -> Self {
        Self {
            platform,
            query,
            timeout,
        }
    }

    /// Watch for a device matching `pattern` in `mode`.
    ///
    /// Returns once the run reaches [`DiscoveryState::Stopped`]. Handlers are
    /// detached before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the watcher cannot be created or started. A
    /// run without a match is reported through an empty `selection`.
    pub async fn discover(&self, pattern: &Pattern, mode: SelectionMode) -> Result<DiscoveryOutcome<P>> {
        let watcher = self.platform.create_watcher(self.query)?;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        watcher.attach(event_tx);

        info!("Starting device watcher ({} {})", mode, pattern);
        if let Err(e) = watcher.start().await {
            watcher.detach();
            return Err(e);
        }

        let mut run = DiscoveryRun::new(Selector::new(self.platform, pattern, mode));
        run.state = DiscoveryState::Watching;
        let deadline = self.timeout.map(|t| Instant::now() + t);

        while run.state.is_waiting() {
            let first = match next_event(&mut event_rx, deadline).await {
                Wake::Event(event) => event,
                Wake::Closed => {
                    debug!("Watcher event channel closed");
                    run.state = DiscoveryState::Stopped;
                    break;
                }
                Wake::TimedOut => {
                    warn!("Discovery timed out in state {}", run.state);
                    run.timed_out = true;
                    if let Err(e) = watcher.stop().await {
                        warn!("Failed to stop watcher: {}", e);
                    }
                    run.state = DiscoveryState::Stopped;
                    break;
                }
            };

            let mut batch = vec![first];
            while let Ok(event) = event_rx.try_recv() {
                batch.push(event);
            }

            run.process_batch(batch, &watcher).await;
        }

        watcher.detach();
        drop(event_rx);

        info!(
            "Device watcher finished: {} ({} devices seen)",
            if run.selection.is_some() { "matched" } else { "no match" },
            run.seen.len()
        );

        Ok(DiscoveryOutcome {
            selection: run.selection,
            seen: run.seen,
            timed_out: run.timed_out,
        })
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<WatcherEvent>, deadline: Option<Instant>) -> Wake {
    let received = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(received) => received,
            Err(_) => return Wake::TimedOut,
        },
        None => rx.recv().await,
    };

    match received {
        Some(event) => Wake::Event(event),
        None => Wake::Closed,
    }
}

struct DiscoveryRun<'a, P: BlePlatform> {
    selector: Selector<'a, P>,
    state: DiscoveryState,
    seen: HashMap<String, DeviceRecord>,
    selection: Option<Selection<P::Device>>,
    timed_out: bool,
}

impl<'a, P: BlePlatform> DiscoveryRun<'a, P> {
    fn new(selector: Selector<'a, P>) -> Self {
        Self {
            selector,
            state: DiscoveryState::Idle,
            seen: HashMap::new(),
            selection: None,
            timed_out: false,
        }
    }

    /// Process events that were already queued together.
    ///
    /// A record removed later in the same batch is never evaluated.
    async fn process_batch(&mut self, batch: Vec<WatcherEvent>, watcher: &P::Watcher) {
        let mut removed_later: HashSet<String> = HashSet::new();
        let mut skip = vec![false; batch.len()];
        for (index, event) in batch.iter().enumerate().rev() {
            match event {
                WatcherEvent::Removed(update) => {
                    removed_later.insert(update.id.clone());
                }
                WatcherEvent::Added(_) | WatcherEvent::Updated(_) => {
                    skip[index] = event
                        .identifier()
                        .map(|id| removed_later.contains(id))
                        .unwrap_or(false);
                }
                WatcherEvent::EnumerationCompleted | WatcherEvent::Stopped => {}
            }
        }

        for (event, skip_selection) in batch.into_iter().zip(skip) {
            if !self.state.is_waiting() {
                break;
            }
            self.handle(event, skip_selection, watcher).await;
        }
    }

    async fn handle(&mut self, event: WatcherEvent, skip_selection: bool, watcher: &P::Watcher) {
        trace!("Watcher event in state {}: {:?}", self.state, event);

        if let WatcherEvent::Stopped = event {
            debug!("Watcher stopped");
            self.state = DiscoveryState::Stopped;
            return;
        }

        let status = watcher.status();
        if !status.is_started() {
            debug!("Stray event with watcher {:?}, ending discovery", status);
            self.state = DiscoveryState::Stopped;
            return;
        }

        match event {
            WatcherEvent::Added(record) => {
                if record.name.is_empty() {
                    trace!("Ignoring unnamed device {}", record.id);
                    return;
                }
                self.seen.insert(record.id.clone(), record.clone());
                if !skip_selection {
                    self.evaluate(&record, watcher).await;
                }
            }
            WatcherEvent::Updated(update) => {
                let record = match self.seen.get_mut(&update.id) {
                    Some(record) => {
                        record.apply(&update);
                        record.clone()
                    }
                    None => return,
                };
                if !skip_selection {
                    self.evaluate(&record, watcher).await;
                }
            }
            WatcherEvent::Removed(update) => {
                if self.seen.remove(&update.id).is_some() {
                    debug!("Device {} removed", update.id);
                }
            }
            WatcherEvent::EnumerationCompleted => {
                debug!("Initial enumeration completed ({} devices)", self.seen.len());
            }
            WatcherEvent::Stopped => {}
        }
    }

    async fn evaluate(&mut self, record: &DeviceRecord, watcher: &P::Watcher) {
        if self.state != DiscoveryState::Watching {
            return;
        }

        if let Some(selection) = self.selector.try_select(record).await {
            info!("Selected device {} ({})", record.id, record.name);
            self.selection = Some(selection);
            self.state = DiscoveryState::Matched;
            if let Err(e) = watcher.stop().await {
                warn!("Failed to stop watcher after match: {}", e);
                self.state = DiscoveryState::Stopped;
            }
        }
    }
}
