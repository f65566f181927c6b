//! Flight feed refresh scheduling
//!
//! [`RefreshScheduler`] owns the freshness of the flight snapshot. Every
//! refresh, automatic or requested by the user, passes through the same guard:
//! one refresh at a time, and never sooner than `min_interval` after the last
//! successful one. [`RefreshHandle`] drives a scheduler from a background task
//! and reports to the main application over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::data::{FetchError, FlightSnapshot, SnapshotSource};

/// Default minimum time between two refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(15_000);

/// How often the countdown is reported to the UI
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Process-local refresh bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshState {
    /// When the last successful refresh was admitted by the guard
    pub last_refresh: Option<Instant>,
    /// A refresh is running right now
    pub in_flight: bool,
    /// Message of the last failure, cleared by the next success
    pub error: Option<String>,
}

/// Result of a refresh request
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new snapshot was fetched and published
    Refreshed(Arc<FlightSnapshot>),
    /// The guard refused the request; carries the state that refused it
    Skipped(RefreshState),
    /// The fetch failed; the error is also stored in the state
    Failed(FetchError),
    /// The scheduler was shut down while the fetch was running
    Discarded,
}

type RefreshCallback = Box<dyn Fn(&FlightSnapshot) + Send + Sync>;

/// Clears the in-flight flag even if the refresh future is dropped
struct InFlightGuard<'a> {
    state: &'a Mutex<RefreshState>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

/// Rate-limited refresh of the flight snapshot
pub struct RefreshScheduler<S> {
    source: S,
    min_interval: Duration,
    state: Mutex<RefreshState>,
    snapshot_tx: watch::Sender<Option<Arc<FlightSnapshot>>>,
    on_refresh: Option<RefreshCallback>,
    alive: AtomicBool,
}

impl<S: SnapshotSource> RefreshScheduler<S> {
    pub fn new(source: S, min_interval: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            source,
            min_interval,
            state: Mutex::new(RefreshState::default()),
            snapshot_tx,
            on_refresh: None,
            alive: AtomicBool::new(true),
        }
    }

    /// Registers a function called after every successful refresh
    ///
    /// The callback runs synchronously on the refreshing task, so it should
    /// stay cheap. Under [`RefreshHandle`] derived views are rebuilt from
    /// [`RefreshMessage::Completed`], which reaches the app's own task.
    pub fn with_callback(mut self, callback: impl Fn(&FlightSnapshot) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(callback));
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn state(&self) -> RefreshState {
        self.lock_state().clone()
    }

    /// Receives every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<FlightSnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    /// The most recently published snapshot
    pub fn latest(&self) -> Option<Arc<FlightSnapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    fn is_eligible(&self, state: &RefreshState, now: Instant) -> bool {
        !state.in_flight
            && state
                .last_refresh
                .map_or(true, |last| now.duration_since(last) >= self.min_interval)
    }

    pub fn can_refresh(&self) -> bool {
        self.is_eligible(&self.lock_state(), Instant::now())
    }

    /// Time left before the guard lets a refresh through
    ///
    /// Informational only; always within `[0, min_interval]`.
    pub fn time_until_refresh(&self) -> Duration {
        match self.lock_state().last_refresh {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stops the scheduler; results of a refresh still running are dropped
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Fetches a new snapshot if the guard allows it
    ///
    /// The interval runs from the moment a refresh is admitted, so fetch
    /// latency does not stretch the cadence of the periodic timer.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let admitted_at = {
            let mut state = self.lock_state();
            let now = Instant::now();
            if !self.is_alive() || !self.is_eligible(&state, now) {
                debug!(in_flight = state.in_flight, "refresh skipped");
                return RefreshOutcome::Skipped(state.clone());
            }
            state.in_flight = true;
            now
        };
        let _in_flight = InFlightGuard { state: &self.state };

        let result = self.source.fetch_snapshot().await;

        if !self.is_alive() {
            debug!("scheduler shut down during refresh, discarding result");
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                {
                    let mut state = self.lock_state();
                    state.last_refresh = Some(admitted_at);
                    state.error = None;
                }
                self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));
                if let Some(callback) = &self.on_refresh {
                    callback(snapshot.as_ref());
                }
                info!(pilots = snapshot.pilots.len(), "flight snapshot refreshed");
                RefreshOutcome::Refreshed(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "flight snapshot refresh failed");
                self.lock_state().error = Some(e.to_string());
                RefreshOutcome::Failed(e)
            }
        }
    }
}

/// Messages sent from the background refresh task to the main app
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// A refresh passed the guard and is running
    Started,
    /// A new snapshot is available
    Completed(Arc<FlightSnapshot>),
    /// A manual request arrived too early
    Skipped { remaining: Duration },
    /// The refresh failed
    Failed(String),
    /// Time left until the next refresh is allowed
    Countdown(Duration),
}

/// Configuration for the background refresh task
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Whether the periodic timer runs; manual requests work either way
    pub auto_refresh: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { auto_refresh: true }
    }
}

/// Handle for controlling the background refresh task
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    request_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task for `scheduler`
    ///
    /// The periodic timer fires immediately and then every `min_interval`.
    /// Manual requests go through the same guard as timer ticks.
    pub fn spawn<S>(scheduler: Arc<RefreshScheduler<S>>, config: RefreshConfig) -> Self
    where
        S: SnapshotSource + 'static,
    {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (request_tx, mut request_rx) = mpsc::channel::<()>(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(scheduler.min_interval());
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut countdown = tokio::time::interval(COUNTDOWN_TICK);
            countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick(), if config.auto_refresh => {
                        run_refresh(&scheduler, &msg_tx, false).await;
                    }
                    Some(()) = request_rx.recv() => {
                        run_refresh(&scheduler, &msg_tx, true).await;
                    }
                    _ = countdown.tick() => {
                        let remaining = scheduler.time_until_refresh();
                        if msg_tx.send(RefreshMessage::Countdown(remaining)).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            scheduler.shutdown();
            debug!("refresh task stopped");
        });

        Self {
            receiver: msg_rx,
            request_tx,
            shutdown_tx,
        }
    }

    /// Asks for an immediate refresh; dropped if requests are already queued
    pub fn request_refresh(&self) {
        let _ = self.request_tx.try_send(());
    }

    /// Shuts down the background refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn run_refresh<S: SnapshotSource>(
    scheduler: &RefreshScheduler<S>,
    tx: &mpsc::Sender<RefreshMessage>,
    manual: bool,
) {
    if scheduler.can_refresh() {
        let _ = tx.send(RefreshMessage::Started).await;
    }

    let message = match scheduler.request_refresh().await {
        RefreshOutcome::Refreshed(snapshot) => RefreshMessage::Completed(snapshot),
        RefreshOutcome::Failed(e) => RefreshMessage::Failed(e.to_string()),
        RefreshOutcome::Skipped(_) if manual => RefreshMessage::Skipped {
            remaining: scheduler.time_until_refresh(),
        },
        RefreshOutcome::Skipped(_) | RefreshOutcome::Discarded => return,
    };
    let _ = tx.send(message).await;
}

/// Checks for pending refresh messages without blocking
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
