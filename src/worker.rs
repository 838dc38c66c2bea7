//! Per-target scheduling loop.
//!
//! A [`Worker`] runs in its own Tokio task: it dispatches one fetch as soon as
//! it starts, then one per tick of a fixed-interval timer until cancelled.
//! Fetches are spawned detached, so a slow target never delays the cadence;
//! consecutive fetches may overlap when the interval is shorter than the
//! round trip.
//!
//! The returned [`WorkerHandle`] is the only way to stop the loop.
//! Cancellation is cooperative and idempotent: it never blocks the caller,
//! and in-flight fetches still complete into the history they were given.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::executor::{self, FetchExecutor};
use crate::history::HistoryLog;

/// Lifecycle of a worker. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned; the first fetch is being dispatched.
    Starting,
    /// Timer armed; one fetch per tick.
    Running,
    /// Loop exited.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Scheduling loop bound to one target.
pub struct Worker {
    target_id: u64,
    url: String,
    interval: Duration,
    executor: Arc<dyn FetchExecutor>,
    history: HistoryLog,
}

impl Worker {
    /// Create a worker for `url`, appending into `history`.
    pub fn new(
        target_id: u64,
        url: impl Into<String>,
        interval: Duration,
        executor: Arc<dyn FetchExecutor>,
        history: HistoryLog,
    ) -> Self {
        Self {
            target_id,
            url: url.into(),
            interval,
            executor,
            history,
        }
    }

    /// Spawn the loop on the current Tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let target_id = self.target_id;

        let task = tokio::spawn(self.run(cancel_rx, state_tx));

        WorkerHandle {
            target_id,
            cancel: cancel_tx,
            state: state_rx,
            task,
        }
    }

    async fn run(self, mut cancel: watch::Receiver<bool>, state: watch::Sender<WorkerState>) {
        tracing::info!(
            target_id = self.target_id,
            url = %self.url,
            interval_secs = self.interval.as_secs(),
            "Worker started"
        );
        self.dispatch();

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        state.send_replace(WorkerState::Running);

        loop {
            tokio::select! {
                biased;
                // A dropped handle counts as cancellation.
                _ = cancel.wait_for(|cancelled| *cancelled) => break,
                _ = ticker.tick() => {
                    tracing::debug!(target_id = self.target_id, "Tick");
                    self.dispatch();
                }
            }
        }

        state.send_replace(WorkerState::Stopped);
        tracing::info!(target_id = self.target_id, "Worker stopped");
    }

    /// Spawn one detached fetch writing into this worker's history.
    fn dispatch(&self) {
        let executor = Arc::clone(&self.executor);
        let history = self.history.clone();
        let url = self.url.clone();
        let target_id = self.target_id;

        tokio::spawn(async move {
            let record = executor::dispatch(executor.as_ref(), &url).await;
            tracing::debug!(
                target_id,
                success = record.is_success(),
                duration = record.duration(),
                "Fetch recorded"
            );
            history.append(record);
        });
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("target_id", &self.target_id)
            .field("url", &self.url)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Owner-side handle of a running worker.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct WorkerHandle {
    target_id: u64,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Id of the target this worker polls.
    pub fn target_id(&self) -> u64 {
        self.target_id
    }

    /// Request the loop to stop. Safe to call any number of times.
    pub fn cancel(&self) {
        let already_cancelled = self.cancel.send_replace(true);
        if !already_cancelled {
            tracing::debug!(target_id = self.target_id, "Worker cancellation requested");
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Current lifecycle state.
    ///
    /// A loop that ended abnormally reports `Stopped`.
    pub fn state(&self) -> WorkerState {
        if self.task.is_finished() {
            WorkerState::Stopped
        } else {
            *self.state.borrow()
        }
    }

    /// Resolve once the loop has exited.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // Err means the loop is gone without reporting, which is stopped as well.
        let _ = state.wait_for(|s| *s == WorkerState::Stopped).await;
    }
}
