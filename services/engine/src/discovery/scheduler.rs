//! Ticking scheduler
//!
//! On every tick the scheduler asks its finder for the current batch of work,
//! hands the batch to every registered worker once, and publishes exactly one
//! completion signal. A tick whose finder fails publishes nothing, so a
//! consumer can tell "no signal" apart from "signal false".

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Produces the batch of work for one tick
#[async_trait]
pub trait WorkFinder<W>: Send + Sync {
    async fn find_work(&self) -> Result<Vec<W>>;
}

/// Processes one batch of work
#[async_trait]
pub trait Worker<W>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, work: &[W]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Terminal
    Stopped,
}

struct LoopHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Scheduler<W> {
    finder: Arc<dyn WorkFinder<W>>,
    workers: Vec<Arc<dyn Worker<W>>>,
    period: Duration,
    signal_tx: Sender<bool>,
    signal_rx: Receiver<bool>,
    state: watch::Sender<SchedulerState>,
    running: Mutex<Option<LoopHandle>>,
}

impl<W: Send + Sync + 'static> Scheduler<W> {
    pub fn new(finder: Arc<dyn WorkFinder<W>>, period: Duration) -> Self {
        let (signal_tx, signal_rx) = unbounded();
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            finder,
            workers: Vec::new(),
            period,
            signal_tx,
            signal_rx,
            state,
            running: Mutex::new(None),
        }
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker<W>>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Completion signals, one per tick that found its work
    pub fn signals(&self) -> Receiver<bool> {
        self.signal_rx.clone()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run one tick.
    ///
    /// Returns the published signal, or `None` when the finder failed or the
    /// scheduler is stopped.
    pub async fn tick(&self) -> Option<bool> {
        if self.state() == SchedulerState::Stopped {
            return None;
        }
        self.state.send_replace(SchedulerState::Running);

        let work = match self.finder.find_work().await {
            Ok(work) => work,
            Err(e) => {
                error!(error = %e, "Failed to find work, no signal for this tick");
                self.state.send_replace(SchedulerState::Idle);
                return None;
            }
        };

        let ok = if work.is_empty() {
            debug!("No work found");
            true
        } else {
            let results = join_all(self.workers.iter().map(|w| w.run(&work))).await;

            let mut ok = true;
            for (worker, result) in self.workers.iter().zip(results) {
                if let Err(e) = result {
                    warn!(worker = %worker.name(), error = %e, "Worker pass failed");
                    ok = false;
                }
            }
            ok
        };

        self.state.send_replace(SchedulerState::Idle);

        if self.signal_tx.try_send(ok).is_err() {
            debug!("Signal channel closed, dropping completion signal");
        }
        Some(ok)
    }

    /// Spawn the background tick loop. The first tick runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() || self.state() == SchedulerState::Stopped {
            warn!("Scheduler already started or stopped");
            return;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let scheduler = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval(scheduler.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        // Shutdown is only observed between ticks
                        scheduler.tick().await;
                    }
                }
            }
        });

        info!(period_secs = self.period.as_secs_f64(), "Scheduler started");
        *running = Some(LoopHandle { shutdown, task });
    }

    /// Stop the loop after any in-flight tick and close the signal channel
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(handle) = running {
            let _ = handle.shutdown.send(());
            if let Err(e) = handle.task.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }

        self.signal_tx.close();
        self.state.send_replace(SchedulerState::Stopped);
        info!("Scheduler stopped");
    }
}
