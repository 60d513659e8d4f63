use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::error::{Error, Result};
use crate::interfaces::Clock;
use crate::observability::metrics::SCHEDULER_RUNNING;
use crate::tracking::orchestrator::BatchOrchestrator;
use crate::types::{RunSummary, RunTrigger};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub interval_secs: Option<f64>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_summary: Option<RunSummary>,
    pub cycles_completed: u64,
    pub last_error: Option<String>,
}

/// Threshold and batch cap handed to every scheduled cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleParams {
    pub stale_after: Duration,
    pub max_batch_size: usize,
}

struct LoopState {
    state: SchedulerState,
    interval: Option<Duration>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_summary: Option<RunSummary>,
    cycles_completed: u64,
    last_error: Option<String>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl LoopState {
    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state,
            interval_secs: self.interval.map(|i| i.as_secs_f64()),
            next_run_at: self.next_run_at,
            last_run_summary: self.last_run_summary.clone(),
            cycles_completed: self.cycles_completed,
            last_error: self.last_error.clone(),
        }
    }
}

/// Background loop running the orchestrator on a fixed interval.
///
/// All lifecycle transitions happen under one mutex, so at most one loop task exists.
pub struct SchedulerLoop {
    orchestrator: Arc<BatchOrchestrator>,
    clock: Arc<dyn Clock>,
    params: CycleParams,
    inner: Arc<Mutex<LoopState>>,
}

impl SchedulerLoop {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        clock: Arc<dyn Clock>,
        params: CycleParams,
    ) -> Self {
        SchedulerLoop {
            orchestrator,
            clock,
            params,
            inner: Arc::new(Mutex::new(LoopState {
                state: SchedulerState::Stopped,
                interval: None,
                next_run_at: None,
                last_run_summary: None,
                cycles_completed: 0,
                last_error: None,
                stop_tx: None,
                handle: None,
            })),
        }
    }

    /// Starts the loop unless one is already starting, running or stopping.
    /// The first cycle runs immediately.
    pub fn start(&self, interval: Duration) -> Result<SchedulerStatus> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument("scheduler interval must be positive".into()));
        }
        let step = chrono::Duration::from_std(interval)
            .ok()
            .filter(|step| self.clock.now().checked_add_signed(*step).is_some())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("scheduler interval {:?} is out of range", interval))
            })?;

        let mut inner = lock(&self.inner);
        if inner.state != SchedulerState::Stopped {
            info!(state = ?inner.state, "Scheduler already active; start ignored");
            return Ok(inner.status());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        inner.state = SchedulerState::Starting;
        inner.interval = Some(interval);
        inner.next_run_at = Some(self.clock.now());
        inner.stop_tx = Some(stop_tx);
        inner.handle = Some(tokio::spawn(run_loop(
            self.orchestrator.clone(),
            self.clock.clone(),
            self.params,
            interval,
            step,
            self.inner.clone(),
            stop_rx,
        )));

        info!(interval_secs = interval.as_secs_f64(), "Scheduler started");
        Ok(inner.status())
    }

    /// Requests a stop and waits for the loop to exit. An in-flight cycle is allowed to finish.
    ///
    /// The loop task itself moves the state to `Stopped`, so dropping this future early
    /// still leaves the scheduler restartable once the cycle completes.
    pub async fn stop(&self) -> SchedulerStatus {
        let handle = {
            let mut inner = lock(&self.inner);
            match inner.state {
                SchedulerState::Stopped | SchedulerState::Stopping => return inner.status(),
                SchedulerState::Starting | SchedulerState::Running => {}
            }
            inner.state = SchedulerState::Stopping;
            if let Some(stop_tx) = inner.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            inner.handle.take()
        };

        info!("Scheduler stopping");
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler loop ended abnormally: {}", e);
                mark_stopped(&mut lock(&self.inner));
            }
        }

        let inner = lock(&self.inner);
        info!(cycles = inner.cycles_completed, "Scheduler stopped");
        inner.status()
    }

    pub fn status(&self) -> SchedulerStatus {
        lock(&self.inner).status()
    }
}

fn lock(inner: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_loop(
    orchestrator: Arc<BatchOrchestrator>,
    clock: Arc<dyn Clock>,
    params: CycleParams,
    interval: Duration,
    step: chrono::Duration,
    inner: Arc<Mutex<LoopState>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    {
        let mut state = lock(&inner);
        if state.state == SchedulerState::Starting {
            state.state = SchedulerState::Running;
        }
    }
    SCHEDULER_RUNNING.set(1);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        // A panic inside the cycle surfaces as a JoinError instead of killing the loop.
        let orch = orchestrator.clone();
        let outcome = tokio::spawn(async move {
            orch.run_cycle(RunTrigger::Scheduled, params.stale_after, params.max_batch_size)
                .await
        })
        .await;

        let mut fatal = false;
        {
            let mut state = lock(&inner);
            state.cycles_completed += 1;
            match outcome {
                Ok(Ok(summary)) => {
                    state.last_run_summary = Some(summary);
                    state.last_error = None;
                }
                Ok(Err(err)) => {
                    fatal = matches!(err, Error::NoActiveSources);
                    warn!("Scheduled cycle failed: {}", err);
                    state.last_error = Some(err.to_string());
                }
                Err(join_err) => {
                    error!("Scheduled cycle panicked: {}", join_err);
                    state.last_error = Some(format!("cycle panicked: {}", join_err));
                }
            }
            if !fatal {
                state.next_run_at = clock.now().checked_add_signed(step);
            }
        }

        if fatal {
            error!("No usable price source left; scheduler stopping itself");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => break,
        }
    }

    mark_stopped(&mut lock(&inner));
}

fn mark_stopped(state: &mut LoopState) {
    state.state = SchedulerState::Stopped;
    state.stop_tx = None;
    state.handle = None;
    state.next_run_at = None;
    SCHEDULER_RUNNING.set(0);
}
