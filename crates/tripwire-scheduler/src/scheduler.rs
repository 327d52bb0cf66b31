//! Interval scheduler with per-job mutual exclusion.
//!
//! Every registered job gets its own timer task. A tick never waits for the
//! previous invocation: it spawns a new one, and that invocation is skipped
//! when the same job id is still running. Errors and panics inside a job are
//! caught and logged with the job id so one bad job cannot stop the others.
//!
//! On shutdown, jobs that consume an endless stream are dropped at once;
//! other jobs get a grace period and are aborted when it runs out.

use async_trait::async_trait;
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use tripwire_core::Result;

/// A unit of periodic work.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Identifier used for mutual exclusion and logging.
    fn id(&self) -> &str;

    async fn run(&self) -> Result<()>;

    /// Whether a running invocation is dropped as soon as shutdown starts
    /// instead of being waited for.
    fn stops_on_shutdown(&self) -> bool {
        false
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Completed,
    /// The job returned an error.
    Failed(String),
    /// The job panicked.
    Crashed(String),
    /// Another invocation of the same job id was still running.
    Skipped,
    /// The invocation was stopped by shutdown before finishing.
    Cancelled,
}

/// Job ids currently running, with the task running each one.
#[derive(Default)]
struct RunningSet {
    ids: Mutex<HashMap<String, Option<AbortHandle>>>,
}

impl RunningSet {
    fn claim(self: &Arc<Self>, id: &str) -> Option<RunningGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if ids.contains_key(id) {
            return None;
        }
        ids.insert(id.to_string(), None);
        Some(RunningGuard {
            set: self.clone(),
            id: id.to_string(),
        })
    }

    /// Remember the task of a claimed id. No-op once the claim is released.
    fn attach(&self, id: &str, handle: AbortHandle) {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = ids.get_mut(id) {
            *slot = Some(handle);
        }
    }

    fn abort_all(&self) {
        let ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        for (id, handle) in ids.iter() {
            if let Some(handle) = handle {
                warn!(job = %id, "Aborting job");
                handle.abort();
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Releases a job id when the invocation ends, however it ends.
struct RunningGuard {
    set: Arc<RunningSet>,
    id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut ids = self.set.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.id);
    }
}

/// Periodic job runner.
pub struct Scheduler {
    running: Arc<RunningSet>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            running: Arc::new(RunningSet::default()),
            timers: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Register `job` to fire every `period`, first firing one period from now.
    ///
    /// Registering an id that already has a timer replaces that timer.
    pub fn add_job(&self, job: Arc<dyn ScheduledJob>, period: Duration) {
        let id = job.id().to_string();
        let running = self.running.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let invocations = self.shutdown_tx.subscribe();

        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let running = running.clone();
                            let job = job.clone();
                            let stop = invocations.clone();
                            tokio::spawn(async move {
                                invoke(running, job, stop).await;
                            });
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                debug!(job = %id, "Timer stopped");
                                break;
                            }
                        }
                    }
                }
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(id.clone(), handle) {
            previous.abort();
            info!(job = %id, "Replaced existing timer");
        }
        info!(job = %id, period_secs = period.as_secs(), "Job scheduled");
    }

    /// Stop the timer of `job_id`. A running invocation is left to finish.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(job_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Ids with a registered timer, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = timers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains(job_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Run `job` once right now, honouring mutual exclusion.
    pub async fn run_now(&self, job: Arc<dyn ScheduledJob>) -> Invocation {
        invoke(self.running.clone(), job, self.shutdown_tx.subscribe()).await
    }

    /// Stop all timers and wait up to `grace` for running invocations.
    ///
    /// Invocations still running after `grace` are aborted. Returns `true`
    /// when everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let timers: Vec<(String, JoinHandle<()>)> = {
            let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.drain().collect()
        };
        for (id, handle) in timers {
            handle.abort();
            debug!(job = %id, "Timer removed");
        }

        let deadline = Instant::now() + grace;
        while self.running.len() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    running = self.running.len(),
                    "Shutdown grace period elapsed with jobs still running"
                );
                self.running.abort_all();
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Scheduler stopped");
        true
    }
}

async fn invoke(
    running: Arc<RunningSet>,
    job: Arc<dyn ScheduledJob>,
    mut shutdown: watch::Receiver<bool>,
) -> Invocation {
    let id = job.id().to_string();

    let Some(guard) = running.claim(&id) else {
        debug!(job = %id, "Previous invocation still running, skipping");
        return Invocation::Skipped;
    };

    let stops_on_shutdown = job.stops_on_shutdown();
    let task = tokio::spawn(
        async move {
            let _guard = guard;
            if !stops_on_shutdown {
                return Some(job.run().await);
            }
            tokio::select! {
                result = job.run() => Some(result),
                true = stop_requested(&mut shutdown) => None,
            }
        }
        .instrument(info_span!("job", job = %id)),
    );
    running.attach(&id, task.abort_handle());

    match task.await {
        Ok(Some(Ok(()))) => {
            debug!(job = %id, "Job completed");
            Invocation::Completed
        }
        Ok(Some(Err(e))) => {
            error!(job = %id, error = %e, detail = ?e, "Job failed");
            Invocation::Failed(e.to_string())
        }
        Ok(None) => {
            info!(job = %id, "Job stopped for shutdown");
            Invocation::Cancelled
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(job = %id, panic = %message, "Job crashed");
            Invocation::Crashed(message)
        }
        Err(_) => {
            warn!(job = %id, "Job cancelled");
            Invocation::Cancelled
        }
    }
}

/// Resolves to `true` once shutdown starts, `false` if the scheduler is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) -> bool {
    shutdown.wait_for(|stop| *stop).await.is_ok()
}

/// Route panics through `tracing` with a captured backtrace.
///
/// Job tasks run inside a `job` span, so a panic inside one is logged with
/// the job id. Installing more than once has no effect.
pub fn install_panic_logging() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let backtrace = Backtrace::force_capture();
            error!(panic = %info, backtrace = %backtrace, "Panic");
        }));
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
