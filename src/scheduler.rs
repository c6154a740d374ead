//! Job scheduler for one-shot, recurring, and absolute-time work.
//!
//! Every job runs in its own task and is independently timed. A one-shot
//! job fires exactly once and removes itself; a recurring job fires at
//! `due`, `due + period`, `due + 2·period`, … with drift tolerated and
//! missed fires skipped rather than coalesced. Jobs honor the root
//! cancellation token, so daemon shutdown unwinds the whole schedule.
//!
//! Cancellation is immediate with respect to future fires; a fire already
//! in flight runs to completion. Callback panics are caught, logged with
//! the job id, and do not cancel a recurring job.

use dashmap::DashMap;
use futures_util::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobHandle {
    token: CancellationToken,
    pause: watch::Sender<bool>,
}

/// Process-wide scheduler. Cheap to share via `Arc`.
pub struct Scheduler {
    jobs: Arc<DashMap<Uuid, JobHandle>>,
    root: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler whose jobs are children of `root`.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            root,
        }
    }

    /// Run `cb` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_once_async(delay, move || {
            cb();
            async {}
        })
    }

    /// Run `cb` once at the given UTC instant. A time in the past fires
    /// immediately.
    pub fn schedule_once_at<F>(&self, at: chrono::DateTime<chrono::Utc>, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        let delay = (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.schedule_once(delay, cb)
    }

    /// Run `cb` every `period`, first at `due`.
    pub fn schedule_recurring<F>(&self, due: Duration, period: Duration, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_recurring_async(due, period, move || {
            cb();
            async {}
        })
    }

    /// Async variant of [`schedule_once`](Self::schedule_once).
    pub fn schedule_once_async<F, Fut>(&self, delay: Duration, cb: F) -> Uuid
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: JobFn = Arc::new(move || Box::pin(cb()) as JobFuture);
        self.spawn_job(delay, None, job)
    }

    /// Async variant of [`schedule_once_at`](Self::schedule_once_at).
    pub fn schedule_once_at_async<F, Fut>(
        &self,
        at: chrono::DateTime<chrono::Utc>,
        cb: F,
    ) -> Uuid
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.schedule_once_async(delay, cb)
    }

    /// Async variant of [`schedule_recurring`](Self::schedule_recurring).
    pub fn schedule_recurring_async<F, Fut>(&self, due: Duration, period: Duration, cb: F) -> Uuid
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: JobFn = Arc::new(move || Box::pin(cb()) as JobFuture);
        self.spawn_job(due, Some(period), job)
    }

    /// Stop delivering a job's fires until [`resume`](Self::resume).
    /// Returns whether the job exists.
    pub fn pause(&self, id: Uuid) -> bool {
        match self.jobs.get(&id) {
            Some(handle) => {
                let _ = handle.pause.send(true);
                true
            }
            None => false,
        }
    }

    /// Resume a paused job. Returns whether the job exists.
    pub fn resume(&self, id: Uuid) -> bool {
        match self.jobs.get(&id) {
            Some(handle) => {
                let _ = handle.pause.send(false);
                true
            }
            None => false,
        }
    }

    /// Cancel a job. Idempotent: cancelling an unknown or already-cancelled
    /// id returns `false`. A fire in flight completes; no further fires
    /// begin after this returns.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.jobs.remove(&id) {
            Some((_, handle)) => {
                handle.token.cancel();
                debug!(job = %id, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every known job.
    pub fn cancel_all(&self) {
        let ids: Vec<Uuid> = self.jobs.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }

    /// Ids of all live jobs.
    pub fn list_ids(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }

    fn spawn_job(&self, due: Duration, period: Option<Duration>, job: JobFn) -> Uuid {
        let id = Uuid::new_v4();
        let token = self.root.child_token();
        let (pause_tx, pause_rx) = watch::channel(false);

        self.jobs.insert(
            id,
            JobHandle {
                token: token.clone(),
                pause: pause_tx,
            },
        );

        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            match period {
                None => {
                    run_one_shot(id, due, job, token, pause_rx).await;
                }
                Some(period) => {
                    run_recurring(id, due, period, job, token, pause_rx).await;
                }
            }
            jobs.remove(&id);
        });

        id
    }
}

async fn run_one_shot(
    id: Uuid,
    due: Duration,
    job: JobFn,
    token: CancellationToken,
    mut pause_rx: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(due) => {}
    }
    if !wait_unpaused(&mut pause_rx, &token).await {
        return;
    }
    fire(id, &job).await;
}

async fn run_recurring(
    id: Uuid,
    due: Duration,
    period: Duration,
    job: JobFn,
    token: CancellationToken,
    mut pause_rx: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + due;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {}
        }
        if !wait_unpaused(&mut pause_rx, &token).await {
            return;
        }
        // The fire itself is not raced against the token: an in-flight
        // callback always runs to completion.
        fire(id, &job).await;
    }
}

/// Block until the job is unpaused. Returns `false` if cancelled while
/// waiting.
async fn wait_unpaused(rx: &mut watch::Receiver<bool>, token: &CancellationToken) -> bool {
    loop {
        if !*rx.borrow() {
            return true;
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            changed = rx.changed() => {
                if changed.is_err() {
                    // Handle dropped; nothing can unpause us anymore.
                    return true;
                }
            }
        }
    }
}

async fn fire(id: Uuid, job: &JobFn) {
    let fut = job();
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!(job = %id, "scheduled job panicked");
    }
}

/// Scheduler facade handed to plugins. Tracks the jobs created through it
/// so `cancel_all` unwinds only that plugin's jobs.
pub struct PluginScheduler {
    inner: Arc<Scheduler>,
    owned: Mutex<HashSet<Uuid>>,
}

impl PluginScheduler {
    pub fn new(inner: Arc<Scheduler>) -> Self {
        Self {
            inner,
            owned: Mutex::new(HashSet::new()),
        }
    }

    fn track(&self, id: Uuid) -> Uuid {
        self.owned.lock().expect("plugin job set poisoned").insert(id);
        id
    }

    pub fn schedule_once<F>(&self, delay: Duration, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track(self.inner.schedule_once(delay, cb))
    }

    pub fn schedule_once_at<F>(&self, at: chrono::DateTime<chrono::Utc>, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track(self.inner.schedule_once_at(at, cb))
    }

    pub fn schedule_recurring<F>(&self, due: Duration, period: Duration, cb: F) -> Uuid
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track(self.inner.schedule_recurring(due, period, cb))
    }

    pub fn schedule_recurring_async<F, Fut>(&self, due: Duration, period: Duration, cb: F) -> Uuid
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.track(self.inner.schedule_recurring_async(due, period, cb))
    }

    pub fn pause(&self, id: Uuid) -> bool {
        self.inner.pause(id)
    }

    pub fn resume(&self, id: Uuid) -> bool {
        self.inner.resume(id)
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.owned.lock().expect("plugin job set poisoned").remove(&id);
        self.inner.cancel(id)
    }

    /// Cancel only the jobs created through this facade.
    pub fn cancel_all(&self) {
        let ids: Vec<Uuid> = self
            .owned
            .lock()
            .expect("plugin job set poisoned")
            .drain()
            .collect();
        for id in ids {
            self.inner.cancel(id);
        }
    }

    pub fn list_ids(&self) -> Vec<Uuid> {
        self.owned
            .lock()
            .expect("plugin job set poisoned")
            .iter()
            .copied()
            .collect()
    }
}
