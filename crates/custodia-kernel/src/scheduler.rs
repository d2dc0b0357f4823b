//! Periodic task scheduler.
//!
//! The scheduler owns a set of named periodic jobs. Each job is driven by its
//! own tokio timer loop; every tick launches one run of the job unless the
//! previous run of the same job is still in flight, in which case the tick is
//! skipped and counted.
//!
//! # Lifecycle
//!
//! ```text
//! new() --> schedule_periodic()* --> start() --> ... --> shutdown()
//! ```
//!
//! Jobs registered before [`Scheduler::start`] begin ticking when it is
//! called; jobs registered afterwards begin immediately. After
//! [`Scheduler::shutdown`] every timer loop is aborted and new registrations
//! are rejected. A run already executing at shutdown is allowed to finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::error::{KernelError, Result};
use crate::guard::InFlight;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique, time-ordered task identifier (UUID v7).
pub type TaskId = Uuid;

/// The async job the scheduler runs on every tick.
///
/// The job is called once per run and must return a fresh future each time.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Lifecycle state of a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Registered, waiting for its next tick.
    Scheduled,
    /// A run is executing right now.
    Running,
    /// Cancelled or stopped by shutdown. Will not run again.
    Cancelled,
}

/// Metadata snapshot of a task visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub interval: Duration,
    pub initial_delay: Duration,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Completed runs, successful or not.
    pub run_count: u64,
    /// Ticks skipped because a run was still in flight.
    pub skip_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

/// Internal per-task state that is not part of the public snapshot.
struct TaskEntry {
    job: JobFn,
    in_flight: Arc<InFlight>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Periodic job scheduler with per-job reentrancy protection.
///
/// The scheduler is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    /// Authoritative task metadata.
    tasks: DashMap<TaskId, TaskInfo>,

    /// Jobs and their in-flight flags.
    entries: DashMap<TaskId, TaskEntry>,

    /// Timer loop handles, present once a task has started ticking.
    loops: DashMap<TaskId, JoinHandle<()>>,

    /// Set by [`Scheduler::start`].
    started: AtomicBool,

    /// When `true` the scheduler will not accept new work.
    shutdown: AtomicBool,
}

impl Scheduler {
    /// Create a new scheduler **without** starting any timers.
    ///
    /// Call [`Scheduler::start`] to begin ticking.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: DashMap::new(),
                entries: DashMap::new(),
                loops: DashMap::new(),
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Begin ticking every registered task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::SchedulerShutdown);
        }
        self.inner.started.store(true, Ordering::Release);

        let ids: Vec<TaskId> = self.inner.tasks.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.spawn_loop(id);
        }
        tracing::info!(tasks = self.inner.tasks.len(), "scheduler started");
        Ok(())
    }

    /// Register a job that runs every `interval`, first after `initial_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidInterval`] for a zero interval and
    /// [`KernelError::SchedulerShutdown`] after shutdown.
    pub fn schedule_periodic(
        &self,
        name: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        job: JobFn,
    ) -> Result<TaskId> {
        let name = name.into();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::SchedulerShutdown);
        }
        if interval.is_zero() {
            return Err(KernelError::InvalidInterval { name });
        }

        let id = Uuid::now_v7();
        let info = TaskInfo {
            id,
            name: name.clone(),
            status: TaskStatus::Scheduled,
            interval,
            initial_delay,
            created_at: Utc::now(),
            last_run_at: None,
            run_count: 0,
            skip_count: 0,
            failure_count: 0,
            last_error: None,
        };
        self.inner.tasks.insert(id, info);
        self.inner.entries.insert(
            id,
            TaskEntry {
                job,
                in_flight: Arc::new(InFlight::new()),
            },
        );

        tracing::debug!(task_id = %id, task_name = %name, ?interval, ?initial_delay, "periodic task registered");

        if self.inner.started.load(Ordering::Acquire) {
            self.spawn_loop(id);
        }
        Ok(id)
    }

    /// Run a task once, outside its timer.
    ///
    /// Returns `Ok(false)` when the run was skipped because a previous run is
    /// still in flight.
    pub fn trigger(&self, task_id: TaskId) -> Result<bool> {
        let status = self.status(task_id)?.status;
        if status == TaskStatus::Cancelled {
            return Err(KernelError::InvalidTaskState {
                task_id,
                reason: "cannot trigger a cancelled task".into(),
            });
        }
        Ok(Self::fire(&self.inner, task_id))
    }

    /// Stop a task's timer. A run already executing is allowed to finish.
    pub fn cancel(&self, task_id: TaskId) -> Result<()> {
        {
            let mut entry = self
                .inner
                .tasks
                .get_mut(&task_id)
                .ok_or(KernelError::TaskNotFound { task_id })?;

            if entry.status == TaskStatus::Cancelled {
                return Err(KernelError::InvalidTaskState {
                    task_id,
                    reason: "task already cancelled".into(),
                });
            }
            entry.status = TaskStatus::Cancelled;
        }

        if let Some((_, handle)) = self.inner.loops.remove(&task_id) {
            handle.abort();
        }
        tracing::info!(task_id = %task_id, "task cancelled");
        Ok(())
    }

    /// Query the current status of a task.
    pub fn status(&self, task_id: TaskId) -> Result<TaskInfo> {
        self.inner
            .tasks
            .get(&task_id)
            .map(|entry| entry.clone())
            .ok_or(KernelError::TaskNotFound { task_id })
    }

    /// Return a snapshot of all known tasks keyed by their ID.
    pub fn all_tasks(&self) -> HashMap<TaskId, TaskInfo> {
        self.inner
            .tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop every timer and reject new registrations.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);

        let ids: Vec<TaskId> = self.inner.loops.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.inner.loops.remove(&id) {
                handle.abort();
            }
        }
        for mut entry in self.inner.tasks.iter_mut() {
            entry.status = TaskStatus::Cancelled;
        }
    }

    // -- Private helpers ----------------------------------------------------

    fn spawn_loop(&self, id: TaskId) {
        let Some((interval, initial_delay)) = self
            .inner
            .tasks
            .get(&id)
            .filter(|info| info.status != TaskStatus::Cancelled)
            .map(|info| (info.interval, info.initial_delay))
        else {
            return;
        };

        if let dashmap::mapref::entry::Entry::Vacant(slot) = self.inner.loops.entry(id) {
            let inner = Arc::clone(&self.inner);
            slot.insert(tokio::spawn(async move {
                Self::timer_loop(inner, id, interval, initial_delay).await;
            }));
        }
    }

    /// Tick forever, launching one run per tick.
    async fn timer_loop(
        inner: Arc<SchedulerInner>,
        id: TaskId,
        interval: Duration,
        initial_delay: Duration,
    ) {
        if !initial_delay.is_zero() {
            tokio::time::sleep(initial_delay).await;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            let cancelled = inner
                .tasks
                .get(&id)
                .map(|info| info.status == TaskStatus::Cancelled)
                .unwrap_or(true);
            if cancelled {
                break;
            }
            Self::fire(&inner, id);
        }
        tracing::debug!(task_id = %id, "timer loop exited");
    }

    /// Launch one run of `id` unless a run is already in flight.
    fn fire(inner: &Arc<SchedulerInner>, id: TaskId) -> bool {
        let claimed = inner
            .entries
            .get(&id)
            .and_then(|entry| {
                entry
                    .in_flight
                    .try_enter_owned()
                    .map(|guard| (Arc::clone(&entry.job), guard))
            });

        let Some((job, guard)) = claimed else {
            if let Some(mut info) = inner.tasks.get_mut(&id) {
                info.skip_count += 1;
                tracing::debug!(task_id = %id, task_name = %info.name, "previous run still in flight; tick skipped");
            }
            return false;
        };

        if let Some(mut info) = inner.tasks.get_mut(&id) {
            if info.status == TaskStatus::Scheduled {
                info.status = TaskStatus::Running;
            }
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _guard = guard;
            let result = job().await;

            if let Some(mut info) = inner.tasks.get_mut(&id) {
                info.run_count += 1;
                info.last_run_at = Some(Utc::now());
                if info.status == TaskStatus::Running {
                    info.status = TaskStatus::Scheduled;
                }
                match result {
                    Ok(()) => {
                        info.last_error = None;
                        tracing::debug!(task_id = %id, task_name = %info.name, "periodic run completed");
                    }
                    Err(err) => {
                        info.failure_count += 1;
                        tracing::error!(task_id = %id, task_name = %info.name, error = %err, "periodic run failed");
                        info.last_error = Some(err);
                    }
                }
            }
        });
        true
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap an async closure as a [`JobFn`].
pub fn job<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_job(counter: &Arc<AtomicU32>) -> JobFn {
        let c = Arc::clone(counter);
        job(move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_runs_repeatedly() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let id = scheduler
            .schedule_periodic("tick", Duration::from_secs(10), Duration::ZERO, counting_job(&counter))
            .expect("schedule should succeed");

        scheduler.start().expect("start");
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert!(counter.load(Ordering::SeqCst) >= 3);
        let info = scheduler.status(id).expect("task should exist");
        assert!(info.run_count >= 3);
        assert!(info.last_run_at.is_some());

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_runs_before_start() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule_periodic("idle", Duration::from_secs(1), Duration::ZERO, counting_job(&counter))
            .expect("schedule");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_is_honoured() {
        let scheduler = Scheduler::new();
        scheduler.start().expect("start");
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule_periodic(
                "delayed",
                Duration::from_secs(3600),
                Duration::from_secs(5),
                counting_job(&counter),
            )
            .expect("schedule");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped() {
        let scheduler = Scheduler::new();
        let started = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&started);
        let slow = job(move || {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
                Ok(())
            }
        });

        let id = scheduler
            .schedule_periodic("slow", Duration::from_secs(10), Duration::ZERO, slow)
            .expect("schedule");
        scheduler.start().expect("start");
        tokio::time::sleep(Duration::from_secs(22)).await;

        // Runs at t=0 only; ticks at t=10 and t=20 were skipped.
        assert_eq!(started.load(Ordering::SeqCst), 1);
        let info = scheduler.status(id).expect("task");
        assert_eq!(info.status, TaskStatus::Running);
        assert!(info.skip_count >= 2);

        scheduler.shutdown();
    }

    #[tokio::test]
    async fn trigger_reports_skip_while_in_flight() {
        let scheduler = Scheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));
        let blocking = job(move || {
            let rx = Arc::clone(&rx);
            async move {
                let pending = rx.lock().await.take();
                if let Some(pending) = pending {
                    let _ = pending.await;
                }
                Ok(())
            }
        });

        let id = scheduler
            .schedule_periodic("manual", Duration::from_secs(3600), Duration::from_secs(3600), blocking)
            .expect("schedule");

        assert!(scheduler.trigger(id).expect("trigger"));
        assert!(!scheduler.trigger(id).expect("trigger"));
        assert_eq!(scheduler.status(id).expect("task").skip_count, 1);

        tx.send(()).expect("release job");
        for _ in 0..100 {
            if scheduler.status(id).expect("task").run_count == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status(id).expect("task").run_count, 1);
        assert!(scheduler.trigger(id).expect("trigger"));
    }

    #[tokio::test]
    async fn failure_is_recorded() {
        let scheduler = Scheduler::new();
        let id = scheduler
            .schedule_periodic(
                "fail-task",
                Duration::from_secs(3600),
                Duration::ZERO,
                job(|| async { Err("boom".to_string()) }),
            )
            .expect("schedule");

        scheduler.trigger(id).expect("trigger");
        for _ in 0..100 {
            if scheduler.status(id).expect("task").failure_count == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let info = scheduler.status(id).expect("task should exist");
        assert_eq!(info.failure_count, 1);
        assert_eq!(info.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_runs() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let id = scheduler
            .schedule_periodic("cancel-me", Duration::from_secs(10), Duration::from_secs(60), counting_job(&counter))
            .expect("schedule");
        scheduler.start().expect("start");

        scheduler.cancel(id).expect("cancel should succeed");
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.status(id).expect("task").status, TaskStatus::Cancelled);
        assert!(matches!(
            scheduler.cancel(id),
            Err(KernelError::InvalidTaskState { .. })
        ));
        assert!(scheduler.trigger(id).is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let scheduler = Scheduler::new();
        let result = scheduler.schedule_periodic(
            "bad",
            Duration::ZERO,
            Duration::ZERO,
            job(|| async { Ok(()) }),
        );
        assert!(matches!(result, Err(KernelError::InvalidInterval { .. })));
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let scheduler = Scheduler::new();
        scheduler.shutdown();

        let result = scheduler.schedule_periodic(
            "late-task",
            Duration::from_secs(1),
            Duration::ZERO,
            job(|| async { Ok(()) }),
        );
        assert!(matches!(result, Err(KernelError::SchedulerShutdown)));
        assert!(scheduler.is_shut_down());
    }
}
