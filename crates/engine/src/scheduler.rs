//! Fire-and-forget execution of deferred tasks.
//!
//! [`Scheduler::schedule`] pushes onto a FIFO queue and returns. A single
//! supervisor task pops the queue and spawns every task into a `JoinSet`, so
//! work always runs on another tokio task, after the caller has moved on.
//!
//! Each task runs inside a recovery boundary: an `Err`, a panic, or a timeout is
//! logged with the task's label, counted, and dropped. Nothing is retried.
//!
//! By default the queue is unbounded and concurrency is unlimited. Operators can
//! opt into a bounded queue (with an [`OverflowPolicy`]), a concurrency cap and a
//! per-task timeout through [`SchedulerConfig`].
//!
//! # Shutdown
//!
//! [`Scheduler::shutdown`] stops accepting tasks, lets the supervisor start
//! everything still queued, and waits up to `drain_timeout` for in-flight tasks.
//! Whatever is still running after the deadline is aborted and reported in the
//! returned [`DrainReport`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Notify, OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use atrium_common::config::{OverflowPolicy, SchedulerSettings};

use crate::task::{DeferredTask, TaskLabel};

/// Default time shutdown waits for in-flight tasks.
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Scheduler limits. The default is the unbounded, untimed behavior.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub max_concurrency: Option<usize>,
    pub task_timeout: Option<Duration>,
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            overflow_policy: OverflowPolicy::DropNewest,
            max_concurrency: None,
            task_timeout: None,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Bound the pending queue. Zero is treated as one.
    pub fn with_queue_capacity(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self.overflow_policy = policy;
        self
    }

    /// Cap the number of tasks running at once. Zero is treated as one.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.map(|c| c.max(1)),
            overflow_policy: settings.overflow_policy,
            max_concurrency: settings.max_concurrency.map(|c| c.max(1)),
            task_timeout: settings.task_timeout_ms.map(Duration::from_millis),
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
        }
    }
}

/// Point-in-time counters, exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted by `schedule` (including ones later dropped on overflow)
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    /// Tasks discarded by the overflow policy
    pub dropped: u64,
    /// Tasks refused because the scheduler was shut down
    pub rejected: u64,
    /// Tasks currently running
    pub in_flight: u64,
    /// Tasks waiting to start
    pub queued: u64,
}

impl SchedulerStats {
    /// Tasks that ran to an outcome, successful or not.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.panicked + self.timed_out
    }
}

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Every task finished before the drain deadline
    pub drained: bool,
    /// Tasks aborted or never started because the deadline passed
    pub abandoned: u64,
    pub stats: SchedulerStats,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicU64,
}

struct Shared {
    config: SchedulerConfig,
    queue: Mutex<VecDeque<DeferredTask>>,
    wake: Notify,
    /// Flipped only while holding the queue lock.
    accepting: AtomicBool,
    counters: Counters,
    /// Outcome of the one drain, shared by every `shutdown` caller.
    drain_report: OnceCell<DrainReport>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<DeferredTask>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the process-wide deferred task executor.
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Start the supervisor. Must be called from within a tokio runtime.
    pub fn start(config: SchedulerConfig) -> Self {
        info!(
            queue_capacity = ?config.queue_capacity,
            overflow_policy = ?config.overflow_policy,
            max_concurrency = ?config.max_concurrency,
            task_timeout_ms = ?config.task_timeout.map(|t| t.as_millis() as u64),
            "Deferred task scheduler started"
        );

        let shared = Arc::new(Shared {
            config,
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            accepting: AtomicBool::new(true),
            counters: Counters::default(),
            drain_report: OnceCell::new(),
        });
        let handle = tokio::spawn(supervise(shared.clone()));

        Self {
            shared,
            supervisor: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Hand a task to the scheduler and return immediately.
    ///
    /// Never blocks and never fails from the caller's point of view. The task
    /// is dropped (with a warning) if the scheduler is shut down, or if a
    /// bounded queue is full under [`OverflowPolicy::DropNewest`].
    pub fn schedule(&self, task: DeferredTask) {
        let counters = &self.shared.counters;
        let mut queue = self.shared.queue();

        if !self.shared.accepting.load(Ordering::Acquire) {
            drop(queue);
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            log_discarded(task.label(), "Deferred task rejected: scheduler is shut down");
            return;
        }

        counters.submitted.fetch_add(1, Ordering::Relaxed);

        if let Some(capacity) = self.shared.config.queue_capacity
            && queue.len() >= capacity
        {
            let evicted = match self.shared.config.overflow_policy {
                OverflowPolicy::DropNewest => Some(task),
                OverflowPolicy::DropOldest => {
                    let oldest = queue.pop_front();
                    queue.push_back(task);
                    oldest
                }
            };
            drop(queue);
            if let Some(evicted) = evicted {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                log_discarded(evicted.label(), "Deferred task dropped: queue is full");
            }
            self.shared.wake.notify_one();
            return;
        }

        queue.push_back(task);
        drop(queue);
        self.shared.wake.notify_one();
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            queued: self.shared.queue().len() as u64,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting tasks and drain what is already queued or running.
    ///
    /// The drain happens once. Callers that arrive while it is in progress wait
    /// for it, and every caller gets the same report.
    pub async fn shutdown(&self) -> DrainReport {
        *self.shared.drain_report.get_or_init(|| self.drain_once()).await
    }

    async fn drain_once(&self) -> DrainReport {
        {
            let _queue = self.shared.queue();
            self.shared.accepting.store(false, Ordering::Release);
        }
        self.shared.wake.notify_one();

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return DrainReport {
                drained: true,
                abandoned: 0,
                stats: self.stats(),
            };
        };

        let timeout = self.shared.config.drain_timeout;
        let drained = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                // Dropping the supervisor's JoinSet aborts every task in it.
                handle.abort();
                let _ = handle.await;
                false
            }
        };

        let never_started = self.shared.queue().drain(..).count() as u64;
        // Aborted tasks never reach their own decrement.
        let aborted = if drained {
            0
        } else {
            self.shared.counters.in_flight.swap(0, Ordering::Relaxed)
        };
        let report = DrainReport {
            drained,
            abandoned: never_started + aborted,
            stats: self.stats(),
        };

        if drained {
            info!(
                finished = report.stats.finished(),
                "Deferred task scheduler drained"
            );
        } else {
            warn!(
                abandoned = report.abandoned,
                drain_timeout_secs = timeout.as_secs(),
                "Deferred task scheduler drain deadline reached, abandoning tasks"
            );
        }

        report
    }
}

/// Pop the queue and spawn tasks until shutdown empties it.
async fn supervise(shared: Arc<Shared>) {
    let semaphore = shared
        .config
        .max_concurrency
        .map(|limit| Arc::new(Semaphore::new(limit)));
    let mut running = JoinSet::new();

    loop {
        while let Some(result) = running.try_join_next() {
            reap(result);
        }

        // Take a permit before popping so that a concurrency cap leaves work in
        // the queue, where the capacity bound applies.
        let permit = match &semaphore {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        let next = shared.queue().pop_front();
        match next {
            Some(task) => {
                shared.counters.in_flight.fetch_add(1, Ordering::Relaxed);
                running.spawn(execute(task, shared.clone(), permit));
            }
            None => {
                drop(permit);
                if !shared.accepting.load(Ordering::Acquire) && shared.queue().is_empty() {
                    break;
                }
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    Some(result) = running.join_next(), if !running.is_empty() => reap(result),
                }
            }
        }
    }

    while let Some(result) = running.join_next().await {
        reap(result);
    }
    debug!("Deferred task supervisor exited");
}

fn reap(result: Result<(), JoinError>) {
    if let Err(err) = result
        && err.is_cancelled()
    {
        debug!("Deferred task cancelled");
    }
}

/// Run one task inside the recovery boundary.
async fn execute(task: DeferredTask, shared: Arc<Shared>, _permit: Option<OwnedSemaphorePermit>) {
    let (label, work) = task.into_parts();
    let started = Instant::now();
    let guarded = AssertUnwindSafe(work).catch_unwind();

    let outcome = match shared.config.task_timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => Outcome::from(result),
            Err(_) => Outcome::TimedOut(limit),
        },
        None => Outcome::from(guarded.await),
    };

    let counters = &shared.counters;
    let _ = counters
        .in_flight
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Outcome::Completed => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                task_id = %label.id,
                task = %label.name,
                event_id = ?label.event_id,
                recipient = ?label.recipient,
                elapsed_ms,
                "Deferred task completed"
            );
        }
        Outcome::Failed(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = %label.id,
                task = %label.name,
                event_id = ?label.event_id,
                event_kind = ?label.event_kind,
                recipient = ?label.recipient,
                elapsed_ms,
                error = %format!("{:#}", err),
                "Deferred task failed"
            );
        }
        Outcome::Panicked(message) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = %label.id,
                task = %label.name,
                event_id = ?label.event_id,
                event_kind = ?label.event_kind,
                recipient = ?label.recipient,
                elapsed_ms,
                panic = %message,
                "Deferred task panicked"
            );
        }
        Outcome::TimedOut(limit) => {
            counters.timed_out.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = %label.id,
                task = %label.name,
                event_id = ?label.event_id,
                event_kind = ?label.event_kind,
                recipient = ?label.recipient,
                timeout_ms = limit.as_millis() as u64,
                "Deferred task timed out"
            );
        }
    }
}

enum Outcome {
    Completed,
    Failed(anyhow::Error),
    Panicked(String),
    TimedOut(Duration),
}

impl From<Result<anyhow::Result<()>, Box<dyn Any + Send>>> for Outcome {
    fn from(result: Result<anyhow::Result<()>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(err)) => Outcome::Failed(err),
            Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_discarded(label: &TaskLabel, message: &'static str) {
    warn!(
        task_id = %label.id,
        task = %label.name,
        event_id = ?label.event_id,
        recipient = ?label.recipient,
        "{}",
        message
    );
}
