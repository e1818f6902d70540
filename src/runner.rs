//! Scheduler ticker loop.
//!
//! Owns the run/stop lifecycle and drives at most one task execution per
//! tick: ask the store for the next due task, run it through the executor,
//! apply the outcome (complete, reschedule, retry, or fail), persist, and
//! sleep until the next tick.
//!
//! Cancellation comes in through a [`CancellationToken`]; the hosting
//! process is responsible for translating OS signals into `stop()`. An
//! in-flight task is never aborted — the current task runs to completion
//! before the loop exits.

use crate::config::SchedulerConfig;
use crate::cron::CronExpr;
use crate::error::Result;
use crate::executor::{AgentLifecycle, DreamPipeline, TaskExecutor};
use crate::store::{ListFilter, TaskStatistics, TaskStore};
use crate::tasks::{Task, TaskKind, TaskPriority, TaskRunResult, TaskStatus};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot of the scheduler's state for callers of [`Scheduler::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether the ticker loop is running.
    pub running: bool,
    /// Ticks elapsed since start.
    pub tick_count: u64,
    /// Id of the task currently executing, if any.
    pub current_task: Option<String>,
    /// Tasks executed since start.
    pub tasks_executed: u64,
    /// Executions that succeeded (including skipped no-ops).
    pub tasks_succeeded: u64,
    /// Executions that failed.
    pub tasks_failed: u64,
    /// Store-wide task counts.
    pub store: TaskStatistics,
}

struct Core {
    config: SchedulerConfig,
    store: Arc<TaskStore>,
    executor: TaskExecutor,
    running: AtomicBool,
    tick_count: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    current_task: Mutex<Option<String>>,
}

/// Background task scheduler: persistent ticker over a durable task store.
pub struct Scheduler {
    core: Arc<Core>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler whose store lives at the configured state path
    /// (platform config dir by default).
    pub fn new(
        config: SchedulerConfig,
        pipeline: Arc<dyn DreamPipeline>,
        agents: Arc<dyn AgentLifecycle>,
    ) -> Result<Self> {
        let store = match config.state_path() {
            Some(path) => Arc::new(TaskStore::open(path)?),
            None => Arc::new(TaskStore::in_memory()),
        };
        Ok(Self::with_store(config, store, pipeline, agents))
    }

    /// Create a scheduler over an existing store (tests, embedding hosts).
    pub fn with_store(
        config: SchedulerConfig,
        store: Arc<TaskStore>,
        pipeline: Arc<dyn DreamPipeline>,
        agents: Arc<dyn AgentLifecycle>,
    ) -> Self {
        let executor = TaskExecutor::new(
            config.dreaming.clone(),
            config.custom.clone(),
            pipeline,
            agents,
        );
        Self {
            core: Arc::new(Core {
                config,
                store,
                executor,
                running: AtomicBool::new(false),
                tick_count: AtomicU64::new(0),
                tasks_executed: AtomicU64::new(0),
                tasks_succeeded: AtomicU64::new(0),
                tasks_failed: AtomicU64::new(0),
                current_task: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Pass an externally owned cancellation token; cancelling it stops
    /// the loop just like [`Scheduler::stop`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> Arc<TaskStore> {
        Arc::clone(&self.core.store)
    }

    /// Start the ticker loop. Returns `Ok(None)` (logged, not an error)
    /// when the loop is already running. The first start bootstraps the
    /// default recurring consolidation task.
    pub fn start(&self) -> Result<Option<JoinHandle<()>>> {
        if self.core.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, start ignored");
            return Ok(None);
        }

        if let Err(e) = self.ensure_default_task() {
            // No loop was spawned; leave the scheduler startable again.
            self.core.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let core = Arc::clone(&self.core);
        let cancel = self.cancel.clone();
        let interval = Duration::from_secs(core.config.ticker.tick_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            info!(
                "scheduler started, ticking every {}s",
                interval.as_secs()
            );
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                core.tick().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            core.running.store(false, Ordering::SeqCst);
            info!(
                "scheduler stopped after {} ticks",
                core.tick_count.load(Ordering::SeqCst)
            );
        });

        Ok(Some(handle))
    }

    /// Stop the loop. The in-flight task (if any) finishes first; the
    /// sleep between ticks is interrupted immediately. A stopped
    /// scheduler is terminal — create a new one to run again.
    pub fn stop(&self) {
        if !self.core.running.load(Ordering::SeqCst) {
            warn!("scheduler not running, stop ignored");
        }
        self.cancel.cancel();
    }

    /// Add a task to the store. Returns `false` on duplicate id.
    pub fn add_task(&self, task: Task) -> Result<bool> {
        self.core.store.add(task)
    }

    /// Fetch a task by id.
    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.core.store.get(id)
    }

    /// Remove a task by id.
    pub fn remove_task(&self, id: &str) -> Result<bool> {
        self.core.store.remove(id)
    }

    /// List tasks matching the filter, newest first.
    pub fn list_tasks(&self, filter: ListFilter) -> Vec<Task> {
        self.core.store.list(filter)
    }

    /// Cancel a pending or running task. A running task is not aborted
    /// mid-flight; it is marked `Cancelled` for when its run completes.
    /// Returns `false` when the task is already terminal.
    pub fn cancel_task(&self, id: &str) -> Result<bool> {
        let Some(mut task) = self.core.store.get(id) else {
            return Err(crate::SchedulerError::TaskNotFound(id.to_owned()));
        };
        match task.status {
            TaskStatus::Pending | TaskStatus::Running => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                self.core.store.update(task)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Current scheduler state and cumulative statistics.
    pub fn get_status(&self) -> SchedulerStatus {
        let core = &self.core;
        SchedulerStatus {
            running: core.running.load(Ordering::SeqCst),
            tick_count: core.tick_count.load(Ordering::SeqCst),
            current_task: core
                .current_task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            tasks_executed: core.tasks_executed.load(Ordering::SeqCst),
            tasks_succeeded: core.tasks_succeeded.load(Ordering::SeqCst),
            tasks_failed: core.tasks_failed.load(Ordering::SeqCst),
            store: core.store.statistics(),
        }
    }

    /// Idempotent check-then-insert of the default nightly consolidation
    /// task, so housekeeping runs without manual configuration.
    fn ensure_default_task(&self) -> Result<()> {
        let dreaming = &self.core.config.dreaming;
        if self.core.store.get(&dreaming.default_task_id).is_some() {
            return Ok(());
        }

        let cron = CronExpr::parse(&dreaming.default_cron)?;
        let first_run = Utc.from_utc_datetime(&cron.next_after(Utc::now().naive_utc())?);

        let task = Task::new(TaskKind::Dreaming)
            .with_id(&dreaming.default_task_id)
            .with_cron(&dreaming.default_cron)
            .with_schedule(first_run)
            .with_priority(TaskPriority::Low)
            .with_config("automatic", true)
            .with_created_by("bootstrap")
            .with_description("Nightly memory consolidation");

        if self.core.store.add(task)? {
            info!(
                "bootstrapped default task `{}` ({})",
                dreaming.default_task_id, dreaming.default_cron
            );
        }
        Ok(())
    }
}

impl Core {
    /// One scheduler tick: run the next due task, if any.
    async fn tick(&self) {
        self.tick_count.fetch_add(1, Ordering::SeqCst);

        let Some(task) = self.store.get_next() else {
            return;
        };
        self.run_task(task).await;
    }

    async fn run_task(&self, mut task: Task) {
        let id = task.id.clone();
        debug!("tick picked task `{id}`");
        *self.current_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        self.tasks_executed.fetch_add(1, Ordering::SeqCst);

        task.mark_started();
        if let Err(e) = self.store.update(task.clone()) {
            error!("cannot mark task `{id}` running: {e}");
        }

        let result = self.executor.execute(&task).await;
        // Each execution counts exactly once, whatever happens to the
        // bookkeeping afterwards.
        if result.success {
            self.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        }

        // Cancelled is terminal: a cancellation that landed while the task
        // was in flight wins over the run's outcome.
        let cancelled = self
            .store
            .get(&id)
            .is_some_and(|t| t.status == TaskStatus::Cancelled);
        if cancelled {
            info!("task `{id}` was cancelled mid-run, outcome discarded");
        } else if let Err(e) = self.apply_outcome(&mut task, result) {
            // A fault in the bookkeeping itself must not kill the loop:
            // record it on the task and move on.
            error!("bookkeeping for task `{id}` failed: {e}");
            task.mark_failed(TaskRunResult::failed(e.to_string()));
            if let Err(e) = self.store.update(task) {
                error!("cannot record failure for task `{id}`: {e}");
            }
        }

        *self.current_task.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Apply an execution outcome: complete, reschedule recurring tasks,
    /// requeue transient failures, or fail permanently.
    fn apply_outcome(&self, task: &mut Task, result: TaskRunResult) -> Result<()> {
        if result.success {
            match task.cron_expression.clone() {
                Some(expr) => {
                    let cron = CronExpr::parse(&expr)?;
                    let next = Utc.from_utc_datetime(&cron.next_after(Utc::now().naive_utc())?);
                    info!("task `{}` done, next run {next}", task.id);
                    task.reschedule(next, result);
                }
                None => {
                    info!("task `{}` completed", task.id);
                    task.mark_completed(result);
                }
            }
        } else {
            let permanent = result
                .metrics
                .get("permanent")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            // The Nth consecutive failure of a task with max_retries = N
            // is terminal; earlier ones requeue it immediately.
            let exhausted = task.retry_count + 1 >= task.max_retries;
            if permanent || exhausted {
                warn!("task `{}` failed permanently", task.id);
                task.mark_failed(result);
            } else {
                task.reset_for_retry(result);
                warn!(
                    "task `{}` failed, requeued (retry {}/{})",
                    task.id, task.retry_count, task.max_retries
                );
            }
        }

        self.store.update(task.clone())
    }
}
