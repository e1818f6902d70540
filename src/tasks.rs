//! Task model: the unit of schedulable, potentially recurring work.
//!
//! Defines [`Task`] together with its kind/status/priority enums, resource
//! requirements, and the [`TaskRunResult`] recorded after each execution.
//! Status transitions go through the explicit `mark_*` helpers so the
//! lifecycle (`Pending -> Running -> Completed | Failed`, plus the retry and
//! cron-reschedule paths back to `Pending`) stays auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of work a task performs; selects the executor handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Memory-consolidation run through the dreaming pipeline.
    Dreaming,
    /// Time-triggered action (absolute timestamp or cron).
    Scheduled,
    /// Agent project lifecycle operation.
    Agent,
    /// Externally supplied shell command.
    Custom,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Dreaming => "dreaming",
            Self::Scheduled => "scheduled",
            Self::Agent => "agent",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to become due.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully (terminal for non-recurring tasks).
    Completed,
    /// Failed with retries exhausted (terminal).
    Failed,
    /// Cancelled externally (terminal).
    Cancelled,
}

/// Execution priority. `Critical` preempts everything else that is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric rank used for scheduling order. Lower runs first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// Resource constraints requested by a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    /// Preferred LLM provider, if the handler talks to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Token budget hint for LLM-backed handlers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Wall-clock budget in seconds (also the custom-command timeout).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    /// Whether the task needs GPU-backed inference.
    pub requires_gpu: bool,
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResult {
    /// Whether the run succeeded (skipped runs count as success).
    pub success: bool,
    /// Reference to produced output (archive path, report id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    /// Handler-specific metrics (counts, durations, skip reasons).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Error text when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskRunResult {
    /// Successful result with no metrics.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failed result carrying the given error text.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Successful no-op tagged with a skip reason.
    pub fn skipped(reason: &str) -> Self {
        let mut result = Self::ok();
        result.metrics.insert("skipped".into(), true.into());
        result.metrics.insert("reason".into(), reason.into());
        result
    }

    /// Attach a metric value.
    pub fn with_metric(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.to_owned(), value.into());
        self
    }
}

/// A unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, immutable task id (store map key).
    pub id: String,
    /// Handler routing key.
    pub kind: TaskKind,
    /// Absolute earliest run time; `None` means eligible immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<DateTime<Utc>>,
    /// 5-field cron recurrence. Successful runs reschedule instead of
    /// completing when this is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Open handler-specific parameters; each handler decodes its own
    /// expected subset on dispatch.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Requested resource constraints.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Last execution outcome, if the task has ever run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskRunResult>,
    /// Transient-failure retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Allowed transient-failure retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Creation time (FIFO tie-breaker within a priority).
    pub created_at: DateTime<Utc>,
    /// When the current/most recent run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent run finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who created the task (api, bootstrap, ...).
    #[serde(default)]
    pub created_by: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// Create a pending medium-priority task with a generated id.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            schedule: None,
            cron_expression: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            config: serde_json::Map::new(),
            resources: ResourceRequirements::default(),
            result: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            created_by: String::new(),
            description: String::new(),
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the earliest run time.
    pub fn with_schedule(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Some(at);
        self
    }

    /// Set the cron recurrence expression.
    pub fn with_cron(mut self, expr: impl Into<String>) -> Self {
        self.cron_expression = Some(expr.into());
        self
    }

    /// Set a handler config entry.
    pub fn with_config(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.to_owned(), value.into());
        self
    }

    /// Set the provenance tag.
    pub fn with_created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Returns `true` when the task is pending and its schedule (if any)
    /// has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.schedule.map(|at| at <= now).unwrap_or(true)
    }

    /// Transition `Pending -> Running`.
    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition `Running -> Completed`, recording the outcome.
    pub fn mark_completed(&mut self, result: TaskRunResult) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Transition `Running -> Failed` (retries exhausted), recording the
    /// outcome.
    pub fn mark_failed(&mut self, result: TaskRunResult) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Transition `Running -> Pending` on a transient failure, consuming
    /// one retry. The task becomes immediately eligible again.
    pub fn reset_for_retry(&mut self, result: TaskRunResult) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.result = Some(result);
    }

    /// Reschedule a recurring task after a successful run: back to
    /// `Pending` with the next occurrence, run timestamps cleared.
    pub fn reschedule(&mut self, next: DateTime<Utc>, result: TaskRunResult) {
        self.status = TaskStatus::Pending;
        self.schedule = Some(next);
        self.started_at = None;
        self.completed_at = None;
        self.retry_count = 0;
        self.result = Some(result);
    }
}
