//! Durable, concurrency-safe task repository.
//!
//! Tasks are keyed by id and mirrored to a single JSON snapshot on every
//! mutation. The snapshot is written to a temp file and atomically renamed
//! into place, so a crash mid-write leaves either the old or the new state
//! on disk, never a torn one. One mutex serializes every operation,
//! including the persistence step; the design assumes a single scheduler
//! instance per storage file.

use crate::error::{Result, SchedulerError};
use crate::tasks::{Task, TaskKind, TaskPriority, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// On-disk snapshot layout: the full task map plus a metadata block.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    tasks: HashMap<String, Task>,
    #[serde(default)]
    metadata: SnapshotMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    total_tasks: usize,
}

/// Filters for [`TaskStore::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    /// Only tasks with this status.
    pub status: Option<TaskStatus>,
    /// Only tasks with this priority.
    pub priority: Option<TaskPriority>,
    /// Maximum number of tasks returned (0 = unlimited).
    pub limit: usize,
}

/// Aggregate counts over the stored tasks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_priority: BTreeMap<TaskPriority, usize>,
    pub by_kind: BTreeMap<TaskKind, usize>,
}

struct StoreInner {
    tasks: HashMap<String, Task>,
    path: Option<PathBuf>,
}

/// Durable task repository with priority-aware retrieval.
pub struct TaskStore {
    inner: Mutex<StoreInner>,
}

impl TaskStore {
    /// In-memory store with no durable mirror (tests, embedding).
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                tasks: HashMap::new(),
                path: None,
            }),
        }
    }

    /// Open a store backed by the given snapshot file, loading any
    /// existing state. A missing file starts empty; a malformed one is an
    /// error (the caller decides whether to discard it).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tasks = match std::fs::read(&path) {
            Ok(bytes) => {
                let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| SchedulerError::Store(format!("cannot parse snapshot: {e}")))?;
                debug!(
                    "loaded {} tasks from {}",
                    snapshot.tasks.len(),
                    path.display()
                );
                snapshot.tasks
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(SchedulerError::Store(format!(
                    "cannot read snapshot {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            inner: Mutex::new(StoreInner {
                tasks,
                path: Some(path),
            }),
        })
    }

    /// Insert a task. Returns `false` (without overwriting) when the id is
    /// already present.
    pub fn add(&self, task: Task) -> Result<bool> {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.id) {
            warn!("task id `{}` already exists, not adding", task.id);
            return Ok(false);
        }
        inner.tasks.insert(task.id.clone(), task);
        persist(&inner)?;
        Ok(true)
    }

    /// Fetch a task by id.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Overwrite the task with a matching id.
    pub fn update(&self, task: Task) -> Result<()> {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&task.id) {
            return Err(SchedulerError::TaskNotFound(task.id));
        }
        inner.tasks.insert(task.id.clone(), task);
        persist(&inner)
    }

    /// Remove a task by id. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock();
        let removed = inner.tasks.remove(id).is_some();
        if removed {
            persist(&inner)?;
        }
        Ok(removed)
    }

    /// Next due pending task: minimum `(priority rank, created_at)` among
    /// tasks whose schedule is absent or has passed.
    ///
    /// Order is re-evaluated fresh on every call; a persistently busy
    /// higher priority can starve lower ones indefinitely (accepted
    /// behavior, no aging).
    pub fn get_next(&self) -> Option<Task> {
        let now = Utc::now();
        self.lock()
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .min_by_key(|t| (t.priority.rank(), t.created_at))
            .cloned()
    }

    /// List tasks matching the filter, newest first.
    pub fn list(&self, filter: ListFilter) -> Vec<Task> {
        let inner = self.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.priority.is_none_or(|p| t.priority == p))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            tasks.truncate(filter.limit);
        }
        tasks
    }

    /// Counts grouped by status, priority and kind.
    pub fn statistics(&self) -> TaskStatistics {
        let inner = self.lock();
        let mut stats = TaskStatistics {
            total: inner.tasks.len(),
            ..TaskStatistics::default()
        };
        for task in inner.tasks.values() {
            *stats.by_status.entry(task.status).or_default() += 1;
            *stats.by_priority.entry(task.priority).or_default() += 1;
            *stats.by_kind.entry(task.kind).or_default() += 1;
        }
        stats
    }

    /// Remove completed tasks whose `completed_at` is older than the
    /// cutoff. Returns the number removed.
    pub fn clear_completed(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut inner = self.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, t| {
            !(t.status == TaskStatus::Completed
                && t.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let removed = before - inner.tasks.len();
        if removed > 0 {
            persist(&inner)?;
            debug!("cleared {removed} completed tasks");
        }
        Ok(removed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned lock means a panic mid-mutation; the in-memory map is
        // still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write the full snapshot via temp-file-then-rename.
fn persist(inner: &StoreInner) -> Result<()> {
    let Some(path) = &inner.path else {
        return Ok(());
    };

    let snapshot = StoreSnapshot {
        tasks: inner.tasks.clone(),
        metadata: SnapshotMetadata {
            saved_at: Some(Utc::now()),
            total_tasks: inner.tasks.len(),
        },
    };

    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| SchedulerError::Store(format!("cannot serialize snapshot: {e}")))?;

    write_atomic(path, &json)
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("tasks"),
        std::process::id()
    );
    let tmp_path = path
        .parent()
        .map(|p| p.join(&tmp_name))
        .unwrap_or_else(|| PathBuf::from(&tmp_name));

    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
