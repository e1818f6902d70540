//! Reverie: background task scheduler and executor.
//!
//! A persistent ticker tracks pending work items, picks the next due one
//! under a priority/FIFO policy, executes it through a kind-routed handler,
//! and records the outcome with retry and cron-recurrence semantics.
//!
//! # Architecture
//!
//! - **[`tasks`]**: the task model and its explicit lifecycle transitions
//! - **[`cron`]**: 5-field recurrence expressions and next-run search
//! - **[`store`]**: durable, mutex-serialized task repository (JSON
//!   snapshot with atomic writes)
//! - **[`executor`]**: kind-routed handlers (dreaming, scheduled, agent,
//!   custom) over injected external collaborators
//! - **[`runner`]**: the ticker loop that wires store and executor
//!   together, one task per tick
//!
//! The dreaming pipeline, agent lifecycle manager, protocol adapters and
//! the rest of the surrounding assistant are external collaborators; the
//! first two are consumed through the [`executor::DreamPipeline`] and
//! [`executor::AgentLifecycle`] traits.

pub mod config;
pub mod cron;
pub mod error;
pub mod executor;
pub mod runner;
pub mod store;
pub mod tasks;

pub use config::SchedulerConfig;
pub use cron::CronExpr;
pub use error::{Result, SchedulerError};
pub use executor::{AgentLifecycle, DreamPipeline, TaskExecutor};
pub use runner::{Scheduler, SchedulerStatus};
pub use store::{ListFilter, TaskStatistics, TaskStore};
pub use tasks::{Task, TaskKind, TaskPriority, TaskRunResult, TaskStatus};
