//! Type-routed task execution.
//!
//! [`TaskExecutor`] routes a task to the handler for its [`TaskKind`] and
//! always returns a uniform [`TaskRunResult`]: handler errors are folded
//! into a failed result rather than propagated, so a misbehaving task can
//! never take the ticker loop down with it.
//!
//! External collaborators (the dreaming pipeline and the agent lifecycle
//! manager) are injected as trait objects at construction.

mod agent;
mod custom;
mod dreaming;
mod scheduled;

pub use agent::{AgentActionReport, AgentLifecycle};
pub use dreaming::{DreamPipeline, PipelineReport, PipelineStages, StageCount, StagePath};

use crate::config::{CustomTaskConfig, DreamingConfig};
use crate::tasks::{Task, TaskKind, TaskRunResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes tasks to their kind-specific handler.
pub struct TaskExecutor {
    dreaming: DreamingConfig,
    custom: CustomTaskConfig,
    pipeline: Arc<dyn DreamPipeline>,
    agents: Arc<dyn AgentLifecycle>,
}

impl TaskExecutor {
    /// Create an executor with the given handler settings and injected
    /// collaborators.
    pub fn new(
        dreaming: DreamingConfig,
        custom: CustomTaskConfig,
        pipeline: Arc<dyn DreamPipeline>,
        agents: Arc<dyn AgentLifecycle>,
    ) -> Self {
        Self {
            dreaming,
            custom,
            pipeline,
            agents,
        }
    }

    /// Execute one task and report its outcome. Never returns an error:
    /// anything a handler raises becomes a failed result carrying the
    /// error text.
    pub async fn execute(&self, task: &Task) -> TaskRunResult {
        debug!("executing task `{}` ({})", task.id, task.kind);

        let outcome = match task.kind {
            TaskKind::Dreaming => {
                dreaming::execute(task, &self.dreaming, self.pipeline.as_ref()).await
            }
            TaskKind::Scheduled => scheduled::execute(task),
            TaskKind::Agent => agent::execute(task, self.agents.as_ref()).await,
            TaskKind::Custom => custom::execute(task, &self.custom).await,
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("task `{}` handler failed: {e}", task.id);
                let mut result = TaskRunResult::failed(e.to_string());
                // Validation failures cannot succeed on retry.
                if matches!(e, crate::SchedulerError::Validation(_)) {
                    result.metrics.insert("permanent".into(), true.into());
                }
                result
            }
        }
    }
}

/// Decode a handler's typed parameter struct from the task's open config
/// map, failing fast with a descriptive validation error.
fn decode_params<T: serde::de::DeserializeOwned>(task: &Task) -> crate::Result<T> {
    serde_json::from_value(serde_json::Value::Object(task.config.clone())).map_err(|e| {
        crate::SchedulerError::Validation(format!("task `{}` config: {e}", task.id))
    })
}

/// Stub collaborators shared by the in-crate test suites.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::SchedulerError;
    use async_trait::async_trait;

    pub(crate) struct StubPipeline {
        pub fail: bool,
    }

    #[async_trait]
    impl DreamPipeline for StubPipeline {
        async fn process_conversation(
            &self,
            _conversation_id: &str,
            _conversation_text: &str,
            _metadata: serde_json::Map<String, serde_json::Value>,
        ) -> crate::Result<PipelineReport> {
            if self.fail {
                return Err(SchedulerError::Executor("pipeline offline".into()));
            }
            Ok(PipelineReport {
                status: "success".into(),
                stages: PipelineStages {
                    chunks: StageCount { count: 7 },
                    clusters: StageCount { count: 2 },
                    archive: StagePath {
                        path: "/tmp/archive".into(),
                    },
                },
                error: None,
            })
        }
    }

    pub(crate) struct StubAgents;

    #[async_trait]
    impl AgentLifecycle for StubAgents {
        async fn start_project(&self, _: &str, project: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport {
                success: true,
                message: Some(format!("started {project}")),
                details: serde_json::Value::Null,
            })
        }
        async fn stop_project(&self, _: &str, _: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport::ok())
        }
        async fn restart_project(&self, _: &str, _: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport::ok())
        }
        async fn destroy_project(&self, _: &str, _: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport::ok())
        }
        async fn get_status(&self, _: &str, _: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport::ok())
        }
        async fn list_projects(&self, _: &str) -> crate::Result<AgentActionReport> {
            Ok(AgentActionReport::ok())
        }
    }

    pub(crate) fn executor(fail_pipeline: bool) -> TaskExecutor {
        TaskExecutor::new(
            DreamingConfig::default(),
            CustomTaskConfig::default(),
            Arc::new(StubPipeline {
                fail: fail_pipeline,
            }),
            Arc::new(StubAgents),
        )
    }
}
