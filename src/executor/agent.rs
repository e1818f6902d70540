//! Agent handler: routes project lifecycle operations to the external
//! agent manager.

use super::decode_params;
use crate::error::{Result, SchedulerError};
use crate::tasks::{Task, TaskRunResult};
use async_trait::async_trait;
use serde::Deserialize;

/// Outcome of one lifecycle operation, `{success, ...}` per the manager
/// contract.
#[derive(Debug, Clone)]
pub struct AgentActionReport {
    pub success: bool,
    pub message: Option<String>,
    pub details: serde_json::Value,
}

impl AgentActionReport {
    /// Bare successful report.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            details: serde_json::Value::Null,
        }
    }
}

/// External agent lifecycle manager contract.
#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    async fn start_project(&self, agent_type: &str, project: &str) -> Result<AgentActionReport>;
    async fn stop_project(&self, agent_type: &str, project: &str) -> Result<AgentActionReport>;
    async fn restart_project(&self, agent_type: &str, project: &str)
    -> Result<AgentActionReport>;
    async fn destroy_project(&self, agent_type: &str, project: &str)
    -> Result<AgentActionReport>;
    async fn get_status(&self, agent_type: &str, project: &str) -> Result<AgentActionReport>;
    async fn list_projects(&self, agent_type: &str) -> Result<AgentActionReport>;
}

#[derive(Debug, Deserialize)]
struct AgentParams {
    agent_type: String,
    operation: String,
    #[serde(default)]
    project_name: Option<String>,
}

pub(super) async fn execute(
    task: &Task,
    agents: &dyn AgentLifecycle,
) -> Result<TaskRunResult> {
    let params: AgentParams = decode_params(task)?;

    // Everything except `list` operates on a specific project.
    let project = || {
        params.project_name.clone().ok_or_else(|| {
            SchedulerError::Validation(format!(
                "task `{}`: project_name is required for operation `{}`",
                task.id, params.operation
            ))
        })
    };

    let report = match params.operation.as_str() {
        "start" => agents.start_project(&params.agent_type, &project()?).await?,
        "stop" => agents.stop_project(&params.agent_type, &project()?).await?,
        "restart" => {
            agents
                .restart_project(&params.agent_type, &project()?)
                .await?
        }
        "destroy" => {
            agents
                .destroy_project(&params.agent_type, &project()?)
                .await?
        }
        "status" => agents.get_status(&params.agent_type, &project()?).await?,
        "list" => agents.list_projects(&params.agent_type).await?,
        other => {
            return Err(SchedulerError::Validation(format!(
                "task `{}`: unknown agent operation `{other}`",
                task.id
            )));
        }
    };

    let mut result = if report.success {
        TaskRunResult::ok()
    } else {
        TaskRunResult::failed(
            report
                .message
                .clone()
                .unwrap_or_else(|| format!("agent operation `{}` failed", params.operation)),
        )
    };
    result = result
        .with_metric("operation", params.operation.clone())
        .with_metric("agent_type", params.agent_type.clone());
    if report.success {
        result.output_ref = report.message;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::super::testing::StubAgents;
    use super::*;
    use crate::tasks::TaskKind;

    fn agent_task(operation: &str) -> Task {
        Task::new(TaskKind::Agent)
            .with_id("a")
            .with_config("agent_type", "coder")
            .with_config("operation", operation)
    }

    #[tokio::test]
    async fn start_routes_and_reports() {
        let task = agent_task("start").with_config("project_name", "garden");
        let result = execute(&task, &StubAgents).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metrics.get("operation"), Some(&"start".into()));
        assert_eq!(result.output_ref.as_deref(), Some("started garden"));
    }

    #[tokio::test]
    async fn list_needs_no_project() {
        let task = agent_task("list");
        let result = execute(&task, &StubAgents).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn missing_project_is_validation_failure() {
        let task = agent_task("stop");
        let err = execute(&task, &StubAgents).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let task = agent_task("vaporize").with_config("project_name", "garden");
        let err = execute(&task, &StubAgents).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn unsuccessful_report_fails_the_task() {
        struct Refusing;

        #[async_trait]
        impl AgentLifecycle for Refusing {
            async fn start_project(&self, _: &str, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport {
                    success: false,
                    message: Some("port already bound".into()),
                    details: serde_json::Value::Null,
                })
            }
            async fn stop_project(&self, _: &str, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport::ok())
            }
            async fn restart_project(&self, _: &str, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport::ok())
            }
            async fn destroy_project(&self, _: &str, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport::ok())
            }
            async fn get_status(&self, _: &str, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport::ok())
            }
            async fn list_projects(&self, _: &str) -> Result<AgentActionReport> {
                Ok(AgentActionReport::ok())
            }
        }

        let task = agent_task("start").with_config("project_name", "garden");
        let result = execute(&task, &Refusing).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("port already bound"));
    }
}
