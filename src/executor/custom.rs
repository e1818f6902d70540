//! Custom handler: runs an externally supplied shell command.
//!
//! This is a trust boundary. Commands are denied unless the host's
//! [`CustomTaskConfig`] allows them, either through the prefix allow-list
//! or by explicitly opting into unlisted commands.

use super::decode_params;
use crate::config::CustomTaskConfig;
use crate::error::{Result, SchedulerError};
use crate::tasks::{Task, TaskRunResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Longest stderr excerpt copied into the error message.
const MAX_ERROR_EXCERPT: usize = 512;

#[derive(Debug, Deserialize)]
struct CustomParams {
    command: String,
}

pub(super) async fn execute(task: &Task, config: &CustomTaskConfig) -> Result<TaskRunResult> {
    let params: CustomParams = decode_params(task)?;

    if params.command.trim().is_empty() {
        return Err(SchedulerError::Validation(format!(
            "task `{}`: command cannot be empty",
            task.id
        )));
    }
    if !config.permits(&params.command) {
        return Err(SchedulerError::Validation(format!(
            "task `{}`: command is not allow-listed (set custom.allowed_commands or allow_unlisted)",
            task.id
        )));
    }

    let timeout_secs = task
        .resources
        .max_duration_secs
        .unwrap_or(config.default_timeout_secs);
    debug!("task `{}` running command with {timeout_secs}s timeout", task.id);

    let run = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(&params.command)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
        Ok(io) => io.map_err(|e| SchedulerError::Executor(format!("cannot spawn command: {e}")))?,
        Err(_) => {
            return Err(SchedulerError::Executor(format!(
                "command timed out after {timeout_secs}s"
            )));
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let mut result = if output.status.success() {
        TaskRunResult::ok()
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.trim().chars().take(MAX_ERROR_EXCERPT).collect();
        TaskRunResult::failed(format!("command exited with {exit_code}: {excerpt}"))
    };

    result = result
        .with_metric("exit_code", exit_code)
        .with_metric("stdout_bytes", output.stdout.len())
        .with_metric("stderr_bytes", output.stderr.len());
    Ok(result)
}
