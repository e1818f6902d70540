//! Dreaming handler: memory consolidation through the external pipeline.
//!
//! Automatic runs are gated to an off-peak wall-clock window and assemble
//! their input from the recent conversation log. A run that chooses not to
//! proceed (outside the window, nothing to consolidate) is a *successful*
//! no-op tagged with a skip reason, so recurring tasks still reschedule.

use super::decode_params;
use crate::config::DreamingConfig;
use crate::error::{Result, SchedulerError};
use crate::tasks::{Task, TaskRunResult};
use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Report returned by the external consolidation pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineReport {
    /// `"success"` or a failure status.
    pub status: String,
    /// Per-stage outputs.
    pub stages: PipelineStages,
    /// Error text for non-success statuses.
    #[serde(default)]
    pub error: Option<String>,
}

/// Stage outputs of a consolidation run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineStages {
    #[serde(rename = "B_chunks")]
    pub chunks: StageCount,
    #[serde(rename = "C_clusters")]
    pub clusters: StageCount,
    #[serde(rename = "D_archive")]
    pub archive: StagePath,
}

/// A stage that reports how many items it produced.
#[derive(Debug, Clone, Deserialize)]
pub struct StageCount {
    pub count: u64,
}

/// A stage that reports where it wrote its output.
#[derive(Debug, Clone, Deserialize)]
pub struct StagePath {
    pub path: String,
}

/// External memory-consolidation pipeline contract.
#[async_trait]
pub trait DreamPipeline: Send + Sync {
    /// Consolidate one conversation. `metadata` carries quality level and
    /// provenance hints.
    async fn process_conversation(
        &self,
        conversation_id: &str,
        conversation_text: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PipelineReport>;
}

/// Per-task parameters; unset fields fall back to [`DreamingConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DreamingParams {
    automatic: bool,
    conversation_id: Option<String>,
    conversation_text: Option<String>,
    quality_level: Option<String>,
    off_peak_start: Option<String>,
    off_peak_end: Option<String>,
    enforce_off_peak: Option<bool>,
    lookback_messages: Option<usize>,
}

/// One record of the external conversation log.
#[derive(Debug, Deserialize)]
struct ConversationRecord {
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    text_content: String,
}

pub(super) async fn execute(
    task: &Task,
    config: &DreamingConfig,
    pipeline: &dyn DreamPipeline,
) -> Result<TaskRunResult> {
    let params: DreamingParams = decode_params(task)?;

    let enforce = params.enforce_off_peak.unwrap_or(config.enforce_off_peak);
    if enforce {
        let start = parse_hhmm(params.off_peak_start.as_deref().unwrap_or(&config.off_peak_start))?;
        let end = parse_hhmm(params.off_peak_end.as_deref().unwrap_or(&config.off_peak_end))?;
        let now = Local::now().time();
        if !within_window(now, start, end) {
            info!("task `{}` deferred: outside off-peak window", task.id);
            return Ok(TaskRunResult::skipped("outside_off_peak_window"));
        }
    }

    let (conversation_id, conversation_text) = match resolve_conversation(task, &params, config)? {
        Some(input) => input,
        None => {
            info!("task `{}` skipped: no recent conversation data", task.id);
            return Ok(TaskRunResult::skipped("no_recent_conversation_data"));
        }
    };

    let quality = params
        .quality_level
        .clone()
        .unwrap_or_else(|| config.quality_level.clone());
    let mut metadata = serde_json::Map::new();
    metadata.insert("quality_level".into(), quality.into());
    metadata.insert("automatic".into(), params.automatic.into());
    metadata.insert("source".into(), "scheduler".into());

    let report = pipeline
        .process_conversation(&conversation_id, &conversation_text, metadata)
        .await?;

    if report.status != "success" {
        let detail = report.error.unwrap_or(report.status);
        return Ok(TaskRunResult::failed(format!(
            "dream pipeline failed: {detail}"
        )));
    }

    let mut result = TaskRunResult::ok()
        .with_metric("chunks", report.stages.chunks.count)
        .with_metric("clusters", report.stages.clusters.count);
    result.output_ref = Some(report.stages.archive.path);
    Ok(result)
}

/// Pick the conversation to consolidate: explicit text wins, otherwise
/// automatic tasks assemble one from the recent conversation log.
/// `Ok(None)` means there is genuinely nothing to do.
fn resolve_conversation(
    task: &Task,
    params: &DreamingParams,
    config: &DreamingConfig,
) -> Result<Option<(String, String)>> {
    if let Some(text) = &params.conversation_text {
        let id = params
            .conversation_id
            .clone()
            .unwrap_or_else(|| task.id.clone());
        return Ok(Some((id, text.clone())));
    }

    if !params.automatic {
        return Err(SchedulerError::Validation(format!(
            "task `{}`: conversation_text is required unless automatic is set",
            task.id
        )));
    }

    let Some(log_path) = &config.conversation_log else {
        return Ok(None);
    };
    let lookback = params.lookback_messages.unwrap_or(config.lookback_messages);
    Ok(assemble_from_log(log_path, lookback).map(|text| (format!("auto-{}", task.id), text)))
}

/// Read the trailing `lookback` records of the conversation log and join
/// their text. Absent or malformed content is "no data", not an error.
fn assemble_from_log(path: &Path, lookback: usize) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let records: Vec<ConversationRecord> = serde_json::from_slice(&bytes).ok()?;

    let start = records.len().saturating_sub(lookback);
    let lines: Vec<String> = records[start..]
        .iter()
        .filter(|r| !r.text_content.trim().is_empty())
        .map(|r| {
            if r.message_type.is_empty() {
                r.text_content.clone()
            } else {
                format!("{}: {}", r.message_type, r.text_content)
            }
        })
        .collect();

    if lines.is_empty() {
        debug!("conversation log {} has no usable records", path.display());
        return None;
    }
    Some(lines.join("\n"))
}

/// Parse a `HH:MM` wall-clock string.
fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| SchedulerError::Validation(format!("invalid time `{s}`: {e}")))
}

/// Window membership, handling windows that cross midnight: when
/// `start > end`, being in the window means after the start *or* before
/// the end.
fn within_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start > end {
        now >= start || now <= end
    } else {
        (start..=end).contains(&now)
    }
}
