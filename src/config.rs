//! Scheduler configuration.
//!
//! All sections carry `#[serde(default)]` so a partial TOML file (or none
//! at all) yields a working configuration.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Loop timing and persistence settings.
    pub ticker: TickerConfig,
    /// Dreaming (memory consolidation) handler settings.
    pub dreaming: DreamingConfig,
    /// Custom shell-command handler settings.
    pub custom: CustomTaskConfig,
}

/// Ticker loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Task snapshot file (None = platform default config dir).
    pub state_path: Option<PathBuf>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            state_path: None,
        }
    }
}

/// Dreaming handler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DreamingConfig {
    /// Whether automatic dreaming runs are confined to the off-peak window.
    pub enforce_off_peak: bool,
    /// Window start, local wall-clock `HH:MM`. May be later than the end,
    /// in which case the window crosses midnight.
    pub off_peak_start: String,
    /// Window end, local wall-clock `HH:MM`.
    pub off_peak_end: String,
    /// How many recent conversation messages automatic runs assemble.
    pub lookback_messages: usize,
    /// Default consolidation quality level.
    pub quality_level: String,
    /// Conversation log read for automatic input assembly (JSON array of
    /// `{message_type, text_content}` records).
    pub conversation_log: Option<PathBuf>,
    /// Cron expression of the bootstrap consolidation task.
    pub default_cron: String,
    /// Fixed id of the bootstrap consolidation task.
    pub default_task_id: String,
}

impl Default for DreamingConfig {
    fn default() -> Self {
        Self {
            enforce_off_peak: true,
            off_peak_start: "23:00".to_owned(),
            off_peak_end: "07:00".to_owned(),
            lookback_messages: 50,
            quality_level: "standard".to_owned(),
            conversation_log: None,
            default_cron: "0 3 * * *".to_owned(),
            default_task_id: "nightly_dream_consolidation".to_owned(),
        }
    }
}

/// Custom-command handler settings.
///
/// Custom tasks run arbitrary shell commands, so they are denied unless
/// the host opts in: either `allow_unlisted = true` or a non-empty prefix
/// allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomTaskConfig {
    /// Allow commands not covered by `allowed_commands`.
    pub allow_unlisted: bool,
    /// Command prefixes that are always allowed.
    pub allowed_commands: Vec<String>,
    /// Fallback timeout in seconds when the task requests none.
    pub default_timeout_secs: u64,
}

impl Default for CustomTaskConfig {
    fn default() -> Self {
        Self {
            allow_unlisted: false,
            allowed_commands: Vec::new(),
            default_timeout_secs: 300,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| SchedulerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Snapshot path: explicit setting, or `reverie/tasks.json` under the
    /// platform config directory.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.ticker
            .state_path
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join("reverie").join("tasks.json")))
    }
}

impl CustomTaskConfig {
    /// Returns `true` when the given command may execute.
    pub fn permits(&self, command: &str) -> bool {
        if self
            .allowed_commands
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return true;
        }
        self.allow_unlisted
    }
}
