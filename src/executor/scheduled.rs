//! Scheduled handler: resolves when a time-triggered task is supposed to
//! fire and records which schedule type did.
//!
//! The calendar action behind the trigger is an external concern; this
//! handler only proves the timing out.

use super::decode_params;
use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};
use crate::tasks::{Task, TaskRunResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScheduledParams {
    /// Absolute run time; takes precedence over the cron expression.
    when: Option<DateTime<Utc>>,
}

pub(super) fn execute(task: &Task) -> Result<TaskRunResult> {
    let params: ScheduledParams = decode_params(task)?;

    let (schedule_type, fired_at) = if let Some(when) = params.when {
        ("absolute", when)
    } else if let Some(expr) = &task.cron_expression {
        let cron = CronExpr::parse(expr)?;
        let next = cron.next_after(Utc::now().naive_utc())?;
        ("cron", Utc.from_utc_datetime(&next))
    } else {
        return Err(SchedulerError::Validation(format!(
            "task `{}`: needs either `when` or a cron_expression",
            task.id
        )));
    };

    Ok(TaskRunResult::ok()
        .with_metric("schedule_type", schedule_type)
        .with_metric("fired_at", fired_at.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::tasks::TaskKind;

    #[test]
    fn absolute_when_wins() {
        let task = Task::new(TaskKind::Scheduled)
            .with_id("s")
            .with_config("when", "2026-06-01T09:00:00Z")
            .with_cron("0 3 * * *");
        let result = execute(&task).unwrap();
        assert!(result.success);
        assert_eq!(result.metrics.get("schedule_type"), Some(&"absolute".into()));
        assert_eq!(
            result.metrics.get("fired_at"),
            Some(&"2026-06-01T09:00:00+00:00".into())
        );
    }

    #[test]
    fn cron_resolves_next_occurrence() {
        let task = Task::new(TaskKind::Scheduled)
            .with_id("s")
            .with_cron("0 3 * * *");
        let result = execute(&task).unwrap();
        assert!(result.success);
        assert_eq!(result.metrics.get("schedule_type"), Some(&"cron".into()));
        let fired: DateTime<Utc> = result.metrics["fired_at"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(fired > Utc::now());
    }

    #[test]
    fn neither_schedule_is_validation_error() {
        let task = Task::new(TaskKind::Scheduled).with_id("s");
        let err = execute(&task).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn bad_cron_surfaces_parse_error() {
        let task = Task::new(TaskKind::Scheduled).with_id("s").with_cron("nope");
        let err = execute(&task).unwrap_err();
        assert!(matches!(err, SchedulerError::Cron(_)));
    }
}
