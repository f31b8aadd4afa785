//! Background cadences: the daily anchor job and the reconciliation loop.
//!
//! Missed fires do not coalesce; a skipped midnight simply widens the next
//! job's window through the anchor watermark.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::MissedTickBehavior;

use crate::reconcile::Reconciliation;
use crate::workflow::AnchorWorkflow;

/// Daily anchor job timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC hour of the daily anchor job.
    pub hour: u32,
    /// UTC minute of the daily anchor job.
    pub minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 0,
            minute: 0,
        }
    }
}

/// The next occurrence of `hour:minute` UTC strictly after `now`.
pub fn next_daily_fire(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour.min(23), minute.min(59), 0)
        .expect("valid wall clock time")
        .and_utc();

    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Fire the daily anchor job at the configured UTC time, forever.
pub async fn run_daily_anchor_loop(workflow: Arc<AnchorWorkflow>, config: SchedulerConfig) {
    loop {
        let now = Utc::now();
        let next = next_daily_fire(now, config.hour, config.minute);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tracing::info!(next_run = %next, "daily anchor job scheduled");
        tokio::time::sleep(wait).await;

        let result = workflow.run_daily().await;
        if result.success {
            tracing::info!(
                anchor_id = ?result.anchor_id,
                event_count = result.event_count,
                outcome = ?result.outcome,
                "daily anchor job completed"
            );
        } else {
            tracing::error!(error = ?result.error, "daily anchor job failed");
        }
    }
}

/// Run reconciliation on a fixed interval, forever. The first pass runs
/// one interval after startup.
pub async fn run_reconciliation_loop(reconciliation: Arc<Reconciliation>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval's first tick is immediate; consume it so the service settles
    // before the first scan.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        reconciliation.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn fires_today_when_the_time_is_still_ahead() {
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let next = next_daily_fire(now, 23, 30);

        assert_eq!(next.date_naive(), now.date_naive());
        assert_eq!((next.hour(), next.minute()), (23, 30));
    }

    #[test]
    fn fires_tomorrow_once_the_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let next = next_daily_fire(now, 0, 0);

        assert_eq!(next.date_naive(), now.date_naive().succ_opt().unwrap());
        assert_eq!((next.hour(), next.minute()), (0, 0));
    }

    #[test]
    fn exact_fire_time_schedules_the_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        let next = next_daily_fire(now, 0, 0);

        assert_eq!(next - now, ChronoDuration::days(1));
    }
}
