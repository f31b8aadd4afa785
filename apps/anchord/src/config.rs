//! Service configuration, read from environment variables.

use std::time::Duration;

use anchor_tangle::TangleConfig;

use crate::reconcile::ReconcileConfig;
use crate::scheduler::SchedulerConfig;

/// Everything the service needs at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP bind address.
    pub bind_addr: String,
    /// sqlx database URL.
    pub database_url: String,
    pub tangle: TangleConfig,
    pub scheduler: SchedulerConfig,
    /// Interval between reconciliation passes.
    pub reconciliation_interval: Duration,
    pub reconcile: ReconcileConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        let tangle = TangleConfig::from_env();

        let scheduler = SchedulerConfig {
            enabled: env_bool("SCHEDULER_ENABLED", true),
            hour: env_parse("ANCHOR_SCHEDULE_HOUR", 0),
            minute: env_parse("ANCHOR_SCHEDULE_MINUTE", 0),
        };

        let reconcile_defaults = ReconcileConfig::default();
        let reconcile = ReconcileConfig {
            max_retries: env_parse("RECONCILIATION_MAX_RETRIES", reconcile_defaults.max_retries),
            backoff_base: env_secs("RECONCILIATION_BACKOFF_BASE", reconcile_defaults.backoff_base),
            backoff_cap: env_secs("RECONCILIATION_BACKOFF_CAP", reconcile_defaults.backoff_cap),
            // Give in-flight workflows at least two confirmation polls
            // before reconciliation considers an anchor stuck.
            min_age: env_secs(
                "RECONCILIATION_MIN_AGE",
                tangle.poll_interval.saturating_mul(2).max(Duration::from_secs(60)),
            ),
            scan_limit: reconcile_defaults.scan_limit,
        };

        Self {
            bind_addr: std::env::var("ANCHORD_BIND").unwrap_or_else(|_| "0.0.0.0:8082".to_string()),
            database_url: std::env::var("ANCHORD_DB_URL")
                .unwrap_or_else(|_| "sqlite://anchors.sqlite3".to_string()),
            tangle,
            scheduler,
            reconciliation_interval: Duration::from_secs(
                60 * env_parse::<u64>("RECONCILIATION_INTERVAL_MINUTES", 15),
            ),
            reconcile,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
