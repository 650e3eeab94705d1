use std::time::Duration;

pub const DEFAULT_FOLDER: &str = "heallink/records";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_FILE_SIZE_MB: f64 = 10.0;
pub const DEFAULT_GRACE_PERIOD_HOURS: u64 = 48;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;
/// Longest grace period honoured, about a century.
pub const MAX_GRACE_PERIOD_HOURS: u64 = 24 * 365 * 100;

/// Knobs shared by the upload client, the validator and the orphan sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Total upload attempts per file, including the first.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    /// Destination folder at the asset host; also the sweep's listing prefix.
    pub folder: String,
    pub max_file_size_mb: f64,
    /// Minimum age of an unreferenced remote object before the sweep deletes it.
    pub grace_period_hours: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            folder: DEFAULT_FOLDER.into(),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            grace_period_hours: DEFAULT_GRACE_PERIOD_HOURS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
        }
    }
}

impl LifecycleConfig {
    /// Build from environment variables, keeping defaults for anything
    /// unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            folder: std::env::var("HEALLINK_UPLOAD_FOLDER")
                .ok()
                .filter(|f| !f.is_empty())
                .unwrap_or(defaults.folder),
            max_file_size_mb: parse_env("HEALLINK_MAX_FILE_SIZE_MB")
                .filter(|mb: &f64| *mb > 0.0)
                .unwrap_or(defaults.max_file_size_mb),
            grace_period_hours: parse_env("HEALLINK_CLEANUP_GRACE_HOURS")
                .map(|h: u64| h.min(MAX_GRACE_PERIOD_HOURS))
                .unwrap_or(defaults.grace_period_hours),
            attempt_timeout_secs: parse_env("HEALLINK_UPLOAD_TIMEOUT_SECS")
                .filter(|s: &u64| *s > 0)
                .unwrap_or(defaults.attempt_timeout_secs),
            ..defaults
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Clamped to [`MAX_GRACE_PERIOD_HOURS`].
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::hours(self.grace_period_hours.min(MAX_GRACE_PERIOD_HOURS) as i64)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
