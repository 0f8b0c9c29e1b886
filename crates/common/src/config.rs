use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;

/// What the deferred task queue does with a new task when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the task being scheduled.
    #[default]
    DropNewest,
    /// Evict the oldest queued task to make room.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(anyhow::anyhow!(
                "unknown overflow policy '{}' (expected drop_newest or drop_oldest)",
                other
            )),
        }
    }
}

/// Deferred task scheduler tuning, as read from the environment.
///
/// Every limit is optional; leaving them unset gives an unbounded queue with
/// unbounded concurrency and no per-task timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum number of tasks waiting to start (unset = unbounded)
    pub queue_capacity: Option<usize>,

    /// Policy applied when `queue_capacity` is reached
    pub overflow_policy: OverflowPolicy,

    /// Maximum number of tasks running at once (unset = unbounded)
    pub max_concurrency: Option<usize>,

    /// Upper bound on a single task's run time in milliseconds
    pub task_timeout_ms: Option<u64>,

    /// How long shutdown waits for in-flight tasks before aborting them
    pub drain_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            overflow_policy: OverflowPolicy::default(),
            max_concurrency: None,
            task_timeout_ms: None,
            drain_timeout_secs: 10,
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the API server binds to (default: 3000)
    pub api_port: u16,

    /// JWT secret for API authentication
    pub jwt_secret: String,

    /// JWT token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: Option<String>,

    /// Maximum number of ids the store accepts in one `ANY(...)` predicate
    pub resolver_batch_limit: usize,

    /// Optional bound on a single member lookup round trip in milliseconds
    pub resolver_lookup_timeout_ms: Option<u64>,

    pub scheduler: SchedulerSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 20)?,
            api_port: var_or("API_PORT", 3000)?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: var_or("JWT_EXPIRY_HOURS", 24)?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            resend_api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            email_from: std::env::var("EMAIL_FROM").ok(),
            resolver_batch_limit: var_or("RESOLVER_BATCH_LIMIT", 100)?,
            resolver_lookup_timeout_ms: optional_var("RESOLVER_LOOKUP_TIMEOUT_MS")?,
            scheduler: SchedulerSettings {
                queue_capacity: optional_var("SCHEDULER_QUEUE_CAPACITY")?,
                overflow_policy: var_or("SCHEDULER_OVERFLOW_POLICY", OverflowPolicy::DropNewest)?,
                max_concurrency: optional_var("SCHEDULER_MAX_CONCURRENCY")?,
                task_timeout_ms: optional_var("SCHEDULER_TASK_TIMEOUT_MS")?,
                drain_timeout_secs: var_or("SCHEDULER_DRAIN_TIMEOUT_SECS", 10)?,
            },
        })
        .and_then(|config| Ok(config.validate()?))
    }

    /// Whether both halves of the email configuration are present.
    pub fn email_enabled(&self) -> bool {
        self.resend_api_key.is_some() && self.email_from.is_some()
    }

    fn validate(self) -> Result<Self, AppError> {
        let invalid = |msg: &str| Err(AppError::Config(msg.to_string()));
        if self.resolver_batch_limit == 0 {
            return invalid("RESOLVER_BATCH_LIMIT must be at least 1");
        }
        if self.scheduler.queue_capacity == Some(0) {
            return invalid("SCHEDULER_QUEUE_CAPACITY must be at least 1 when set");
        }
        if self.scheduler.max_concurrency == Some(0) {
            return invalid("SCHEDULER_MAX_CONCURRENCY must be at least 1 when set");
        }
        Ok(self)
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    Ok(optional_var(name)?.unwrap_or(default))
}

fn optional_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!(
            "drop_newest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropNewest
        );
        assert_eq!(
            "drop_oldest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropOldest
        );
        assert!("block".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_scheduler_settings_default_is_unbounded() {
        let settings = SchedulerSettings::default();
        assert!(settings.queue_capacity.is_none());
        assert!(settings.max_concurrency.is_none());
        assert!(settings.task_timeout_ms.is_none());
        assert_eq!(settings.drain_timeout_secs, 10);
    }

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://unused".to_string(),
            db_max_connections: 5,
            api_port: 3000,
            jwt_secret: "secret".to_string(),
            jwt_expiry_hours: 24,
            resend_api_key: None,
            resend_api_url: "https://api.resend.com".to_string(),
            email_from: None,
            resolver_batch_limit: 100,
            resolver_lookup_timeout_ms: None,
            scheduler: SchedulerSettings::default(),
        }
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut cfg = config();
        cfg.resolver_batch_limit = 0;
        assert!(matches!(
            cfg.validate(),
            Err(AppError::Config(msg)) if msg.contains("RESOLVER_BATCH_LIMIT")
        ));

        let mut cfg = config();
        cfg.scheduler.queue_capacity = Some(0);
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));

        let mut cfg = config();
        cfg.scheduler.max_concurrency = Some(0);
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));

        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_email_enabled_requires_key_and_sender() {
        let mut cfg = config();
        assert!(!cfg.email_enabled());
        cfg.resend_api_key = Some("re_123".to_string());
        assert!(!cfg.email_enabled());
        cfg.email_from = Some("noreply@atrium.dev".to_string());
        assert!(cfg.email_enabled());
    }
}
