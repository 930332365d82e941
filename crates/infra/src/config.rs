//! Environment-driven configuration.
//!
//! Every setting has a default; only values that are present but unparseable
//! are errors.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use bioforge_ai::HttpAiConfig;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for the job subsystem and its collaborators.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// When false no broker is used and jobs run inline on the enqueue path.
    pub broker_enabled: bool,
    /// Redis connection string; `None` selects the in-memory broker.
    pub redis_url: Option<String>,
    pub queue_name: String,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub poll_max_wait: Duration,
    pub processing_timeout: Duration,
    pub republish_after: Duration,
    pub recovery_interval: Duration,
    pub ai: HttpAiConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            broker_enabled: true,
            redis_url: None,
            queue_name: "bioforge:jobs".to_string(),
            worker_concurrency: 5,
            poll_interval: Duration::from_millis(2000),
            poll_max_wait: Duration::from_secs(300),
            processing_timeout: Duration::from_secs(900),
            republish_after: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(30),
            ai: HttpAiConfig::default(),
        }
    }
}

impl JobsConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mut ai = defaults.ai.clone();
        if let Some(url) = get("AI_BASE_URL") {
            ai.base_url = url;
        }
        ai.api_key = get("AI_API_KEY");
        if let Some(model) = get("AI_MODEL") {
            ai.model = model;
        }
        if let Some(secs) = parse::<u64>("AI_TIMEOUT_SECS", get("AI_TIMEOUT_SECS"))? {
            ai.timeout = Duration::from_secs(secs);
        }
        if ai.api_key.is_none() {
            warn!("AI_API_KEY not set; requests to the AI service are unauthenticated");
        }

        let worker_concurrency = parse::<usize>("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"))?
            .unwrap_or(defaults.worker_concurrency);
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            broker_enabled: parse_bool("BROKER_ENABLED", get("BROKER_ENABLED"))?
                .unwrap_or(defaults.broker_enabled),
            redis_url: get("REDIS_URL"),
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            worker_concurrency,
            poll_interval: nonzero("POLL_INTERVAL_MS", millis("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"))?)?
                .unwrap_or(defaults.poll_interval),
            poll_max_wait: secs("POLL_MAX_WAIT_SECS", get("POLL_MAX_WAIT_SECS"))?
                .unwrap_or(defaults.poll_max_wait),
            processing_timeout: secs("PROCESSING_TIMEOUT_SECS", get("PROCESSING_TIMEOUT_SECS"))?
                .unwrap_or(defaults.processing_timeout),
            republish_after: secs("REPUBLISH_AFTER_SECS", get("REPUBLISH_AFTER_SECS"))?
                .unwrap_or(defaults.republish_after),
            recovery_interval: nonzero(
                "RECOVERY_INTERVAL_SECS",
                secs("RECOVERY_INTERVAL_SECS", get("RECOVERY_INTERVAL_SECS"))?,
            )?
            .unwrap_or(defaults.recovery_interval),
            ai,
        })
    }
}

fn parse<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    value
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}

fn millis(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(key, value)?.map(Duration::from_millis))
}

fn secs(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(key, value)?.map(Duration::from_secs))
}

fn nonzero(key: &'static str, value: Option<Duration>) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(d) if d.is_zero() => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}
