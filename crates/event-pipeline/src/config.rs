// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::DEFAULT_MAX_LINE_BYTES;
use crate::errors::ConfigError;
use crate::key::{KeyConvention, DEFAULT_DOC_TYPE, DEFAULT_KEY_PREFIX};
use crate::metrics::{parse_metric_namespace, DEFAULT_METRIC_NAMESPACE, DEFAULT_STATSD_PORT};
use crate::queue::{RedrivePolicy, DEFAULT_MAX_RECEIVE_COUNT};

pub const DEFAULT_RESULT_TTL_DAYS: u32 = 7;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 900;
/// Longest accepted result retention, 100 years
pub const MAX_RESULT_TTL_DAYS: u32 = 36_500;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for both pipeline stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Reserved prefix uploads must live under
    pub key_prefix: String,
    /// Doc-type segment that starts the file name
    pub doc_type: String,
    /// Deliveries of one message before it is dead-lettered
    pub max_receive_count: u32,
    /// How long results are kept after completion, in days
    pub result_ttl_days: u32,
    /// Longest accepted log line, in bytes
    pub max_line_bytes: usize,
    /// Deadline for one job attempt, in seconds
    pub job_timeout_secs: u64,
    /// Root directory of the local object storage
    pub data_dir: PathBuf,
    /// Directory for file-backed results; results stay in memory when unset
    pub results_dir: Option<PathBuf>,
    /// DogStatsD host; metrics are disabled when unset
    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    pub metric_namespace: String,
    /// Value of the `env` tag on every metric
    pub environment: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            result_ttl_days: DEFAULT_RESULT_TTL_DAYS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            data_dir: PathBuf::from("./data"),
            results_dir: None,
            statsd_host: None,
            statsd_port: DEFAULT_STATSD_PORT,
            metric_namespace: DEFAULT_METRIC_NAMESPACE.to_string(),
            environment: "development".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

impl PipelineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            log_level: env::var("EP_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            key_prefix: env_non_empty("EP_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            doc_type: env_non_empty("EP_DOC_TYPE").unwrap_or(defaults.doc_type),
            max_receive_count: env_parse("EP_MAX_RECEIVE_COUNT")
                .unwrap_or(defaults.max_receive_count),
            result_ttl_days: env_parse("EP_RESULT_TTL_DAYS").unwrap_or(defaults.result_ttl_days),
            max_line_bytes: env_parse("EP_MAX_LINE_BYTES").unwrap_or(defaults.max_line_bytes),
            job_timeout_secs: env_parse("EP_JOB_TIMEOUT_SECS")
                .unwrap_or(defaults.job_timeout_secs),
            data_dir: env_non_empty("EP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            results_dir: env_non_empty("EP_RESULTS_DIR").map(PathBuf::from),
            statsd_host: env_non_empty("EP_STATSD_HOST"),
            statsd_port: env_parse("EP_STATSD_PORT").unwrap_or(defaults.statsd_port),
            metric_namespace: env::var("EP_METRIC_NAMESPACE")
                .ok()
                .and_then(|val| parse_metric_namespace(&val))
                .unwrap_or(defaults.metric_namespace),
            environment: env_non_empty("ENVIRONMENT").unwrap_or(defaults.environment),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        if self.max_receive_count == 0 {
            return Err(ConfigError::Invalid(
                "max receive count must be greater than 0".to_string(),
            ));
        }
        if self.result_ttl_days == 0 || self.result_ttl_days > MAX_RESULT_TTL_DAYS {
            return Err(ConfigError::Invalid(format!(
                "result TTL must be between 1 and {MAX_RESULT_TTL_DAYS} days, got {}",
                self.result_ttl_days
            )));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max line bytes must be greater than 0".to_string(),
            ));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "job timeout must be greater than 0".to_string(),
            ));
        }
        if self.statsd_host.is_some() && self.statsd_port == 0 {
            return Err(ConfigError::Invalid(
                "StatsD port must be greater than 0".to_string(),
            ));
        }
        self.key_convention()?;
        Ok(())
    }

    pub fn key_convention(&self) -> Result<KeyConvention, ConfigError> {
        KeyConvention::new(&self.key_prefix, &self.doc_type)
    }

    pub fn result_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.result_ttl_days))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn redrive_policy(&self) -> RedrivePolicy {
        RedrivePolicy {
            max_receive_count: self.max_receive_count,
        }
    }
}
