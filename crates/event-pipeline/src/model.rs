// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire and domain types shared by both pipeline stages.
//!
//! * [`StorageEvent`] is the inbound storage-arrival batch.
//! * [`Job`] is the queue message body.
//! * [`LogRecord`] is one decoded line of an uploaded file.
//! * [`JobResult`] is the record persisted once per job attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::aggregator::Aggregation;

/// Location of an object in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A unit of work describing one uploaded file.
///
/// `job_id` is derived from the object key, so it stays the same across redeliveries of the
/// same upload. Results are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(flatten)]
    pub source: ObjectLocation,
    pub size: u64,
    pub content_type: String,
    pub received_at: DateTime<Utc>,
    pub validated_at: DateTime<Utc>,
}

/// A single storage-arrival notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub location: ObjectLocation,
    pub event_time: DateTime<Utc>,
}

/// Batch of storage-arrival notifications, in the S3 event notification layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StorageEventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEventRecord {
    #[serde(rename = "eventTime")]
    pub event_time: DateTime<Utc>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
}

impl StorageEventRecord {
    pub fn new(bucket: &str, key: &str, event_time: DateTime<Utc>) -> Self {
        Self {
            event_time,
            s3: S3Entity {
                bucket: S3Bucket {
                    name: bucket.to_string(),
                },
                object: S3Object {
                    key: key.to_string(),
                },
            },
        }
    }

    pub fn notification(&self) -> Notification {
        Notification {
            location: ObjectLocation::new(&self.s3.bucket.name, &self.s3.object.key),
            event_time: self.event_time,
        }
    }
}

/// Severity of a log record. Unrecognized values map to [`Level::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
    #[default]
    Other,
}

impl From<&str> for Level {
    fn from(value: &str) -> Self {
        match value {
            "INFO" => Level::Info,
            "WARN" => Level::Warn,
            "ERROR" => Level::Error,
            "DEBUG" => Level::Debug,
            _ => Level::Other,
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(Level::from).unwrap_or_default())
    }
}

/// One decoded line of an uploaded log file. Unknown fields, including `message`, are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LogRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub response_time_ms: u64,
    /// 0 when absent
    #[serde(default, deserialize_with = "null_as_default")]
    pub status_code: u32,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of one job attempt, keyed by `job_id` in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub line_count: u64,
    pub error_count: u64,
    pub warn_count: u64,
    pub info_count: u64,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: u64,
    pub unique_users: u64,
    pub unique_endpoints: u64,
    pub processing_time_ms: u64,
    pub file_size_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix seconds after which the store may drop the record
    pub expires_at: i64,
}

impl JobResult {
    pub fn completed(
        job: &Job,
        aggregation: &Aggregation,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: JobStatus::Completed,
            line_count: aggregation.total_lines,
            error_count: aggregation.error_count,
            warn_count: aggregation.warn_count,
            info_count: aggregation.info_count,
            avg_response_time_ms: aggregation.avg_response_ms(),
            max_response_time_ms: aggregation.max_response_ms,
            unique_users: aggregation.unique_users() as u64,
            unique_endpoints: aggregation.unique_endpoints() as u64,
            processing_time_ms: elapsed_ms(started_at, completed_at),
            file_size_bytes: job.size,
            started_at,
            completed_at,
            error_message: None,
            expires_at: expiry(completed_at, retention),
        }
    }

    pub fn failed(
        job: &Job,
        error_message: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: JobStatus::Failed,
            line_count: 0,
            error_count: 0,
            warn_count: 0,
            info_count: 0,
            avg_response_time_ms: 0.0,
            max_response_time_ms: 0,
            unique_users: 0,
            unique_endpoints: 0,
            processing_time_ms: elapsed_ms(started_at, completed_at),
            file_size_bytes: job.size,
            started_at,
            completed_at,
            error_message: Some(error_message),
            expires_at: expiry(completed_at, retention),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }
}

/// Unix seconds of `completed_at + retention`, saturating at the latest representable instant.
fn expiry(completed_at: DateTime<Utc>, retention: Duration) -> i64 {
    completed_at
        .checked_add_signed(retention)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .timestamp()
}

fn elapsed_ms(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> u64 {
    u64::try_from((completed_at - started_at).num_milliseconds()).unwrap_or(0)
}
