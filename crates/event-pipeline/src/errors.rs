// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by an object storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Access denied: {bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Invalid object location: {0}")]
    InvalidLocation(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the job queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to serialize job: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to publish message: {0}")]
    Publish(String),

    #[error("Unknown receipt handle: {0}")]
    UnknownReceipt(String),

    #[error("Queue closed")]
    Closed,
}

/// Errors returned by a result store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid result key: {0}")]
    InvalidKey(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// The object key does not follow the upload naming convention
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Could not extract job id from key: {key}")]
pub struct KeyError {
    pub key: String,
}

/// Failure of a single notification in a storage event batch. Sibling notifications are
/// unaffected.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to head object {bucket}/{key}: {source}")]
    Metadata {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("Failed to publish job {job_id}: {source}")]
    Publish {
        job_id: String,
        #[source]
        source: QueueError,
    },
}

/// Failure inside one job attempt. Turned into a failed result by the consumer.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to get object: {0}")]
    Fetch(#[source] StorageError),

    #[error("Error reading log stream: {0}")]
    Read(#[source] std::io::Error),

    #[error("Line {line_number} exceeds the maximum line length of {limit} bytes")]
    LineTooLong { line_number: u64, limit: usize },
}

/// Errors signaled upward by the consumer so the queue substrate can redeliver or dead-letter
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Failed to decode job message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("Job {job_id} failed: {source}")]
    Job {
        job_id: String,
        #[source]
        source: JobError,
    },

    #[error("Failed to save result for job {job_id}: {source}")]
    Persist {
        job_id: String,
        #[source]
        source: StoreError,
    },
}

/// Invalid pipeline configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
