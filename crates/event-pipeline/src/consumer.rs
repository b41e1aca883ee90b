// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Second pipeline stage: turns one delivered [`Job`] into one persisted [`JobResult`].
//!
//! A job moves through `received -> fetching -> aggregating -> completed | failed`. Nothing
//! is kept between jobs and nothing is retried here: a failed attempt persists a failed
//! result (best effort) and reports the error so the queue substrate can redeliver or
//! dead-letter the message. The store write is always the last step of an attempt.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

use crate::aggregator::{Aggregation, Aggregator, DEFAULT_MAX_LINE_BYTES};
use crate::config::DEFAULT_RESULT_TTL_DAYS;
use crate::errors::{ConsumerError, JobError};
use crate::metrics::{names, MetricValue, MetricsSink};
use crate::model::{Job, JobResult};
use crate::queue::QueueMessage;
use crate::result_store::ResultStore;
use crate::storage::ObjectStorage;

pub struct Consumer {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<dyn MetricsSink>,
    retention: Duration,
    max_line_bytes: usize,
}

impl Consumer {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn ResultStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            storage,
            store,
            metrics,
            retention: Duration::days(i64::from(DEFAULT_RESULT_TTL_DAYS)),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// How long results are kept after completion.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Processes `messages` in order, stopping at the first failure.
    ///
    /// The whole batch is expected to be redelivered on error. That is safe because every
    /// result write overwrites the previous one for the same job id.
    pub async fn handle_batch(
        &self,
        messages: &[QueueMessage],
    ) -> Result<Vec<JobResult>, ConsumerError> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.process_message(message).await?);
        }
        Ok(results)
    }

    pub async fn process_message(
        &self,
        message: &QueueMessage,
    ) -> Result<JobResult, ConsumerError> {
        let job: Job = serde_json::from_str(&message.body).map_err(|e| {
            error!("Failed to decode message {}: {e}", message.message_id);
            ConsumerError::MalformedMessage(e)
        })?;
        let span = info_span!(
            "job",
            job_id = %job.job_id,
            message_id = %message.message_id,
            receive_count = message.receive_count
        );
        self.process_job(&job).instrument(span).await
    }

    pub async fn process_job(&self, job: &Job) -> Result<JobResult, ConsumerError> {
        let started_at = Utc::now();

        let aggregation = match self.aggregate(job).await {
            Ok(aggregation) => aggregation,
            Err(e) => return Err(self.record_failure(job, started_at, e).await),
        };

        let result = JobResult::completed(
            job,
            &aggregation,
            started_at,
            Utc::now(),
            self.retention,
        );
        self.store
            .put(&result)
            .await
            .map_err(|source| ConsumerError::Persist {
                job_id: job.job_id.clone(),
                source,
            })?;

        self.metrics
            .emit_batch(&[
                (
                    names::WORKER_PROCESSING_LATENCY_MS,
                    MetricValue::TimingMs(result.processing_time_ms as f64),
                ),
                (
                    names::WORKER_LINES_PROCESSED,
                    MetricValue::Count(result.line_count as f64),
                ),
                (
                    names::WORKER_ERRORS_FOUND,
                    MetricValue::Count(result.error_count as f64),
                ),
                (
                    names::WORKER_MALFORMED_LINES,
                    MetricValue::Count(aggregation.malformed_lines as f64),
                ),
                (names::WORKER_SUCCESS, MetricValue::Count(1.0)),
            ])
            .await;

        info!(
            "Processed job {}: {} lines, {} errors, {} warnings ({}ms)",
            result.job_id,
            result.line_count,
            result.error_count,
            result.warn_count,
            result.processing_time_ms
        );
        Ok(result)
    }

    async fn aggregate(&self, job: &Job) -> Result<Aggregation, JobError> {
        let body = self.storage.get(&job.source).await.map_err(JobError::Fetch)?;
        let mut aggregator = Aggregator::new(self.max_line_bytes);
        aggregator.ingest_stream(body).await?;
        Ok(aggregator.into_aggregation())
    }

    /// Persists a failed result for `job` and picks the error to report upward.
    async fn record_failure(
        &self,
        job: &Job,
        started_at: DateTime<Utc>,
        cause: JobError,
    ) -> ConsumerError {
        let result = JobResult::failed(
            job,
            cause.to_string(),
            started_at,
            Utc::now(),
            self.retention,
        );
        self.metrics
            .emit_batch(&[(names::WORKER_FAILURE, MetricValue::Count(1.0))])
            .await;

        if let Err(source) = self.store.put(&result).await {
            error!(
                "Failed to save failed result for job {} (cause: {cause}): {source}",
                job.job_id
            );
            return ConsumerError::Persist {
                job_id: job.job_id.clone(),
                source,
            };
        }

        error!("Job {} failed: {cause}", job.job_id);
        ConsumerError::Job {
            job_id: job.job_id.clone(),
            source: cause,
        }
    }
}
