// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! First pipeline stage: turns storage-arrival notifications into queued [`Job`]s.
//!
//! Each notification is handled on its own. A failure (missing object, unparseable key,
//! publish error) is reported for that notification only and never stops its siblings.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::errors::NotificationError;
use crate::key::{KeyConvention, KeyMatch};
use crate::metrics::{names, MetricValue, MetricsSink};
use crate::model::{Job, Notification, StorageEvent};
use crate::queue::{JobQueue, OutboundMessage, JOB_ID_ATTRIBUTE};
use crate::storage::ObjectStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Queued { job_id: String, message_id: String },
    /// The key is not an upload this pipeline handles
    Skipped,
}

/// Outcome of one storage event batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub queued: Vec<String>,
    pub skipped: Vec<String>,
    /// Object key and cause of every failed notification
    pub failures: Vec<(String, NotificationError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Validator {
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn JobQueue>,
    metrics: Arc<dyn MetricsSink>,
    convention: KeyConvention,
}

impl Validator {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
        metrics: Arc<dyn MetricsSink>,
        convention: KeyConvention,
    ) -> Self {
        Self {
            storage,
            queue,
            metrics,
            convention,
        }
    }

    /// Handles every notification in `event`. Never fails as a whole.
    pub async fn handle_event(&self, event: &StorageEvent) -> BatchReport {
        let mut report = BatchReport::default();
        for record in &event.records {
            let notification = record.notification();
            match self.handle_notification(&notification).await {
                Ok(NotificationOutcome::Queued { job_id, .. }) => report.queued.push(job_id),
                Ok(NotificationOutcome::Skipped) => {
                    report.skipped.push(notification.location.key)
                }
                Err(e) => {
                    error!("Error processing notification for {}: {e}", notification.location);
                    self.metrics
                        .emit_batch(&[(names::TRIGGER_FAILURES, MetricValue::Count(1.0))])
                        .await;
                    report.failures.push((notification.location.key, e));
                }
            }
        }
        debug!(
            "Handled storage event: {} queued, {} skipped, {} failed",
            report.queued.len(),
            report.skipped.len(),
            report.failures.len()
        );
        report
    }

    /// Validates one notification and publishes its job.
    ///
    /// Keys outside the naming convention's prefix or without the json extension are skipped
    /// before any storage call.
    pub async fn handle_notification(
        &self,
        notification: &Notification,
    ) -> Result<NotificationOutcome, NotificationError> {
        let start = Instant::now();
        let location = &notification.location;

        if self.convention.classify(&location.key) == KeyMatch::Ignored {
            debug!("Skipping non-matching key: {}", location.key);
            return Ok(NotificationOutcome::Skipped);
        }

        let metadata =
            self.storage
                .head(location)
                .await
                .map_err(|source| NotificationError::Metadata {
                    bucket: location.bucket.clone(),
                    key: location.key.clone(),
                    source,
                })?;

        let job_id = self.convention.job_id(&location.key)?;
        debug!("Extracted job id '{job_id}' from key {}", location.key);

        let job = Job {
            job_id: job_id.clone(),
            source: location.clone(),
            size: metadata.size,
            content_type: metadata.content_type,
            received_at: notification.event_time,
            validated_at: Utc::now(),
        };

        let message_id = self
            .publish(&job)
            .await
            .map_err(|source| NotificationError::Publish {
                job_id: job_id.clone(),
                source,
            })?;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .emit_batch(&[
                (
                    names::TRIGGER_VALIDATION_LATENCY_MS,
                    MetricValue::TimingMs(latency_ms),
                ),
                (
                    names::TRIGGER_FILE_SIZE_BYTES,
                    MetricValue::Gauge(job.size as f64),
                ),
                (names::TRIGGER_INVOCATIONS, MetricValue::Count(1.0)),
            ])
            .await;

        info!("Queued job {job_id} for file {location} ({latency_ms:.2}ms)");
        Ok(NotificationOutcome::Queued { job_id, message_id })
    }

    async fn publish(&self, job: &Job) -> Result<String, crate::errors::QueueError> {
        let body = serde_json::to_string(job)?;
        let attributes = BTreeMap::from([(JOB_ID_ATTRIBUTE.to_string(), job.job_id.clone())]);
        self.queue.publish(OutboundMessage { body, attributes }).await
    }
}
