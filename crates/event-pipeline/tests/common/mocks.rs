// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fake pipeline collaborators for testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_pipeline::{
    errors::{StorageError, StoreError},
    metrics::{MetricValue, MetricsSink},
    model::{JobResult, ObjectLocation},
    result_store::ResultStore,
    storage::{ObjectBody, ObjectMetadata, ObjectStorage},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Metrics sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingMetrics {
    emitted: Mutex<Vec<(&'static str, MetricValue)>>,
}

#[allow(dead_code)]
impl RecordingMetrics {
    pub fn count(&self, name: &str) -> usize {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == name)
            .count()
    }

    pub fn sum(&self, name: &str) -> f64 {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.value())
            .sum()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn emit_batch(&self, metrics: &[(&'static str, MetricValue)]) {
        self.emitted.lock().unwrap().extend_from_slice(metrics);
    }
}

/// Storage that fails the first `failures` reads, then delegates
#[allow(dead_code)]
pub struct FlakyStorage {
    inner: Arc<dyn ObjectStorage>,
    failures: AtomicU32,
}

#[allow(dead_code)]
impl FlakyStorage {
    pub fn new(inner: Arc<dyn ObjectStorage>, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StorageError> {
        self.inner.head(location).await
    }

    async fn get(&self, location: &ObjectLocation) -> Result<ObjectBody, StorageError> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.inner.get(location).await
    }
}

/// Result store that rejects every write
#[allow(dead_code)]
pub struct FailingStore;

#[async_trait]
impl ResultStore for FailingStore {
    async fn put(&self, _result: &JobResult) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("throttled".to_string()))
    }

    async fn get(&self, _job_id: &str) -> Result<Option<JobResult>, StoreError> {
        Ok(None)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(0)
    }
}
