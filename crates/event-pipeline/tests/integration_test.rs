// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{storage_event, upload, BUCKET};
use common::mocks::{FailingStore, FlakyStorage, RecordingMetrics};
use event_pipeline::{
    consumer::Consumer,
    errors::ConsumerError,
    key::KeyConvention,
    metrics::{names, NoopMetrics},
    model::{JobStatus, ObjectLocation},
    queue::{JobQueue, MemoryQueue, RedrivePolicy},
    result_store::{FileResultStore, MemoryResultStore, ResultStore},
    storage::{LocalObjectStorage, ObjectStorage},
    validator::Validator,
    worker::{Worker, WorkerStats},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INFO_LINE: &str = r#"{"timestamp":"2024-01-01T00:00:00Z","level":"INFO","endpoint":"/api/users","response_time_ms":10,"status_code":200,"user_id":"u1","message":"ok"}"#;
const ERROR_LINE: &str = r#"{"timestamp":"2024-01-01T00:00:01Z","level":"ERROR","endpoint":"/api/orders","response_time_ms":500,"status_code":500,"user_id":"u2","message":"boom"}"#;

fn validator(
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<MemoryQueue>,
    metrics: Arc<RecordingMetrics>,
) -> Validator {
    Validator::new(storage, queue, metrics, KeyConvention::default())
}

fn worker(queue: Arc<MemoryQueue>, consumer: Consumer) -> Worker {
    Worker::new(
        queue,
        Arc::new(consumer),
        Duration::from_secs(5),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_upload_to_result_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path().join("data")));
    let store = Arc::new(FileResultStore::new(dir.path().join("results")).await.unwrap());
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy::default()));
    let metrics = Arc::new(RecordingMetrics::default());

    upload(
        &storage,
        "logs/test_42_20240101T000000.json",
        &[INFO_LINE, ERROR_LINE, "not-json", ""],
    )
    .await;
    upload(&storage, "logs/readme.txt", &["hello"]).await;

    let report = validator(storage.clone(), queue.clone(), metrics.clone())
        .handle_event(&storage_event(&[
            "logs/test_42_20240101T000000.json",
            "logs/readme.txt",
        ]))
        .await;
    assert_eq!(report.queued, vec!["42".to_string()]);
    assert_eq!(report.skipped, vec!["logs/readme.txt".to_string()]);
    assert!(report.is_success());

    queue.close().await;
    let consumer = Consumer::new(storage, store.clone(), metrics.clone());
    let stats = worker(queue.clone(), consumer).run().await;
    assert_eq!(stats.succeeded, 1);

    let result = store.get("42").await.unwrap().expect("result should be stored");
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.line_count, 3);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.info_count, 1);
    assert_eq!(result.warn_count, 0);
    assert_eq!(result.avg_response_time_ms, 255.0);
    assert_eq!(result.max_response_time_ms, 500);
    assert_eq!(result.unique_users, 2);
    assert_eq!(result.unique_endpoints, 2);

    assert_eq!(metrics.count(names::TRIGGER_INVOCATIONS), 1);
    assert_eq!(metrics.count(names::WORKER_SUCCESS), 1);
    assert_eq!(metrics.sum(names::WORKER_LINES_PROCESSED), 3.0);
    assert_eq!(metrics.sum(names::WORKER_MALFORMED_LINES), 1.0);
    assert!(queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_overwritten_on_redelivery() {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalObjectStorage::new(dir.path()));
    upload(&local, "logs/test_7_20240101.json", &[INFO_LINE]).await;
    let storage = Arc::new(FlakyStorage::new(local, 1));
    let store = Arc::new(MemoryResultStore::new());
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy::default()));
    let metrics = Arc::new(RecordingMetrics::default());

    validator(storage.clone(), queue.clone(), metrics.clone())
        .handle_event(&storage_event(&["logs/test_7_20240101.json"]))
        .await;
    queue.close().await;

    let consumer = Consumer::new(storage, store.clone(), metrics.clone());
    let stats = worker(queue.clone(), consumer).run().await;
    assert_eq!(
        stats,
        WorkerStats {
            succeeded: 1,
            failed: 1,
            timed_out: 0
        }
    );

    let result = store.get("7").await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.error_message, None);
    assert_eq!(store.len().await, 1);
    assert_eq!(metrics.count(names::WORKER_FAILURE), 1);
    assert_eq!(metrics.count(names::WORKER_SUCCESS), 1);
}

#[tokio::test]
async fn test_poison_job_is_dead_lettered_after_max_receives() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path()));
    let key = "logs/test_13_20240101.json";
    upload(&storage, key, &[INFO_LINE]).await;
    let store = Arc::new(MemoryResultStore::new());
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy {
        max_receive_count: 3,
    }));

    validator(
        storage.clone(),
        queue.clone(),
        Arc::new(RecordingMetrics::default()),
    )
    .handle_event(&storage_event(&[key]))
    .await;
    // the upload disappears between validation and processing
    std::fs::remove_file(dir.path().join(BUCKET).join(key)).unwrap();
    queue.close().await;

    let consumer = Consumer::new(storage, store.clone(), Arc::new(NoopMetrics));
    let stats = worker(queue.clone(), consumer).run().await;
    assert_eq!(stats.failed, 3);

    let dead = queue.drain_dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id(), Some("13"));
    assert_eq!(dead[0].receive_count, 3);

    let result = store.get("13").await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn test_persist_failure_is_never_swallowed() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path()));
    upload(&storage, "logs/test_1_a.json", &[INFO_LINE]).await;
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy::default()));

    validator(
        storage.clone(),
        queue.clone(),
        Arc::new(RecordingMetrics::default()),
    )
    .handle_event(&storage_event(&["logs/test_1_a.json"]))
    .await;

    let consumer = Consumer::new(storage, Arc::new(FailingStore), Arc::new(NoopMetrics));
    let delivery = queue.receive().await.unwrap();
    assert!(matches!(
        consumer.process_message(&delivery).await,
        Err(ConsumerError::Persist { ref job_id, .. }) if job_id == "1"
    ));
}

#[tokio::test]
async fn test_expired_results_are_purged_by_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path().join("data")));
    let store = Arc::new(FileResultStore::new(dir.path().join("results")).await.unwrap());
    upload(&storage, "logs/test_5_a.json", &[INFO_LINE]).await;
    let location = ObjectLocation::new(BUCKET, "logs/test_5_a.json");
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy::default()));

    validator(
        storage.clone(),
        queue.clone(),
        Arc::new(RecordingMetrics::default()),
    )
    .handle_event(&storage_event(&[location.key.as_str()]))
    .await;
    queue.close().await;

    let consumer = Consumer::new(storage, store.clone(), Arc::new(NoopMetrics))
        .with_retention(chrono::Duration::zero());
    worker(queue, consumer).run().await;
    assert!(store.get("5").await.unwrap().is_some());

    let removed = store
        .purge_expired(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get("5").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unpublishable_batch_reports_every_failure() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path()));
    upload(&storage, "logs/test_1_a.json", &[INFO_LINE]).await;
    upload(&storage, "logs/test_2_b.json", &[INFO_LINE]).await;
    let queue = Arc::new(MemoryQueue::new(RedrivePolicy::default()));
    queue.close().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let report = validator(storage, queue.clone(), metrics.clone())
        .handle_event(&storage_event(&["logs/test_1_a.json", "logs/test_2_b.json"]))
        .await;
    assert!(report.queued.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(metrics.count(names::TRIGGER_FAILURES), 2);
    assert!(queue.publish(event_pipeline::queue::OutboundMessage {
        body: String::new(),
        attributes: Default::default(),
    })
    .await
    .is_err());
}
