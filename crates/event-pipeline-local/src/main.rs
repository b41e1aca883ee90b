// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use std::{env, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{interval, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use event_pipeline::{
    config::PipelineConfig,
    consumer::Consumer,
    metrics::{MetricsSink, NoopMetrics, StatsdMetrics},
    model::StorageEvent,
    queue::MemoryQueue,
    result_store::{FileResultStore, MemoryResultStore, ResultStore},
    storage::LocalObjectStorage,
    validator::Validator,
    worker::Worker,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("EP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}. Shutting down event pipeline.");
            return;
        }
    };

    if let Err(e) = run(config).await {
        error!("Event pipeline failed: {e:#}");
    }
}

async fn run(config: PipelineConfig) -> anyhow::Result<()> {
    info!(
        "Starting event pipeline: data in {}, prefix '{}/', doc type '{}'",
        config.data_dir.display(),
        config.key_prefix,
        config.doc_type
    );

    let storage = Arc::new(LocalObjectStorage::new(&config.data_dir));
    let queue = Arc::new(MemoryQueue::new(config.redrive_policy()));

    let store: Arc<dyn ResultStore> = match &config.results_dir {
        Some(dir) => Arc::new(
            FileResultStore::new(dir)
                .await
                .with_context(|| format!("Failed to open result store at {}", dir.display()))?,
        ),
        None => {
            debug!("EP_RESULTS_DIR not set, keeping results in memory");
            Arc::new(MemoryResultStore::new())
        }
    };

    let metrics: Arc<dyn MetricsSink> = match &config.statsd_host {
        Some(host) => match StatsdMetrics::new(
            host,
            config.statsd_port,
            &config.metric_namespace,
            &config.environment,
        )
        .await
        {
            Ok(statsd) => Arc::new(statsd),
            Err(e) => {
                warn!("Failed to create metrics client, metrics disabled: {e}");
                Arc::new(NoopMetrics)
            }
        },
        None => {
            debug!("EP_STATSD_HOST not set, metrics disabled");
            Arc::new(NoopMetrics)
        }
    };

    let validator = Validator::new(
        storage.clone(),
        queue.clone(),
        metrics.clone(),
        config.key_convention()?,
    );
    let consumer = Arc::new(
        Consumer::new(storage, store.clone(), metrics)
            .with_retention(config.result_retention())
            .with_max_line_bytes(config.max_line_bytes),
    );

    let cancel = CancellationToken::new();
    let worker = Worker::new(
        queue.clone(),
        consumer,
        config.job_timeout(),
        cancel.clone(),
    );
    let worker_handle = tokio::spawn(async move { worker.run().await });
    let purge_handle = tokio::spawn(purge_expired_results(store.clone(), cancel.clone()));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            interrupt.cancel();
        }
    });

    let mut queued_jobs = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read storage events from stdin")?,
        };
        let Some(line) = line else {
            debug!("Reached end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StorageEvent>(&line) {
            Ok(event) => {
                let report = validator.handle_event(&event).await;
                for (key, e) in &report.failures {
                    warn!("Notification for {key} was not queued: {e}");
                }
                queued_jobs.extend(report.queued);
            }
            Err(e) => error!("Skipping unreadable storage event: {e}"),
        }
    }

    queue.close().await;
    tokio::select! {
        () = cancel.cancelled() => {}
        () = queue.wait_drained() => debug!("Queue drained"),
    }
    cancel.cancel();

    let stats = worker_handle.await.context("Worker task failed")?;
    purge_handle.await.context("Purge task failed")?;

    for job_id in &queued_jobs {
        match store.get(job_id).await {
            Ok(Some(result)) => info!(
                "Job {job_id}: {} ({} lines, {} errors, {} warnings, avg {:.2}ms, max {}ms)",
                result.status,
                result.line_count,
                result.error_count,
                result.warn_count,
                result.avg_response_time_ms,
                result.max_response_time_ms
            ),
            Ok(None) => warn!("Job {job_id}: no result"),
            Err(e) => error!("Job {job_id}: failed to read result: {e}"),
        }
    }
    for message in queue.drain_dead_letters().await {
        warn!(
            "Dead letter {} (job {}) after {} deliveries",
            message.message_id,
            message.job_id().unwrap_or("unknown"),
            message.receive_count
        );
    }
    info!(
        "Event pipeline finished: {} queued, {} succeeded, {} failed, {} timed out",
        queued_jobs.len(),
        stats.succeeded,
        stats.failed,
        stats.timed_out
    );
    Ok(())
}

async fn purge_expired_results(store: Arc<dyn ResultStore>, cancel: CancellationToken) {
    let mut purge_interval = interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = purge_interval.tick() => match store.purge_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => debug!("Purged {removed} expired results"),
                Err(e) => warn!("Failed to purge expired results: {e}"),
            },
        }
    }
}
