// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local invocation boundary around the [`Consumer`].
//!
//! Each delivery runs under a deadline. Success acks the message; failure, deadline expiry or
//! cancellation nacks it so the queue redelivers or dead-letters it. An attempt cut short
//! never reaches the store write, so it leaves no result behind.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::Consumer;
use crate::queue::{MemoryQueue, QueueMessage};

/// Delivery outcomes seen by one [`Worker::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

enum Attempt {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

pub struct Worker {
    queue: Arc<MemoryQueue>,
    consumer: Arc<Consumer>,
    job_timeout: Duration,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        queue: Arc<MemoryQueue>,
        consumer: Arc<Consumer>,
        job_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            consumer,
            job_timeout,
            cancel,
        }
    }

    /// Processes deliveries until the queue is closed and empty, or until cancelled.
    pub async fn run(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        loop {
            let delivery = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("Worker cancelled");
                    break;
                }
                delivery = self.queue.receive() => delivery,
            };
            let Some(delivery) = delivery else {
                debug!("Queue closed and drained, stopping worker");
                break;
            };

            match self.attempt(&delivery).await {
                Attempt::Succeeded => stats.succeeded += 1,
                Attempt::Failed => stats.failed += 1,
                Attempt::TimedOut => stats.timed_out += 1,
                Attempt::Cancelled => break,
            }
        }
        info!(
            "Worker stopped: {} succeeded, {} failed, {} timed out",
            stats.succeeded, stats.failed, stats.timed_out
        );
        stats
    }

    async fn attempt(&self, delivery: &QueueMessage) -> Attempt {
        let attempt = tokio::select! {
            () = self.cancel.cancelled() => Attempt::Cancelled,
            outcome = tokio::time::timeout(
                self.job_timeout,
                self.consumer.process_message(delivery),
            ) => match outcome {
                Ok(Ok(_)) => Attempt::Succeeded,
                Ok(Err(e)) => {
                    warn!(
                        "Message {} failed on delivery {}: {e}",
                        delivery.message_id, delivery.receive_count
                    );
                    Attempt::Failed
                }
                Err(_) => {
                    warn!(
                        "Message {} exceeded the {:?} deadline on delivery {}",
                        delivery.message_id, self.job_timeout, delivery.receive_count
                    );
                    Attempt::TimedOut
                }
            },
        };

        let settled = match attempt {
            Attempt::Succeeded => self.queue.ack(&delivery.receipt_handle).await,
            _ => self.queue.nack(&delivery.receipt_handle).await,
        };
        if let Err(e) = settled {
            error!("Failed to settle message {}: {e}", delivery.message_id);
        }
        attempt
    }
}
