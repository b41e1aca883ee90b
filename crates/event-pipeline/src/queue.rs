// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Job queue seam and an in-process at-least-once queue.
//!
//! The validator only needs [`JobQueue::publish`]. Delivery, redelivery and dead-letter
//! routing belong to the queue substrate; [`MemoryQueue`] provides them for local runs and
//! tests:
//!
//! * a received message is in flight until it is acked or nacked,
//! * a nacked message becomes visible again, unless it has already been received
//!   `max_receive_count` times, in which case it moves to the dead-letter list.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::errors::QueueError;

/// Message attribute carrying the job id
pub const JOB_ID_ATTRIBUTE: &str = "JobID";

pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

/// A message as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    /// How many times this message has been delivered, including this delivery
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn job_id(&self) -> Option<&str> {
        self.attributes.get(JOB_ID_ATTRIBUTE).map(String::as_str)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a message and returns its id.
    async fn publish(&self, message: OutboundMessage) -> Result<String, QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: BTreeMap<String, String>,
    receive_count: u32,
}

impl StoredMessage {
    fn delivery(&self, receipt_handle: String) -> QueueMessage {
        QueueMessage {
            message_id: self.message_id.clone(),
            receipt_handle,
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            receive_count: self.receive_count,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
    dead_letters: Vec<QueueMessage>,
    closed: bool,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    changed: Notify,
    policy: RedrivePolicy,
}

impl MemoryQueue {
    pub fn new(policy: RedrivePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
            policy,
        }
    }

    /// Waits for the next visible message. Returns `None` once the queue is closed and
    /// nothing is left to deliver.
    pub async fn receive(&self) -> Option<QueueMessage> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(mut message) = state.ready.pop_front() {
                    message.receive_count += 1;
                    let receipt_handle =
                        format!("{}-{}", message.message_id, message.receive_count);
                    let delivery = message.delivery(receipt_handle.clone());
                    state.in_flight.insert(receipt_handle, message);
                    return Some(delivery);
                }
                if state.closed && state.in_flight.is_empty() {
                    return None;
                }
            }
            changed.await;
        }
    }

    /// Deletes a successfully processed message.
    pub async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))?;
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Returns a failed message to the queue, or dead-letters it once it has used up its
    /// deliveries.
    pub async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))?;

        if message.receive_count >= self.policy.max_receive_count {
            warn!(
                "Message {} exceeded {} deliveries, moving to dead-letter queue",
                message.message_id, self.policy.max_receive_count
            );
            let dead = message.delivery(receipt_handle.to_string());
            state.dead_letters.push(dead);
        } else {
            debug!(
                "Message {} will be redelivered (attempt {} of {})",
                message.message_id,
                message.receive_count + 1,
                self.policy.max_receive_count
            );
            state.ready.push_back(message);
        }
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Stops accepting new messages. Messages already queued are still delivered.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.changed.notify_waiters();
    }

    /// Waits until every message has been acked or dead-lettered.
    pub async fn wait_drained(&self) {
        loop {
            let changed = self.changed.notified();
            if self.state.lock().await.is_drained() {
                return;
            }
            changed.await;
        }
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn dead_letters(&self) -> Vec<QueueMessage> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Removes and returns dead-lettered messages for inspection.
    pub async fn drain_dead_letters(&self) -> Vec<QueueMessage> {
        std::mem::take(&mut self.state.lock().await.dead_letters)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish(&self, message: OutboundMessage) -> Result<String, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.next_id += 1;
        let message_id = format!("msg-{}", state.next_id);
        state.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: message.body,
            attributes: message.attributes,
            receive_count: 0,
        });
        drop(state);
        self.changed.notify_waiters();
        Ok(message_id)
    }
}
