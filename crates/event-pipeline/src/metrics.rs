// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort metrics side channel.
//!
//! Emission never returns an error to the pipeline: a [`MetricsSink`] logs and drops whatever
//! it fails to send.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const SERVICE_NAME: &str = "event-pipeline";
pub const DEFAULT_METRIC_NAMESPACE: &str = "event_pipeline";
pub const DEFAULT_STATSD_PORT: u16 = 8125;

// Max DogStatsD datagram accepted by the agent with default settings
const MAX_PACKET_SIZE: usize = 8192;

pub mod names {
    pub const TRIGGER_INVOCATIONS: &str = "trigger.invocations";
    pub const TRIGGER_VALIDATION_LATENCY_MS: &str = "trigger.validation_latency_ms";
    pub const TRIGGER_FILE_SIZE_BYTES: &str = "trigger.file_size_bytes";
    pub const TRIGGER_FAILURES: &str = "trigger.failures";
    pub const WORKER_PROCESSING_LATENCY_MS: &str = "worker.processing_latency_ms";
    pub const WORKER_LINES_PROCESSED: &str = "worker.lines_processed";
    pub const WORKER_ERRORS_FOUND: &str = "worker.errors_found";
    pub const WORKER_MALFORMED_LINES: &str = "worker.malformed_lines";
    pub const WORKER_SUCCESS: &str = "worker.success";
    pub const WORKER_FAILURE: &str = "worker.failure";
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(f64),
    Gauge(f64),
    TimingMs(f64),
}

impl MetricValue {
    fn statsd_type(&self) -> &'static str {
        match self {
            MetricValue::Count(_) => "c",
            MetricValue::Gauge(_) => "g",
            MetricValue::TimingMs(_) => "ms",
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            MetricValue::Count(v) | MetricValue::Gauge(v) | MetricValue::TimingMs(v) => *v,
        }
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn emit_batch(&self, metrics: &[(&'static str, MetricValue)]);
}

/// Discards everything. Used when no metrics destination is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsSink for NoopMetrics {
    async fn emit_batch(&self, _metrics: &[(&'static str, MetricValue)]) {}
}

/// Sends metrics to a DogStatsD listener over UDP.
#[derive(Debug)]
pub struct StatsdMetrics {
    socket: UdpSocket,
    namespace: String,
    tags: String,
}

impl StatsdMetrics {
    pub async fn new(
        host: &str,
        port: u16,
        namespace: &str,
        environment: &str,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        debug!("Sending metrics to {host}:{port}");
        Ok(Self {
            socket,
            namespace: namespace.to_string(),
            tags: format!("env:{environment},service:{SERVICE_NAME}"),
        })
    }

    fn format_metric(&self, name: &str, value: &MetricValue) -> String {
        format!(
            "{}.{}:{}|{}|#{}",
            self.namespace,
            name,
            value.value(),
            value.statsd_type(),
            self.tags
        )
    }

    /// Packs metric lines into newline-separated datagrams no larger than the agent buffer.
    fn packets(&self, metrics: &[(&'static str, MetricValue)]) -> Vec<String> {
        let mut packets = Vec::new();
        let mut current = String::new();
        for (name, value) in metrics {
            let line = self.format_metric(name, value);
            if !current.is_empty() && current.len() + 1 + line.len() > MAX_PACKET_SIZE {
                packets.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&line);
        }
        if !current.is_empty() {
            packets.push(current);
        }
        packets
    }
}

#[async_trait]
impl MetricsSink for StatsdMetrics {
    async fn emit_batch(&self, metrics: &[(&'static str, MetricValue)]) {
        for packet in self.packets(metrics) {
            if let Err(e) = self.socket.send(packet.as_bytes()).await {
                warn!("Failed to emit metrics, dropping {} bytes: {e}", packet.len());
            }
        }
    }
}

/// Parses and validates a metric namespace.
///
/// A valid namespace starts with an ASCII letter and contains only ASCII alphanumerics,
/// underscores or periods. Surrounding whitespace is trimmed.
pub fn parse_metric_namespace(namespace: &str) -> Option<String> {
    let trimmed = namespace.trim();
    let mut chars = trimmed.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        Some(_) => {
            tracing::error!(
                "Metric namespace must start with a letter, got: '{}'. Ignoring namespace.",
                trimmed
            );
            return None;
        }
        None => return None,
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
    {
        tracing::error!(
            "Metric namespace contains invalid character '{}' in '{}'. Ignoring namespace.",
            invalid_char,
            trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}
