// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-pass statistics over the lines of one log file.
//!
//! An [`Aggregator`] is owned by exactly one job attempt and is never shared, so it carries no
//! synchronization. Every reduction (count, sum, max, set union) is commutative, so the final
//! [`Aggregation`] does not depend on line order. Memory grows only with the number of distinct
//! user ids and endpoints.

use hashbrown::{HashMap, HashSet};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{debug, trace};

use crate::decoder::{decode_line, DecodeError, Decoded};
use crate::errors::JobError;
use crate::model::{Level, LogRecord};

/// Longest accepted line, in bytes, excluding the newline
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Running totals for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Non-empty lines seen, decodable or not
    pub total_lines: u64,
    /// Lines that decoded into a record
    pub processed_lines: u64,
    /// Non-empty lines that failed to decode
    pub malformed_lines: u64,
    pub error_count: u64,
    pub warn_count: u64,
    pub info_count: u64,
    pub debug_count: u64,
    pub total_response_ms: u64,
    pub max_response_ms: u64,
    pub users: HashSet<String>,
    pub endpoints: HashSet<String>,
    pub status_codes: HashMap<u32, u64>,
}

impl Aggregation {
    /// Mean response time over processed lines, 0 when nothing was processed.
    pub fn avg_response_ms(&self) -> f64 {
        if self.processed_lines == 0 {
            return 0.0;
        }
        self.total_response_ms as f64 / self.processed_lines as f64
    }

    pub fn unique_users(&self) -> usize {
        self.users.len()
    }

    pub fn unique_endpoints(&self) -> usize {
        self.endpoints.len()
    }
}

#[derive(Debug)]
pub struct Aggregator {
    aggregation: Aggregation,
    max_line_bytes: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl Aggregator {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            aggregation: Aggregation::default(),
            max_line_bytes,
        }
    }

    /// Feeds one raw line, without its trailing newline.
    pub fn ingest(&mut self, line: impl AsRef<[u8]>) {
        if let Some(e) = self.ingest_line(line.as_ref()) {
            trace!("Skipping malformed line: {e}");
        }
    }

    /// Current totals. Only meaningful once the input is exhausted.
    pub fn snapshot(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn into_aggregation(self) -> Aggregation {
        self.aggregation
    }

    /// Reads `reader` to the end, feeding every line to [`Aggregator::ingest`].
    ///
    /// Malformed lines are counted and skipped. Only a failing reader or a line longer than
    /// the configured limit aborts the pass.
    pub async fn ingest_stream<R>(&mut self, mut reader: R) -> Result<(), JobError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::with_capacity(READ_BUFFER_CAPACITY);
        let mut line_number: u64 = 0;
        // room for a trailing \r\n, so a full-length CRLF line still fits in one read
        let limit = self.max_line_bytes as u64 + 2;

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .await
                .map_err(JobError::Read)?;
            if read == 0 {
                break;
            }
            line_number += 1;

            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.len() > self.max_line_bytes {
                return Err(JobError::LineTooLong {
                    line_number,
                    limit: self.max_line_bytes,
                });
            }

            if let Some(e) = self.ingest_line(&buf) {
                trace!("Skipping malformed line {line_number}: {e}");
            }
        }

        debug!(
            "Aggregated {} lines ({} processed, {} malformed)",
            self.aggregation.total_lines,
            self.aggregation.processed_lines,
            self.aggregation.malformed_lines
        );
        Ok(())
    }

    fn ingest_line(&mut self, line: &[u8]) -> Option<DecodeError> {
        match decode_line(line) {
            Decoded::Blank => None,
            Decoded::Record(record) => {
                self.aggregation.total_lines += 1;
                self.record(record);
                None
            }
            Decoded::Malformed(e) => {
                self.aggregation.total_lines += 1;
                self.aggregation.malformed_lines += 1;
                Some(e)
            }
        }
    }

    fn record(&mut self, record: LogRecord) {
        let agg = &mut self.aggregation;
        agg.processed_lines += 1;

        match record.level {
            Level::Error => agg.error_count += 1,
            Level::Warn => agg.warn_count += 1,
            Level::Info => agg.info_count += 1,
            Level::Debug => agg.debug_count += 1,
            Level::Other => {}
        }

        agg.total_response_ms = agg.total_response_ms.saturating_add(record.response_time_ms);
        agg.max_response_ms = agg.max_response_ms.max(record.response_time_ms);

        if let Some(user_id) = record.user_id.filter(|u| !u.is_empty()) {
            agg.users.insert(user_id);
        }
        if let Some(endpoint) = record.endpoint.filter(|e| !e.is_empty()) {
            agg.endpoints.insert(endpoint);
        }
        if record.status_code > 0 {
            *agg.status_codes.entry(record.status_code).or_insert(0) += 1;
        }
    }
}
