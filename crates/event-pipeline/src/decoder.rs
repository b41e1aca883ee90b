// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decodes one NDJSON line into a [`LogRecord`].
//!
//! Decoding never fails past this boundary: a malformed line comes back as
//! [`Decoded::Malformed`] so the caller can count it and move on to the next line.

use crate::model::LogRecord;

/// Reason a non-empty line could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("invalid log record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub enum Decoded {
    /// Empty or whitespace-only line
    Blank,
    Record(LogRecord),
    Malformed(DecodeError),
}

/// Decodes a single line, without its trailing newline.
pub fn decode_line(line: &[u8]) -> Decoded {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Decoded::Blank;
    }
    // serde would also accept a JSON array for a struct, which is not a valid record
    if trimmed[0] != b'{' {
        return Decoded::Malformed(DecodeError::NotAnObject);
    }
    match serde_json::from_slice::<LogRecord>(trimmed) {
        Ok(record) => Decoded::Record(record),
        Err(e) => Decoded::Malformed(DecodeError::Json(e)),
    }
}
