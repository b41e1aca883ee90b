// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use chrono::Utc;
use event_pipeline::{
    model::{ObjectLocation, StorageEvent, StorageEventRecord},
    storage::LocalObjectStorage,
};

pub const BUCKET: &str = "uploads";

/// Writes an upload made of `lines`, newline terminated
pub async fn upload(storage: &LocalObjectStorage, key: &str, lines: &[&str]) {
    let mut body = lines.join("\n");
    body.push('\n');
    storage
        .put(&ObjectLocation::new(BUCKET, key), body.as_bytes())
        .await
        .expect("Failed to write test upload");
}

/// Storage event with one record per key, all in [`BUCKET`]
pub fn storage_event(keys: &[&str]) -> StorageEvent {
    StorageEvent {
        records: keys
            .iter()
            .map(|key| StorageEventRecord::new(BUCKET, key, Utc::now()))
            .collect(),
    }
}
