// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object storage the pipeline reads uploads from.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::debug;

use crate::errors::StorageError;
use crate::model::ObjectLocation;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streamed object content
pub type ObjectBody = Box<dyn AsyncBufRead + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Size and content type of an object, without reading it.
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StorageError>;

    /// Opens the object for streaming reads.
    async fn get(&self, location: &ObjectLocation) -> Result<ObjectBody, StorageError>;
}

/// Storage backed by a local directory, one sub-directory per bucket.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes an object, creating intermediate directories.
    pub async fn put(&self, location: &ObjectLocation, body: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| map_io_error(e, location))
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<PathBuf, StorageError> {
        let bucket = Path::new(&location.bucket);
        let key = Path::new(&location.key);
        let is_safe = |p: &Path| {
            p.components().count() > 0
                && p.components().all(|c| matches!(c, Component::Normal(_)))
        };
        if !is_safe(bucket) || bucket.components().count() != 1 || !is_safe(key) {
            return Err(StorageError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StorageError> {
        let path = self.resolve(location)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io_error(e, location))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
            });
        }
        Ok(ObjectMetadata {
            size: metadata.len(),
            content_type: content_type_for(&path).to_string(),
        })
    }

    async fn get(&self, location: &ObjectLocation) -> Result<ObjectBody, StorageError> {
        let path = self.resolve(location)?;
        debug!("Opening {}", path.display());
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io_error(e, location))?;
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

fn map_io_error(error: std::io::Error, location: &ObjectLocation) -> StorageError {
    match error.kind() {
        ErrorKind::NotFound => StorageError::NotFound {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        },
        ErrorKind::PermissionDenied => StorageError::AccessDenied {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        },
        _ => StorageError::Io(error),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => "application/json",
        Some("ndjson" | "jsonl") => "application/x-ndjson",
        Some("txt" | "log") => "text/plain",
        _ => "application/octet-stream",
    }
}
