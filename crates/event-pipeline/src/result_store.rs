// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key-value persistence for job results.
//!
//! Results are keyed by job id and every write is a wholesale overwrite: the last write
//! observed wins, whatever its timestamps say. Expiry is the store's own business, driven by
//! [`ResultStore::purge_expired`]; the consumer only stamps `expires_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::model::JobResult;

const STALE_TMP_MINUTES: i64 = 15;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Writes `result`, replacing any previous result for the same job id.
    async fn put(&self, result: &JobResult) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<JobResult>, StoreError>;

    /// Drops results whose expiry is at or before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<String, JobResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, result: &JobResult) -> Result<(), StoreError> {
        self.results
            .write()
            .await
            .insert(result.job_id.clone(), result.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobResult>, StoreError> {
        Ok(self.results.read().await.get(job_id).cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut results = self.results.write().await;
        let before = results.len();
        results.retain(|_, result| !result.is_expired(now));
        Ok(before - results.len())
    }
}

/// One JSON document per job under a directory.
///
/// Each write goes to a temporary file that is renamed over the final path, so readers never
/// see a partially written result.
#[derive(Debug)]
pub struct FileResultStore {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileResultStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !job_id.is_empty()
            && !job_id.starts_with('.')
            && !job_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidKey(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }

    /// Removes a temp file left behind by a write that never reached its rename.
    async fn remove_stale_tmp(&self, entry: &tokio::fs::DirEntry, now: DateTime<Utc>) {
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => {
                warn!("Skipping temp file {}: {e}", entry.path().display());
                return;
            }
        };
        // younger files may belong to a write still in progress
        if modified + chrono::Duration::minutes(STALE_TMP_MINUTES) > now {
            return;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => debug!("Removed stale temp file {}", entry.path().display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove stale temp file {}: {e}", entry.path().display()),
        }
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn put(&self, result: &JobResult) -> Result<(), StoreError> {
        let path = self.path_for(&result.job_id)?;
        let body = serde_json::to_vec_pretty(result)?;
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.dir.join(format!(".{}.{n}.tmp", result.job_id));

        tokio::fs::write(&tmp_path, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!("Wrote result for job {} to {}", result.job_id, path.display());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobResult>, StoreError> {
        let path = self.path_for(job_id)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') && file_name.ends_with(".tmp") {
                self.remove_stale_tmp(&entry, now).await;
                continue;
            }
            let is_result =
                path.extension().is_some_and(|e| e == "json") && !file_name.starts_with('.');
            if !is_result {
                continue;
            }
            let body = match tokio::fs::read(&path).await {
                Ok(body) => body,
                // raced with a concurrent purge or overwrite
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<JobResult>(&body) {
                Ok(result) if result.is_expired(now) => {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable result {}: {e}", path.display()),
            }
        }
        Ok(removed)
    }
}
