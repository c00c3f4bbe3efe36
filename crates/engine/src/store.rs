//! Notification store: the JSON document shared with the display layer.
//!
//! The document is an array of records, newest-first. Every update is a
//! read-modify-write of the whole document, finished by writing a temp file
//! next to the target and renaming it over the target, so a concurrent reader
//! sees either the old or the new document and never a torn one.
//!
//! A missing or unparsable document reads as empty; the next successful
//! write replaces it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use ping_common::error::AppError;
use ping_common::types::{NotificationRecord, StorePolicy};

/// Default number of head records a commit checks for duplicate ids.
pub const DEFAULT_DEDUP_WINDOW: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("notifications document {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode notifications: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e.to_string())
    }
}

/// File-backed, deduplicating notification log.
pub struct NotificationStore {
    path: PathBuf,
    policy: StorePolicy,
    dedup_window: usize,
    /// Serializes read-modify-write cycles issued through this instance.
    write_lock: Mutex<()>,
}

impl NotificationStore {
    pub fn new(path: impl Into<PathBuf>, policy: StorePolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            write_lock: Mutex::new(()),
        }
    }

    /// Set how many head records a commit checks for duplicate ids.
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    /// Current records, newest-first. Missing or corrupt documents read as empty.
    pub async fn load(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        self.read_or_empty().await
    }

    /// Merge `records` (newest-first) into the document.
    ///
    /// Returns `Ok(false)` without touching the file when there is nothing to
    /// write: an empty batch, or a batch made only of records already present
    /// in the dedup window.
    pub async fn commit(&self, records: Vec<NotificationRecord>) -> Result<bool, StoreError> {
        if records.is_empty() {
            return Ok(false);
        }

        let _guard = self.write_lock.lock().await;
        let current = self.read_or_empty().await?;

        let incoming = records.len();
        let fresh = self.dedupe(records, &current);
        if fresh.is_empty() {
            tracing::debug!(incoming, "All records already stored, skipping write");
            return Ok(false);
        }

        let added = fresh.len();
        let merged = self.merge(fresh, &current);
        if merged == current {
            return Ok(false);
        }

        self.write_document(&merged).await?;
        tracing::info!(
            added,
            skipped = incoming - added,
            total = merged.len(),
            policy = %self.policy,
            "Committed notifications"
        );
        Ok(true)
    }

    /// Raise a single record (typically `system` or `task`).
    pub async fn push(&self, record: NotificationRecord) -> Result<bool, StoreError> {
        self.commit(vec![record]).await
    }

    /// Flip `read` on the record with `id`. Returns `false` if no such record exists.
    pub async fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_or_empty().await?;

        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if !record.read {
            record.read = true;
            self.write_document(&records).await?;
        }
        Ok(true)
    }

    /// Mark every record read. Returns how many records changed.
    pub async fn mark_all_read(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_or_empty().await?;

        let mut changed = 0;
        for record in records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.write_document(&records).await?;
        }
        Ok(changed)
    }

    /// Keep only the newest `keep` records. Returns how many were removed.
    pub async fn prune(&self, keep: usize) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_or_empty().await?;

        if records.len() <= keep {
            return Ok(0);
        }
        let removed = records.len() - keep;
        records.truncate(keep);
        self.write_document(&records).await?;

        tracing::info!(removed, kept = keep, "Pruned notifications");
        Ok(removed)
    }

    /// Drop records repeated inside the batch or already present in the head
    /// window of `current`. Records the policy is about to replace are not
    /// checked against `current`.
    fn dedupe(
        &self,
        records: Vec<NotificationRecord>,
        current: &[NotificationRecord],
    ) -> Vec<NotificationRecord> {
        let replaced = match self.policy {
            StorePolicy::ReplaceByKind(kind) => Some(kind),
            StorePolicy::AppendOnly => None,
        };

        let window: HashSet<&str> = current
            .iter()
            .take(self.dedup_window)
            .map(|r| r.id.as_str())
            .collect();

        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| {
                let stored = Some(r.kind) != replaced && window.contains(r.id.as_str());
                !stored && seen.insert(r.id.clone())
            })
            .collect()
    }

    fn merge(
        &self,
        fresh: Vec<NotificationRecord>,
        current: &[NotificationRecord],
    ) -> Vec<NotificationRecord> {
        match self.policy {
            StorePolicy::ReplaceByKind(kind) if fresh.iter().any(|r| r.kind == kind) => {
                let read_ids: HashSet<&str> = current
                    .iter()
                    .filter(|r| r.kind == kind && r.read)
                    .map(|r| r.id.as_str())
                    .collect();

                fresh
                    .into_iter()
                    .map(|mut r| {
                        r.read = r.read || read_ids.contains(r.id.as_str());
                        r
                    })
                    .chain(current.iter().filter(|r| r.kind != kind).cloned())
                    .collect()
            }
            _ => fresh.into_iter().chain(current.iter().cloned()).collect(),
        }
    }

    async fn read_or_empty(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        match self.read_document().await {
            Ok(records) => Ok(records),
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "Notifications document is corrupt, treating as empty"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_document(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }

        // Invalid UTF-8 is reported by serde_json as a syntax error.
        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_document(&self, records: &[NotificationRecord]) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let payload = serde_json::to_vec_pretty(records).map_err(StoreError::Encode)?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(write_err)?;

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }

        Ok(())
    }
}
