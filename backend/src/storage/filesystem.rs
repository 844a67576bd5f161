//! Filesystem key/value store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::KvStore;
use crate::error::{AppError, Result};

/// On-disk envelope carrying the expiry next to the value
#[derive(Serialize, Deserialize)]
struct Envelope {
    expires_at: Option<DateTime<Utc>>,
    value: serde_json::Value,
}

/// Filesystem-based store; one JSON file per key
///
/// Values must be JSON documents, which is what every snapshot is.
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create new filesystem store
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Get full path for a key (anything outside `[A-Za-z0-9._-]` becomes `_`)
    fn key_to_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(format!("{}.json", file))
    }
}

#[async_trait]
impl KvStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.key_to_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Storage(format!("Failed to read {}: {}", key, e)));
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable store entry");
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if envelope.expires_at.is_some_and(|at| at <= Utc::now()) {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(Bytes::from(serde_json::to_vec(&envelope.value)?)))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let value: serde_json::Value = serde_json::from_slice(&value)
            .map_err(|e| AppError::Storage(format!("Value for {} is not JSON: {}", key, e)))?;
        let expires_at = match ttl {
            Some(ttl) => Some(
                Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| AppError::Storage(format!("Invalid TTL: {}", e)))?,
            ),
            None => None,
        };
        let body = serde_json::to_vec(&Envelope { expires_at, value })?;

        fs::create_dir_all(&self.base_path).await?;

        // Each write gets its own temp file; the rename is the commit point
        let path = self.key_to_path(key);
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::Storage(format!("Failed to write {}: {}", key, e)));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }
}
