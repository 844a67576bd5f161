//! Snapshot persistence.
//!
//! Reputation state is best-effort: every load validates the snapshot header
//! (schema version and age) before decoding the body, and anything
//! incompatible is discarded so the caller falls back to the built-in
//! catalog. Loading never fails.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::gateway_registry::GatewayRegistry;
use crate::error::Result;
use crate::models::snapshot::{
    RegistrySnapshot, RepairQueueSnapshot, ReputationEntry, ReputationHistory, SnapshotHeader,
    SNAPSHOT_SCHEMA_VERSION,
};
use crate::models::{Gateway, RepairStatus, RepairTask};
use crate::storage::KvStore;

pub const REGISTRY_KEY: &str = "gateway-registry";
pub const REPUTATION_KEY: &str = "gateway-reputation";
pub const REPAIR_QUEUE_KEY: &str = "repair-queue";

/// Live registry snapshots older than this are ignored.
pub const REGISTRY_TTL: Duration = Duration::from_secs(10 * 60);
/// Reputation history older than this is ignored.
pub const REPUTATION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Where the registry state came from on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Snapshot,
    ReputationHistory,
    BuiltinCatalog,
}

pub struct StatePersistence {
    store: Arc<dyn KvStore>,
}

impl StatePersistence {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.store.set(key, Bytes::from(body), ttl).await
    }

    /// Decode a snapshot if its header is compatible and it is young enough.
    async fn load<T: DeserializeOwned>(&self, key: &str, max_age: Option<Duration>) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read snapshot");
                return None;
            }
        };

        let header: SnapshotHeader = match serde_json::from_slice(&raw) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding snapshot without a valid header");
                return None;
            }
        };
        if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
            tracing::debug!(
                key,
                found = header.schema_version,
                expected = SNAPSHOT_SCHEMA_VERSION,
                "Discarding snapshot with incompatible schema"
            );
            return None;
        }
        if let Some(max_age) = max_age {
            let age = Utc::now().signed_duration_since(header.saved_at);
            if age.to_std().is_ok_and(|age| age > max_age) {
                tracing::debug!(key, saved_at = %header.saved_at, "Discarding stale snapshot");
                return None;
            }
        }

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable snapshot");
                None
            }
        }
    }

    pub async fn save_registry(&self, gateways: &[Gateway]) -> Result<()> {
        let snapshot = RegistrySnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            gateways: gateways.to_vec(),
        };
        self.save(REGISTRY_KEY, &snapshot, Some(REGISTRY_TTL)).await
    }

    pub async fn load_registry(&self) -> Option<Vec<Gateway>> {
        self.load::<RegistrySnapshot>(REGISTRY_KEY, Some(REGISTRY_TTL))
            .await
            .map(|s| s.gateways)
    }

    pub async fn save_reputation(&self, gateways: &[Gateway]) -> Result<()> {
        let history = ReputationHistory {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            entries: gateways.iter().map(ReputationEntry::from).collect(),
        };
        self.save(REPUTATION_KEY, &history, Some(REPUTATION_TTL)).await
    }

    pub async fn load_reputation(&self) -> Option<Vec<ReputationEntry>> {
        self.load::<ReputationHistory>(REPUTATION_KEY, Some(REPUTATION_TTL))
            .await
            .map(|h| h.entries)
    }

    /// Persist the non-terminal part of the repair queue.
    pub async fn save_repair_queue(&self, tasks: &[RepairTask]) -> Result<()> {
        let snapshot = RepairQueueSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            tasks: tasks
                .iter()
                .filter(|t| {
                    matches!(
                        t.status,
                        RepairStatus::Pending | RepairStatus::Failed | RepairStatus::Repairing
                    )
                })
                .cloned()
                .collect(),
        };
        self.save(REPAIR_QUEUE_KEY, &snapshot, None).await
    }

    /// Load the repair queue; interrupted `repairing` tasks come back as
    /// `pending`.
    pub async fn load_repair_queue(&self) -> Vec<RepairTask> {
        let Some(snapshot) = self.load::<RepairQueueSnapshot>(REPAIR_QUEUE_KEY, None).await else {
            return Vec::new();
        };
        snapshot
            .tasks
            .into_iter()
            .map(|mut task| {
                if task.status == RepairStatus::Repairing {
                    task.status = RepairStatus::Pending;
                }
                task
            })
            .collect()
    }

    /// Bring a registry that already holds the built-in catalog up to the
    /// freshest persisted state available.
    pub async fn restore_registry(&self, registry: &GatewayRegistry) -> RestoreSource {
        if let Some(gateways) = self.load_registry().await {
            let restored = registry.restore(gateways);
            tracing::info!(restored, "Restored gateway registry from snapshot");
            return RestoreSource::Snapshot;
        }
        if let Some(entries) = self.load_reputation().await {
            let applied = registry.apply_reputation(&entries);
            tracing::info!(applied, "Seeded gateway reputation from history");
            return RestoreSource::ReputationHistory;
        }
        tracing::info!("No usable snapshot, starting from built-in catalog");
        RestoreSource::BuiltinCatalog
    }
}
