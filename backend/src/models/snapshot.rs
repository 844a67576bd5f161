//! Versioned snapshot formats for persisted state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gateway::Gateway;
use super::repair_task::RepairTask;

/// Schema version of every snapshot written by this build.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

/// Header decoded before the body so incompatible blobs can be rejected
/// without touching their payload.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SnapshotHeader {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
}

/// Live registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub gateways: Vec<Gateway>,
}

/// Long-lived reputation for one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationEntry {
    pub name: String,
    pub health_score: u8,
    pub reliability_pct: u8,
    pub failure_count: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl From<&Gateway> for ReputationEntry {
    fn from(gw: &Gateway) -> Self {
        Self {
            name: gw.name.clone(),
            health_score: gw.health_score,
            reliability_pct: gw.reliability_pct,
            failure_count: gw.failure_count,
            last_success_at: gw.last_success_at,
        }
    }
}

/// Reputation history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationHistory {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<ReputationEntry>,
}

/// Repair queue snapshot (pending, failed and repairing tasks only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairQueueSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<RepairTask>,
}
