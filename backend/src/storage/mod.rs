//! Key/value stores for persisted gateway and repair state.

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

/// TTL-aware key/value store trait
///
/// Implementations must treat an expired entry exactly like a missing one.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve a value, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}
