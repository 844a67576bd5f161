//! Probe result model.

use serde::{Deserialize, Serialize};

/// Outcome of one health check (all samples) against a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub available: bool,
    pub latency_ms: Option<u64>,
    pub reliability_pct: u8,
    pub cors_enabled: bool,
    pub range_support: bool,
    pub samples: u32,
    pub successes: u32,
    pub last_error: Option<String>,
}

impl ProbeResult {
    /// A result for a gateway that could not be reached at all.
    pub fn unreachable(samples: u32, error: impl Into<String>) -> Self {
        Self {
            available: false,
            latency_ms: None,
            reliability_pct: 0,
            cors_enabled: false,
            range_support: false,
            samples,
            successes: 0,
            last_error: Some(error.into()),
        }
    }
}
