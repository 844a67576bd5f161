//! Gateway model: one third-party retrieval endpoint and its reputation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health score assigned to a gateway that has never been probed.
pub const DEFAULT_HEALTH_SCORE: u8 = 50;

/// Region tag for gateways close to the user.
pub const REGION_LOCAL: &str = "local";

/// Region tag for globally distributed gateways.
pub const REGION_INTERNATIONAL: &str = "international";

/// Minimal catalog entry for a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySeed {
    pub name: String,
    pub url_template: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub priority: u32,
}

fn default_region() -> String {
    REGION_INTERNATIONAL.to_string()
}

/// A retrieval gateway with mutable reputation.
///
/// `latency_ms` is `None` while the gateway is unknown or unreachable.
/// `cors_enabled` and `range_support` are sticky: once observed as `true`
/// they are never reset by a failed probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    pub url_template: String,
    pub region: String,
    pub priority: u32,
    pub custom: bool,
    pub available: bool,
    pub latency_ms: Option<u64>,
    pub reliability_pct: u8,
    pub health_score: u8,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub cors_enabled: Option<bool>,
    pub range_support: Option<bool>,
}

impl Gateway {
    /// Create a never-probed gateway from a catalog seed.
    pub fn from_seed(seed: GatewaySeed, custom: bool) -> Self {
        Self {
            name: seed.name,
            url_template: seed.url_template,
            region: seed.region,
            priority: seed.priority,
            custom,
            available: false,
            latency_ms: None,
            reliability_pct: 0,
            health_score: DEFAULT_HEALTH_SCORE,
            failure_count: 0,
            consecutive_failures: 0,
            last_success_at: None,
            last_checked_at: None,
            cors_enabled: None,
            range_support: None,
        }
    }

    /// Retrieval URL for a content id.
    pub fn url_for(&self, content_id: &str) -> String {
        if self.url_template.ends_with('/') {
            format!("{}{}", self.url_template, content_id)
        } else {
            format!("{}/{}", self.url_template, content_id)
        }
    }

    pub fn seed(&self) -> GatewaySeed {
        GatewaySeed {
            name: self.name.clone(),
            url_template: self.url_template.clone(),
            region: self.region.clone(),
            priority: self.priority,
        }
    }

    pub fn supports_cors(&self) -> bool {
        self.cors_enabled == Some(true)
    }

    pub fn supports_range(&self) -> bool {
        self.range_support == Some(true)
    }

    /// Whether the gateway is in one of the caller's preferred regions.
    pub fn in_regions(&self, regions: &[String]) -> bool {
        regions.iter().any(|r| r.eq_ignore_ascii_case(&self.region))
    }
}

/// Validate a seed before registration.
pub fn validate_seed(seed: &GatewaySeed) -> crate::error::Result<()> {
    use crate::error::AppError;

    if seed.name.trim().is_empty() {
        return Err(AppError::Validation("gateway name must not be empty".into()));
    }
    if !(seed.url_template.starts_with("http://") || seed.url_template.starts_with("https://")) {
        return Err(AppError::Validation(format!(
            "gateway url_template must be an http(s) URL: {}",
            seed.url_template
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(url: &str) -> GatewaySeed {
        GatewaySeed {
            name: "ipfs.io".into(),
            url_template: url.into(),
            region: REGION_INTERNATIONAL.into(),
            priority: 1,
        }
    }

    #[test]
    fn test_url_for_with_trailing_slash() {
        let gw = Gateway::from_seed(seed("https://ipfs.io/ipfs/"), false);
        assert_eq!(gw.url_for("bafyabc"), "https://ipfs.io/ipfs/bafyabc");
    }

    #[test]
    fn test_url_for_without_trailing_slash() {
        let gw = Gateway::from_seed(seed("https://ipfs.io/ipfs"), false);
        assert_eq!(gw.url_for("bafyabc"), "https://ipfs.io/ipfs/bafyabc");
    }

    #[test]
    fn test_from_seed_defaults() {
        let gw = Gateway::from_seed(seed("https://ipfs.io/ipfs/"), true);
        assert!(gw.custom);
        assert!(!gw.available);
        assert_eq!(gw.latency_ms, None);
        assert_eq!(gw.health_score, DEFAULT_HEALTH_SCORE);
        assert_eq!(gw.reliability_pct, 0);
        assert!(!gw.supports_cors());
        assert!(!gw.supports_range());
    }

    #[test]
    fn test_in_regions_case_insensitive() {
        let mut gw = Gateway::from_seed(seed("https://ipfs.io/ipfs/"), false);
        gw.region = "Local".into();
        assert!(gw.in_regions(&["local".to_string()]));
        assert!(!gw.in_regions(&["international".to_string()]));
        assert!(!gw.in_regions(&[]));
    }

    #[test]
    fn test_validate_seed() {
        assert!(validate_seed(&seed("https://ipfs.io/ipfs/")).is_ok());
        assert!(validate_seed(&seed("ftp://ipfs.io/")).is_err());
        let mut blank = seed("https://ipfs.io/ipfs/");
        blank.name = "  ".into();
        assert!(validate_seed(&blank).is_err());
    }

    #[test]
    fn test_seed_deserialization_defaults() {
        let seed: GatewaySeed =
            serde_json::from_str(r#"{"name":"x","url_template":"https://x/ipfs/"}"#).unwrap();
        assert_eq!(seed.region, REGION_INTERNATIONAL);
        assert_eq!(seed.priority, 0);
    }
}
