//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::services::download_race::RaceOptions;
use crate::services::health_prober::ProbeConfig;
use crate::services::repair_service::RepairConfig;
use crate::services::scoring::ScoringConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (host:port)
    pub bind_address: String,

    /// Directory for persisted snapshots; in-memory store when unset
    pub state_path: Option<String>,

    /// Remote JSON catalog of additional gateways (optional)
    pub catalog_url: Option<String>,

    /// Regions that receive the scoring region bonus and are probed first
    pub preferred_regions: Vec<String>,

    /// Interval between background probe passes
    pub probe_interval: Duration,

    /// Health prober settings
    pub probe: ProbeConfig,

    /// Health score weights
    pub scoring: ScoringConfig,

    /// Download race settings
    pub race: RaceOptions,

    /// Whether the auto-repair service runs
    pub repair_enabled: bool,

    /// Auto-repair settings
    pub repair: RepairConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            state_path: None,
            catalog_url: None,
            preferred_regions: vec![crate::models::gateway::REGION_LOCAL.to_string()],
            probe_interval: Duration::from_secs(300),
            probe: ProbeConfig::default(),
            scoring: ScoringConfig::default(),
            race: RaceOptions::default(),
            repair_enabled: true,
            repair: RepairConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let preferred_regions = env::var("PREFERRED_REGIONS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.preferred_regions);

        let mut probe = defaults.probe;
        probe.concurrency_limit = env_or("PROBE_CONCURRENCY", probe.concurrency_limit);
        probe.options.samples = env_or("PROBE_SAMPLES", probe.options.samples);
        probe.options.retries = env_or("PROBE_RETRIES", probe.options.retries);
        probe.options.timeout = secs_or("PROBE_TIMEOUT_SECS", probe.options.timeout);
        if let Ok(canaries) = env::var("PROBE_CANARY_CIDS") {
            probe.canary_content_ids = split_list(&canaries);
        }
        if probe.canary_content_ids.is_empty() {
            return Err(AppError::Config(
                "PROBE_CANARY_CIDS must name at least one content id".into(),
            ));
        }
        if probe.concurrency_limit == 0 {
            return Err(AppError::Config("PROBE_CONCURRENCY must be at least 1".into()));
        }

        let mut race = defaults.race;
        race.batch_size = env_or("RACE_BATCH_SIZE", race.batch_size).max(1);
        race.per_attempt_timeout = secs_or("RACE_TIMEOUT_SECS", race.per_attempt_timeout);
        race.overall_deadline = secs_or("RACE_DEADLINE_SECS", race.overall_deadline);

        let mut repair = defaults.repair;
        repair.scan_interval = secs_or("REPAIR_SCAN_INTERVAL_SECS", repair.scan_interval);
        repair.concurrency = env_or("REPAIR_CONCURRENCY", repair.concurrency).max(1);
        repair.max_attempts = env_or("REPAIR_MAX_ATTEMPTS", repair.max_attempts).max(1);
        repair.retry_delay = secs_or("REPAIR_RETRY_DELAY_SECS", repair.retry_delay);
        repair.download_timeout = secs_or("REPAIR_DOWNLOAD_TIMEOUT_SECS", repair.download_timeout);
        if let Ok(refs) = env::var("REPAIR_REFERENCE_GATEWAYS") {
            repair.reference_gateways = split_list(&refs);
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            state_path: env::var("STATE_PATH").ok().filter(|p| !p.is_empty()),
            catalog_url: env::var("GATEWAY_CATALOG_URL").ok().filter(|u| !u.is_empty()),
            preferred_regions,
            probe_interval: secs_or("PROBE_INTERVAL_SECS", defaults.probe_interval),
            probe,
            scoring: defaults.scoring,
            race,
            repair_enabled: env_or("REPAIR_ENABLED", defaults.repair_enabled),
            repair,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" local, international ,,"), vec!["local", "international"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.probe.concurrency_limit, 8);
        assert_eq!(config.race.batch_size, 3);
        assert_eq!(config.repair.concurrency, 3);
        assert_eq!(config.probe_interval, Duration::from_secs(300));
        assert_eq!(config.preferred_regions, vec!["local"]);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or::<u32>("GATEWAY_KEEPER_TEST_UNSET_VAR", 7), 7);
    }
}
