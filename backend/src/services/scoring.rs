//! Gateway health scoring.
//!
//! Maps a probe result plus prior reputation to a 0-100 health score. Speed
//! dominates the composite; reliability and region affinity break ties.
//! Failures decay the prior score with a penalty that compounds over
//! consecutive failures.

use chrono::{DateTime, Utc};

use crate::models::{Gateway, ProbeResult};

/// Weights and constants for the health score.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Score removed per failure, multiplied by the failure streak.
    pub failure_penalty: u32,
    /// Latency at or above which the latency component is zero.
    pub max_latency_ms: u64,
    /// Latency component at zero latency.
    pub base_score: u32,
    /// Reliability component at 100% reliability.
    pub success_bonus: u32,
    /// Flat bonus for gateways in a preferred region.
    pub region_bonus: u32,
    /// Bonus for a gateway with no current failure streak and a past success.
    pub consistency_bonus: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            failure_penalty: 10,
            max_latency_ms: 10_000,
            base_score: 100,
            success_bonus: 5,
            region_bonus: 15,
            consistency_bonus: 2,
        }
    }
}

// Composite weights in tenths: 0.5 latency, 0.3 reliability, 0.2 region
const LATENCY_WEIGHT: i64 = 5;
const RELIABILITY_WEIGHT: i64 = 3;
const REGION_WEIGHT: i64 = 2;
const WEIGHT_SCALE: i64 = 10;
const MAX_SCORE: i64 = 100;

/// Compute the new health score for `prior` after `probe`.
pub fn score(
    prior: &Gateway,
    probe: &ProbeResult,
    preferred_regions: &[String],
    config: &ScoringConfig,
) -> u8 {
    if !probe.available {
        let streak = i64::from(prior.consecutive_failures) + 1;
        let penalty = i64::from(config.failure_penalty).saturating_mul(streak);
        return clamp_score(i64::from(prior.health_score) - penalty);
    }

    let max_latency = i64::try_from(config.max_latency_ms).unwrap_or(i64::MAX);
    let latency_ms = probe
        .latency_ms
        .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX))
        .unwrap_or(max_latency)
        .min(max_latency);
    let latency_score = if max_latency == 0 {
        0
    } else {
        rounded_div(i64::from(config.base_score) * (max_latency - latency_ms), max_latency)
    };

    let reliability_bonus = rounded_div(
        i64::from(probe.reliability_pct.min(100)) * i64::from(config.success_bonus),
        100,
    );

    let region_bonus = if prior.in_regions(preferred_regions) {
        i64::from(config.region_bonus)
    } else {
        0
    };

    let mut composite = rounded_div(
        latency_score * LATENCY_WEIGHT
            + reliability_bonus * RELIABILITY_WEIGHT
            + region_bonus * REGION_WEIGHT,
        WEIGHT_SCALE,
    );

    if prior.consecutive_failures == 0 && prior.last_success_at.is_some() {
        composite += i64::from(config.consistency_bonus);
    }

    clamp_score(composite)
}

/// Non-negative division rounding halves up.
fn rounded_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2) / denominator
}

fn clamp_score(value: i64) -> u8 {
    value.clamp(0, MAX_SCORE) as u8
}

/// Fold a probe result into a gateway's reputation.
///
/// The score is computed from the prior state before any field changes.
/// Returns the new health score.
pub fn fold_probe(
    gateway: &mut Gateway,
    probe: &ProbeResult,
    preferred_regions: &[String],
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> u8 {
    let new_score = score(gateway, probe, preferred_regions, config);

    gateway.health_score = new_score;
    gateway.available = probe.available;
    gateway.reliability_pct = probe.reliability_pct.min(100);
    gateway.last_checked_at = Some(now);

    if probe.available {
        gateway.latency_ms = probe.latency_ms;
        gateway.failure_count = gateway.failure_count.saturating_sub(1);
        gateway.consecutive_failures = 0;
        gateway.last_success_at = Some(now);
    } else {
        gateway.latency_ms = None;
        gateway.failure_count = gateway.failure_count.saturating_add(1);
        gateway.consecutive_failures = gateway.consecutive_failures.saturating_add(1);
    }

    // Capability flags only ever upgrade; a probe that never got a response
    // tells us nothing about them.
    if probe.successes > 0 {
        merge_capability(&mut gateway.cors_enabled, probe.cors_enabled);
        merge_capability(&mut gateway.range_support, probe.range_support);
    }

    new_score
}

fn merge_capability(flag: &mut Option<bool>, observed: bool) {
    if observed {
        *flag = Some(true);
    } else if flag.is_none() {
        *flag = Some(false);
    }
}
