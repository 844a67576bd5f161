//! Gateway health probing.
//!
//! Measures every registered gateway against known-good canary content,
//! folds the results into the registry's reputation and reports progress as
//! each gateway completes. Probing runs in a bounded worker pool; a probe
//! pass never fails as a whole, the worst outcome is "everything unavailable".

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::gateway_registry::GatewayRegistry;
use super::persistence::StatePersistence;
use super::scoring::{self, ScoringConfig};
use super::transport::{cancellable_sleep, with_cancel, GatewayTransport};
use crate::error::{AppError, Result};
use crate::models::{Gateway, ProbeResult};

/// Well-known content that every public gateway should be able to serve.
pub const DEFAULT_CANARY_CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

/// Gateways failing more than this many probes in a row get a cheap probe.
const DEGRADED_AFTER_FAILURES: u32 = 2;

/// Per-gateway probe settings.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub retries: u32,
    pub samples: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    /// Count a 404 as a response (the gateway is up, the canary is not pinned).
    pub tolerate_not_found: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            samples: 3,
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(500),
            tolerate_not_found: false,
        }
    }
}

impl ProbeOptions {
    /// Single attempt, no retries.
    pub fn reduced(&self) -> Self {
        Self {
            retries: 0,
            samples: 1,
            ..self.clone()
        }
    }
}

/// Prober configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub concurrency_limit: usize,
    pub options: ProbeOptions,
    /// Canary content ids; samples rotate through them.
    pub canary_content_ids: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            options: ProbeOptions::default(),
            canary_content_ids: vec![DEFAULT_CANARY_CID.to_string()],
        }
    }
}

/// Emitted once per gateway as soon as its probe has been folded in.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeProgress {
    pub gateway: Gateway,
    pub result: ProbeResult,
}

/// Health prober
#[derive(Clone)]
pub struct HealthProber {
    transport: Arc<dyn GatewayTransport>,
    config: ProbeConfig,
    scoring: ScoringConfig,
    preferred_regions: Vec<String>,
}

impl HealthProber {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        config: ProbeConfig,
        scoring: ScoringConfig,
        preferred_regions: Vec<String>,
    ) -> Self {
        Self {
            transport,
            config,
            scoring,
            preferred_regions,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn canary(&self, sample: u32) -> &str {
        let canaries = &self.config.canary_content_ids;
        if canaries.is_empty() {
            return DEFAULT_CANARY_CID;
        }
        &canaries[sample as usize % canaries.len()]
    }

    /// Probe one gateway. Only cancellation is an error; every network
    /// failure is reflected in the returned result.
    pub async fn probe_one(
        &self,
        gateway: &Gateway,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<ProbeResult> {
        let samples = options.samples.max(1);
        let mut latencies: Vec<u64> = Vec::with_capacity(samples as usize);
        let mut cors_enabled = false;
        let mut range_support = false;
        let mut last_error: Option<String> = None;

        for sample in 0..samples {
            let url = gateway.url_for(self.canary(sample));

            for attempt in 0..=options.retries {
                if attempt > 0 {
                    cancellable_sleep(cancel, options.retry_delay).await?;
                }

                let started = Instant::now();
                match with_cancel(cancel, self.transport.head(&url, options.timeout)).await {
                    Ok(resp) if resp.is_success() || (resp.status == 404 && options.tolerate_not_found) => {
                        latencies.push(started.elapsed().as_millis() as u64);
                        cors_enabled |= resp.cors_enabled;
                        range_support |= resp.range_support;
                        break;
                    }
                    Ok(resp) => {
                        last_error = Some(format!("HTTP {}", resp.status));
                    }
                    Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                    Err(e) => {
                        last_error = Some(e.to_string());
                    }
                }
            }
        }

        let successes = latencies.len() as u32;
        let reliability_pct = ((200 * successes + samples) / (2 * samples)).min(100) as u8;

        let result = ProbeResult {
            available: successes > 0 && reliability_pct >= 50,
            latency_ms: mean_latency(latencies),
            reliability_pct,
            cors_enabled,
            range_support,
            samples,
            successes,
            last_error: if successes == samples { None } else { last_error },
        };

        tracing::debug!(
            gateway = %gateway.name,
            available = result.available,
            latency_ms = ?result.latency_ms,
            reliability_pct = result.reliability_pct,
            "Gateway probed"
        );

        Ok(result)
    }

    fn options_for(&self, gateway: &Gateway) -> ProbeOptions {
        if gateway.consecutive_failures > DEGRADED_AFTER_FAILURES {
            self.config.options.reduced()
        } else {
            self.config.options.clone()
        }
    }

    /// Dispatch order: preferred regions in the caller's order, then
    /// priority, then name.
    fn dispatch_order(&self, mut gateways: Vec<Gateway>) -> Vec<Gateway> {
        let region_rank = |gw: &Gateway| {
            self.preferred_regions
                .iter()
                .position(|r| r.eq_ignore_ascii_case(&gw.region))
                .unwrap_or(self.preferred_regions.len())
        };
        gateways.sort_by(|a, b| {
            region_rank(a)
                .cmp(&region_rank(b))
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        gateways
    }

    /// Probe every registered gateway with bounded concurrency.
    ///
    /// Each result is scored and written back as soon as it completes.
    /// Returns the whole registry sorted available-first, then by score and
    /// latency.
    pub async fn probe_all(
        &self,
        registry: &Arc<GatewayRegistry>,
        progress: Option<mpsc::Sender<ProbeProgress>>,
        cancel: &CancellationToken,
    ) -> Vec<Gateway> {
        let run_id = Uuid::new_v4();
        let gateways = self.dispatch_order(registry.list());
        let started = Instant::now();
        tracing::info!(%run_id, count = gateways.len(), "Starting probe pass");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let mut joinset = JoinSet::new();

        for gateway in gateways {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let prober = self.clone();
            let registry = registry.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();

            joinset.spawn(async move {
                let _permit = permit;
                let options = prober.options_for(&gateway);
                let result = match prober.probe_one(&gateway, &options, &cancel).await {
                    Ok(result) => result,
                    Err(_) => return,
                };

                let updated = registry.update(&gateway.name, |gw| {
                    scoring::fold_probe(gw, &result, &prober.preferred_regions, &prober.scoring, Utc::now());
                    gw.clone()
                });

                if let (Some(tx), Some(gateway)) = (progress, updated) {
                    let _ = tx.send(ProbeProgress { gateway, result }).await;
                }
            });
        }

        while let Some(res) = joinset.join_next().await {
            if let Err(e) = res {
                tracing::warn!(%run_id, error = %e, "Probe task panicked");
            }
        }

        let mut gateways = registry.list();
        sort_by_health(&mut gateways);

        let available = gateways.iter().filter(|g| g.available).count();
        tracing::info!(
            %run_id,
            available,
            total = gateways.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            cancelled = cancel.is_cancelled(),
            "Probe pass finished"
        );

        gateways
    }
}

/// Mean of successful latencies, dropping the single slowest sample when
/// there are at least three.
fn mean_latency(mut latencies: Vec<u64>) -> Option<u64> {
    if latencies.is_empty() {
        return None;
    }
    latencies.sort_unstable();
    if latencies.len() >= 3 {
        latencies.pop();
    }
    let count = latencies.len() as u64;
    let sum: u64 = latencies.iter().sum();
    Some((sum + count / 2) / count)
}

/// Available first, then score descending, then latency ascending.
pub fn sort_by_health(gateways: &mut [Gateway]) {
    gateways.sort_by(|a, b| {
        b.available
            .cmp(&a.available)
            .then_with(|| b.health_score.cmp(&a.health_score))
            .then_with(|| {
                let latency = |g: &Gateway| g.latency_ms.unwrap_or(u64::MAX);
                latency(a).cmp(&latency(b))
            })
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Re-probe the registry every `interval` until `cancel` fires, persisting
/// the registry and reputation history after each pass.
pub fn spawn_probe_loop(
    prober: Arc<HealthProber>,
    registry: Arc<GatewayRegistry>,
    persistence: Option<Arc<StatePersistence>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let gateways = prober.probe_all(&registry, None, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            if let Some(persistence) = &persistence {
                if let Err(e) = persistence.save_registry(&gateways).await {
                    tracing::warn!(error = %e, "Failed to persist gateway registry");
                }
                if let Err(e) = persistence.save_reputation(&gateways).await {
                    tracing::warn!(error = %e, "Failed to persist reputation history");
                }
            }

            if cancellable_sleep(&cancel, interval).await.is_err() {
                break;
            }
        }
        tracing::info!("Probe loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewaySeed;
    use crate::services::transport::mock::{MockTransport, Reply};

    fn seed(name: &str, region: &str, priority: u32) -> GatewaySeed {
        GatewaySeed {
            name: name.into(),
            url_template: format!("https://{}/ipfs/", name),
            region: region.into(),
            priority,
        }
    }

    fn fast_options() -> ProbeOptions {
        ProbeOptions {
            retries: 1,
            samples: 3,
            timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(1),
            tolerate_not_found: false,
        }
    }

    fn prober(transport: Arc<MockTransport>, concurrency_limit: usize) -> HealthProber {
        HealthProber::new(
            transport,
            ProbeConfig {
                concurrency_limit,
                options: fast_options(),
                canary_content_ids: vec!["canary".into()],
            },
            ScoringConfig::default(),
            vec!["local".into()],
        )
    }

    #[test]
    fn test_mean_latency_drops_slowest() {
        assert_eq!(mean_latency(vec![]), None);
        assert_eq!(mean_latency(vec![40]), Some(40));
        assert_eq!(mean_latency(vec![10, 30]), Some(20));
        assert_eq!(mean_latency(vec![10, 5000, 20]), Some(15));
    }

    #[test]
    fn test_reduced_options() {
        let reduced = fast_options().reduced();
        assert_eq!(reduced.retries, 0);
        assert_eq!(reduced.samples, 1);
        assert_eq!(reduced.timeout, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_probe_one_healthy_gateway() {
        let transport = MockTransport::new();
        transport.route("https://a.test/", Reply::ok(5).with_caps(true, true));
        let gw = Gateway::from_seed(seed("a.test", "local", 0), false);

        let result = prober(transport.clone(), 4)
            .probe_one(&gw, &fast_options(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.available);
        assert_eq!(result.reliability_pct, 100);
        assert_eq!(result.successes, 3);
        assert!(result.latency_ms.is_some());
        assert!(result.cors_enabled && result.range_support);
        assert!(result.last_error.is_none());
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_probe_one_unreachable_retries() {
        let transport = MockTransport::new();
        let gw = Gateway::from_seed(seed("down.test", "local", 0), false);

        let result = prober(transport.clone(), 4)
            .probe_one(&gw, &fast_options(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.available);
        assert_eq!(result.reliability_pct, 0);
        assert_eq!(result.latency_ms, None);
        assert!(result.last_error.is_some());
        // 3 samples x (1 try + 1 retry)
        assert_eq!(transport.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_probe_one_not_found_handling() {
        let transport = MockTransport::new();
        transport.route("https://nf.test/", Reply::status(404));
        let gw = Gateway::from_seed(seed("nf.test", "local", 0), false);
        let p = prober(transport, 4);

        let strict = p.probe_one(&gw, &fast_options(), &CancellationToken::new()).await.unwrap();
        assert!(!strict.available);
        assert_eq!(strict.last_error.as_deref(), Some("HTTP 404"));

        let tolerant = ProbeOptions {
            tolerate_not_found: true,
            ..fast_options()
        };
        let lenient = p.probe_one(&gw, &tolerant, &CancellationToken::new()).await.unwrap();
        assert!(lenient.available);
    }

    #[tokio::test]
    async fn test_probe_one_cancelled() {
        let transport = MockTransport::new();
        transport.route("https://slow.test/", Reply::hang());
        let gw = Gateway::from_seed(seed("slow.test", "local", 0), false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = prober(transport, 4).probe_one(&gw, &fast_options(), &cancel).await;
        assert!(matches!(res, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_probe_all_respects_concurrency_limit() {
        let transport = MockTransport::new();
        let registry = Arc::new(GatewayRegistry::new());
        for i in 0..12 {
            let name = format!("gw{}.test", i);
            transport.route(format!("https://{}/", name), Reply::ok(15));
            registry.register(seed(&name, "international", i)).unwrap();
        }

        let gateways = prober(transport.clone(), 3)
            .probe_all(&registry, None, &CancellationToken::new())
            .await;

        assert_eq!(gateways.len(), 12);
        assert!(gateways.iter().all(|g| g.available));
        assert!(transport.max_in_flight() <= 3, "saw {}", transport.max_in_flight());
        assert!(transport.max_in_flight() >= 2);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_probe_all_reports_progress_and_sorts() {
        let transport = MockTransport::new();
        transport.route("https://fast.test/", Reply::ok(1));
        transport.route("https://slow.test/", Reply::ok(120));
        let registry = Arc::new(GatewayRegistry::new());
        registry.register(seed("fast.test", "international", 5)).unwrap();
        registry.register(seed("slow.test", "international", 0)).unwrap();
        registry.register(seed("dead.test", "local", 0)).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let gateways = prober(transport, 8)
            .probe_all(&registry, Some(tx), &CancellationToken::new())
            .await;

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p.gateway.name);
        }
        seen.sort();
        assert_eq!(seen, vec!["dead.test", "fast.test", "slow.test"]);

        let names: Vec<_> = gateways.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["fast.test", "slow.test", "dead.test"]);
        assert!(!gateways[2].available);
        assert_eq!(gateways[2].consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_degraded_gateway_gets_reduced_probe() {
        let transport = MockTransport::new();
        let registry = Arc::new(GatewayRegistry::new());
        registry.register(seed("flaky.test", "international", 0)).unwrap();
        registry.update("flaky.test", |gw| gw.consecutive_failures = 3);

        prober(transport.clone(), 2)
            .probe_all(&registry, None, &CancellationToken::new())
            .await;

        assert_eq!(transport.calls().len(), 1);
        assert_eq!(registry.get("flaky.test").unwrap().consecutive_failures, 4);
    }

    #[tokio::test]
    async fn test_dispatch_prefers_regions_then_priority() {
        let transport = MockTransport::new();
        let p = prober(transport, 1);
        let ordered = p.dispatch_order(vec![
            Gateway::from_seed(seed("intl-0", "international", 0), false),
            Gateway::from_seed(seed("local-5", "local", 5), false),
            Gateway::from_seed(seed("local-1", "local", 1), false),
        ]);
        let names: Vec<_> = ordered.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["local-1", "local-5", "intl-0"]);
    }

    #[tokio::test]
    async fn test_cancelled_pass_does_not_fold() {
        let transport = MockTransport::new();
        transport.route("https://hang.test/", Reply::hang());
        let registry = Arc::new(GatewayRegistry::new());
        registry.register(seed("hang.test", "international", 0)).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        prober(transport.clone(), 2).probe_all(&registry, None, &cancel).await;

        let gw = registry.get("hang.test").unwrap();
        assert!(gw.last_checked_at.is_none());
        assert_eq!(gw.consecutive_failures, 0);
        assert_eq!(transport.in_flight(), 0);
    }
}
