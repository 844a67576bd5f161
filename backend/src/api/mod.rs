//! API module - HTTP handlers and routes.

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::services::download_race::DownloadRace;
use crate::services::gateway_registry::GatewayRegistry;
use crate::services::health_prober::HealthProber;
use crate::services::persistence::StatePersistence;
use crate::services::repair_service::{FileRecordStore, RepairDeps, RepairService};
use crate::services::transport::GatewayTransport;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub registry: Arc<GatewayRegistry>,
    pub prober: Arc<HealthProber>,
    pub race: Arc<DownloadRace>,
    pub repair: Arc<RepairService>,
    pub persistence: Option<Arc<StatePersistence>>,
    /// Cancelled on shutdown; request-scoped work runs on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire every service around one transport and one registry.
    pub fn new(
        config: Config,
        transport: Arc<dyn GatewayTransport>,
        registry: Arc<GatewayRegistry>,
        persistence: Option<Arc<StatePersistence>>,
        records: Arc<dyn FileRecordStore>,
    ) -> Self {
        let prober = Arc::new(HealthProber::new(
            transport.clone(),
            config.probe.clone(),
            config.scoring.clone(),
            config.preferred_regions.clone(),
        ));
        let race = Arc::new(DownloadRace::new(transport.clone(), config.race.clone()));
        let repair = Arc::new(RepairService::new(
            config.repair.clone(),
            RepairDeps {
                transport,
                registry: registry.clone(),
                prober: prober.clone(),
                records,
                persistence: persistence.clone(),
            },
        ));

        Self {
            config,
            registry,
            prober,
            race,
            repair,
            persistence,
            shutdown: CancellationToken::new(),
        }
    }
}

pub type SharedState = Arc<AppState>;
