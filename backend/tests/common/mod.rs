//! Common test utilities for backend integration and handler tests
//!
//! - Fake gateways: in-process axum servers on ephemeral ports
//! - Test configuration with short timeouts
//! - Application state wired to the real HTTP transport

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;

use gateway_keeper_backend::api::{AppState, SharedState};
use gateway_keeper_backend::config::Config;
use gateway_keeper_backend::error::Result;
use gateway_keeper_backend::models::GatewaySeed;
use gateway_keeper_backend::services::gateway_registry::GatewayRegistry;
use gateway_keeper_backend::services::persistence::StatePersistence;
use gateway_keeper_backend::services::repair_service::FileRecordStore;
use gateway_keeper_backend::services::transport::HttpTransport;

/// Content id every healthy fake gateway serves for probes.
pub const CANARY: &str = "canary";

/// How a fake gateway answers `/ipfs/:cid`.
#[derive(Clone, Default)]
pub struct Behavior {
    pub delay: Duration,
    /// Answer every request with this status
    pub status: Option<u16>,
    pub content: HashMap<String, Bytes>,
    pub cors: bool,
    pub range: bool,
}

impl Behavior {
    /// Serves the canary after `delay_ms`.
    pub fn healthy(delay_ms: u64) -> Self {
        Self::default()
            .with_delay(delay_ms)
            .with_content(CANARY, b"canary".as_slice())
    }

    /// Never answers within any test timeout.
    pub fn hanging() -> Self {
        Self::default().with_delay(30_000)
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn with_content(mut self, cid: &str, body: impl Into<Bytes>) -> Self {
        self.content.insert(cid.to_string(), body.into());
        self
    }

    pub fn with_caps(mut self) -> Self {
        self.cors = true;
        self.range = true;
        self
    }
}

/// A running fake gateway.
pub struct FakeGateway {
    pub name: String,
    pub addr: SocketAddr,
    pub hits: Arc<Mutex<u32>>,
}

impl FakeGateway {
    pub fn url_template(&self) -> String {
        format!("http://{}/ipfs/", self.addr)
    }

    pub fn seed(&self, region: &str, priority: u32) -> GatewaySeed {
        GatewaySeed {
            name: self.name.clone(),
            url_template: self.url_template(),
            region: region.to_string(),
            priority,
        }
    }

    pub fn hits(&self) -> u32 {
        *self.hits.lock().unwrap()
    }
}

#[derive(Clone)]
struct GatewayState {
    behavior: Arc<Behavior>,
    hits: Arc<Mutex<u32>>,
}

async fn serve_content(State(state): State<GatewayState>, Path(cid): Path<String>) -> Response {
    *state.hits.lock().unwrap() += 1;
    let behavior = &state.behavior;
    tokio::time::sleep(behavior.delay).await;

    if let Some(status) = behavior.status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return status.into_response();
    }

    let Some(body) = behavior.content.get(&cid).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response = body.into_response();
    let headers = response.headers_mut();
    if behavior.cors {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    if behavior.range {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    response
}

/// Start a fake gateway on an ephemeral port.
pub async fn spawn_gateway(name: &str, behavior: Behavior) -> FakeGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake gateway");
    let addr = listener.local_addr().expect("fake gateway address");
    let hits = Arc::new(Mutex::new(0));

    let app = Router::new()
        .route("/ipfs/:cid", get(serve_content))
        .with_state(GatewayState {
            behavior: Arc::new(behavior),
            hits: hits.clone(),
        });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    FakeGateway {
        name: name.to_string(),
        addr,
        hits,
    }
}

/// Configuration with timeouts short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.probe.concurrency_limit = 4;
    config.probe.canary_content_ids = vec![CANARY.to_string()];
    config.probe.options.samples = 1;
    config.probe.options.retries = 0;
    config.probe.options.timeout = Duration::from_millis(1000);
    config.probe.options.retry_delay = Duration::from_millis(10);

    config.race.per_attempt_timeout = Duration::from_millis(1000);
    config.race.overall_deadline = Duration::from_secs(5);
    config.race.inter_batch_delay = Duration::from_millis(10);

    config.repair.retry_delay = Duration::ZERO;
    config.repair.probe_timeout = Duration::from_millis(500);
    config.repair.download_timeout = Duration::from_secs(1);
    config.repair.reference_gateways = Vec::new();
    config
}

/// File record store that remembers every verified record.
#[derive(Default)]
pub struct RecordingStore {
    pub verified: Mutex<Vec<(String, String)>>,
}

impl RecordingStore {
    pub fn verified(&self) -> Vec<(String, String)> {
        self.verified.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileRecordStore for RecordingStore {
    async fn mark_verified(&self, owner_record_id: &str, gateway: &str) -> Result<()> {
        self.verified
            .lock()
            .unwrap()
            .push((owner_record_id.to_string(), gateway.to_string()));
        Ok(())
    }
}

/// Registry holding exactly `gateways`, in the order given as priority.
pub fn registry_of(gateways: &[&FakeGateway]) -> Arc<GatewayRegistry> {
    let registry = GatewayRegistry::new();
    for (priority, gw) in gateways.iter().enumerate() {
        registry
            .register(gw.seed("international", priority as u32))
            .expect("register fake gateway");
    }
    Arc::new(registry)
}

pub fn build_state(
    config: Config,
    registry: Arc<GatewayRegistry>,
    persistence: Option<Arc<StatePersistence>>,
    records: Arc<RecordingStore>,
) -> SharedState {
    Arc::new(AppState::new(
        config,
        Arc::new(HttpTransport::new()),
        registry,
        persistence,
        records,
    ))
}
