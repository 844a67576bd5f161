//! Gateway management handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::SharedState;
use crate::error::Result;
use crate::models::{Gateway, GatewaySeed};
use crate::services::health_prober::sort_by_health;
use crate::services::selector;

/// Create gateway routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_gateways).post(add_gateway))
        .route("/probe", post(probe_gateways))
        .route("/:name", delete(remove_gateway))
}

#[derive(Debug, Serialize)]
pub struct GatewayListResponse {
    pub items: Vec<Gateway>,
    pub total: usize,
    pub available: usize,
}

impl From<Vec<Gateway>> for GatewayListResponse {
    fn from(items: Vec<Gateway>) -> Self {
        Self {
            total: items.len(),
            available: items.iter().filter(|g| g.available).count(),
            items,
        }
    }
}

async fn persist_registry(state: &SharedState) {
    if let Some(persistence) = &state.persistence {
        if let Err(e) = persistence.save_registry(&state.registry.list()).await {
            tracing::warn!(error = %e, "Failed to persist gateway registry");
        }
    }
}

/// List gateways, best first
pub async fn list_gateways(State(state): State<SharedState>) -> Json<GatewayListResponse> {
    let mut gateways = state.registry.list();
    gateways.sort_by(selector::compare);
    Json(gateways.into())
}

/// Register a custom gateway
pub async fn add_gateway(
    State(state): State<SharedState>,
    Json(seed): Json<GatewaySeed>,
) -> Result<(StatusCode, Json<Gateway>)> {
    let gateway = state.registry.register_custom(seed)?;
    persist_registry(&state).await;
    Ok((StatusCode::CREATED, Json(gateway)))
}

/// Remove a custom gateway
pub async fn remove_gateway(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Gateway>> {
    let gateway = state.registry.remove(&name)?;
    persist_registry(&state).await;
    Ok(Json(gateway))
}

/// Run a probe pass now and return the refreshed pool
pub async fn probe_gateways(State(state): State<SharedState>) -> Json<GatewayListResponse> {
    let cancel = state.shutdown.child_token();
    let mut gateways = state.prober.probe_all(&state.registry, None, &cancel).await;
    sort_by_health(&mut gateways);
    if let Some(persistence) = &state.persistence {
        if let Err(e) = persistence.save_reputation(&gateways).await {
            tracing::warn!(error = %e, "Failed to persist reputation history");
        }
    }
    persist_registry(&state).await;
    Json(gateways.into())
}
