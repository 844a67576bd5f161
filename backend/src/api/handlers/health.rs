//! Health check endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub gateways: CheckStatus,
    pub repair_service: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health check endpoint - liveness plus a summary of the gateway pool.
///
/// Always answers 200: an empty pool degrades service but the process is up.
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let gateways = state.registry.list();
    let available = gateways.iter().filter(|g| g.available).count();
    let probed = gateways.iter().any(|g| g.last_checked_at.is_some());

    let gateway_check = if available > 0 {
        CheckStatus {
            status: "healthy".to_string(),
            message: Some(format!("{}/{} gateways available", available, gateways.len())),
        }
    } else if !probed {
        CheckStatus {
            status: "unknown".to_string(),
            message: Some("No probe pass has completed yet".to_string()),
        }
    } else {
        CheckStatus {
            status: "unhealthy".to_string(),
            message: Some("No gateways available".to_string()),
        }
    };

    let repair_check = CheckStatus {
        status: if state.repair.is_running() {
            "running".to_string()
        } else {
            "stopped".to_string()
        },
        message: None,
    };

    let overall = if gateway_check.status == "unhealthy" {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: overall.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            gateways: gateway_check,
            repair_service: repair_check,
        },
    })
}
