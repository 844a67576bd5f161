//! Repair queue handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::{NewRepairTask, RepairStatus, RepairTask};
use crate::services::repair_service::RepairStats;

/// Create repair routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_repairs).post(add_repair).delete(clear_history))
        .route("/stats", get(repair_stats))
        .route("/:id", get(get_repair))
        .route("/:id/retry", post(retry_repair))
}

#[derive(Debug, Deserialize)]
pub struct ListRepairsQuery {
    pub status: Option<RepairStatus>,
}

#[derive(Debug, Serialize)]
pub struct RepairListResponse {
    pub items: Vec<RepairTask>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearHistoryResponse {
    pub removed: usize,
}

pub async fn list_repairs(
    State(state): State<SharedState>,
    Query(query): Query<ListRepairsQuery>,
) -> Json<RepairListResponse> {
    let items: Vec<RepairTask> = state
        .repair
        .tasks()
        .into_iter()
        .filter(|t| query.status.map_or(true, |s| t.status == s))
        .collect();
    Json(RepairListResponse {
        total: items.len(),
        items,
    })
}

/// Queue content that failed verification
pub async fn add_repair(
    State(state): State<SharedState>,
    Json(req): Json<NewRepairTask>,
) -> Result<(StatusCode, Json<RepairTask>)> {
    let task = state.repair.add_task(req).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

pub async fn clear_history(State(state): State<SharedState>) -> Json<ClearHistoryResponse> {
    let removed = state.repair.clear_history().await;
    Json(ClearHistoryResponse { removed })
}

pub async fn repair_stats(State(state): State<SharedState>) -> Json<RepairStats> {
    Json(state.repair.stats())
}

pub async fn get_repair(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RepairTask>> {
    state
        .repair
        .task(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("repair task '{}'", id)))
}

/// Manually retry a task, including one marked unrepairable
pub async fn retry_repair(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RepairTask>> {
    Ok(Json(state.repair.retry_task(&id).await?))
}
