//! Content resolution handlers.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::SharedState;
use crate::error::Result;
use crate::services::download_race::RaceOutcome;
use crate::services::selector::{self, ResolvedUrl, SelectionFilters};

/// Create content routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/resolve/:content_id", get(resolve))
        .route("/race/:content_id", get(race))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    /// Require range requests and CORS, for streaming playback
    #[serde(default)]
    pub media: bool,
    /// Comma-separated gateway names to skip
    pub exclude: Option<String>,
}

/// Best gateway URL for a content id
pub async fn resolve(
    State(state): State<SharedState>,
    Path(content_id): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolvedUrl>> {
    let exclude: HashSet<String> = query
        .exclude
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let base = if query.media {
        SelectionFilters::media()
    } else {
        SelectionFilters::default()
    };
    let filters = SelectionFilters { exclude, ..base };

    let resolved = selector::resolve_url(&state.registry.list(), &content_id, &filters)?;
    Ok(Json(resolved))
}

/// Race the available gateways for a content id
pub async fn race(
    State(state): State<SharedState>,
    Path(content_id): Path<String>,
) -> Result<Json<RaceOutcome>> {
    let gateways = state.registry.list();
    let mut candidates = selector::rank(&gateways, &SelectionFilters::default());
    if candidates.is_empty() {
        candidates = gateways;
    }

    let cancel = state.shutdown.child_token();
    let outcome = state.race.race(&content_id, &candidates, None, &cancel).await?;
    Ok(Json(outcome))
}
