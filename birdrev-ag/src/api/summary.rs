//! Aggregate views over the detection table

use axum::{extract::State, Json};
use birdrev_common::db::{OverallStats, QualityStats, SessionSummary, SpeciesSummary};

use crate::error::ApiResult;
use crate::AppState;

/// GET /api/summary/sessions
pub async fn session_summary(State(state): State<AppState>) -> ApiResult<Json<Vec<SessionSummary>>> {
    Ok(Json(state.manager.repository().session_summary().await?))
}

/// GET /api/summary/species
pub async fn species_summary(State(state): State<AppState>) -> ApiResult<Json<Vec<SpeciesSummary>>> {
    Ok(Json(state.manager.repository().species_summary().await?))
}

/// GET /api/summary/quality
pub async fn quality_summary(State(state): State<AppState>) -> ApiResult<Json<QualityStats>> {
    Ok(Json(state.manager.repository().quality_statistics().await?))
}

/// GET /api/summary/overall
pub async fn overall_summary(State(state): State<AppState>) -> ApiResult<Json<OverallStats>> {
    Ok(Json(state.manager.repository().overall_statistics().await?))
}
