//! Artifact probing and generation

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::artifacts::ArtifactKind;
use crate::error::{ApiError, ApiResult, ProcessingError};
use crate::manager::{BatchReport, ProcessOptions, ProcessOutcome, ProcessingStats, StorageUsage};
use crate::AppState;

/// Largest accepted batch
const MAX_BATCH_IDS: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct ArtifactEntry {
    pub path: PathBuf,
    pub exists: bool,
}

#[derive(Debug, Serialize)]
pub struct ArtifactsResponse {
    pub detection_id: i64,
    pub artifacts: BTreeMap<ArtifactKind, ArtifactEntry>,
}

/// GET /api/detections/:id/artifacts
///
/// Filesystem probe only; does not consult the database.
pub async fn get_artifacts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ArtifactsResponse>> {
    if id < 0 {
        return Err(ApiError::BadRequest(format!("detection id {} is negative", id)));
    }

    let exists = state.manager.check_files_exist(id);
    let artifacts = state
        .manager
        .artifact_paths(id)
        .into_iter()
        .map(|(kind, path)| {
            let exists = exists.get(&kind).copied().unwrap_or(false);
            (kind, ArtifactEntry { path, exists })
        })
        .collect();

    Ok(Json(ArtifactsResponse {
        detection_id: id,
        artifacts,
    }))
}

/// Body of generation requests; every field optional
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub kinds: Option<Vec<ArtifactKind>>,
    #[serde(default)]
    pub force: bool,
}

impl GenerateRequest {
    /// An empty body means defaults; anything else must parse
    fn from_body(body: &[u8]) -> ApiResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
    }

    fn options(&self) -> ApiResult<ProcessOptions> {
        let kinds = match &self.kinds {
            Some(kinds) if kinds.is_empty() => {
                return Err(ApiError::BadRequest("kinds must not be empty".into()));
            }
            Some(kinds) => kinds.clone(),
            None => ArtifactKind::ALL.to_vec(),
        };
        Ok(ProcessOptions {
            kinds,
            force: self.force,
        })
    }
}

/// POST /api/detections/:id/artifacts
///
/// The body is optional; when present it must be a valid [`GenerateRequest`].
pub async fn generate_artifacts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<Json<ProcessOutcome>> {
    let options = GenerateRequest::from_body(&body)?.options()?;

    let outcome = state.manager.process_single_with(id, &options).await?;
    if outcome.error_code.as_deref() == Some(ProcessingError::DetectionNotFound(id).code()) {
        return Err(ProcessingError::DetectionNotFound(id).into());
    }
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<i64>,
    #[serde(flatten)]
    pub generate: GenerateRequest,
}

/// POST /api/artifacts/batch
pub async fn generate_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchReport>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".into()));
    }
    if request.ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::BadRequest(format!(
            "batch of {} ids exceeds the limit of {}",
            request.ids.len(),
            MAX_BATCH_IDS
        )));
    }
    let options = request.generate.options()?;

    let report = state
        .manager
        .process_multiple_with_cancel(&request.ids, &options, &Default::default())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct ArtifactStatsResponse {
    pub processing: ProcessingStats,
    pub storage: StorageUsage,
}

/// GET /api/artifacts/stats
pub async fn artifact_stats(State(state): State<AppState>) -> ApiResult<Json<ArtifactStatsResponse>> {
    let manager = state.manager.clone();
    let storage = tokio::task::spawn_blocking(move || manager.storage_usage())
        .await
        .map_err(|e| ApiError::Internal(format!("storage scan failed: {}", e)))?;

    Ok(Json(ArtifactStatsResponse {
        processing: state.manager.stats(),
        storage,
    }))
}
