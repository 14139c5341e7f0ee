//! Detection listing, lookup and review status

use axum::{
    extract::{Path, Query, State},
    Json,
};
use birdrev_common::db::{SortKey, SpeciesMatch};
use birdrev_common::{Detection, DetectionFilter, QualityStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Query parameters for GET /api/detections
#[derive(Debug, Default, Deserialize)]
pub struct DetectionQuery {
    pub session: Option<String>,
    /// Matched against common and scientific names
    pub species: Option<String>,
    /// Exact species match instead of substring
    #[serde(default)]
    pub exact: bool,
    pub min_confidence: Option<f64>,
    /// Comma-separated statuses, e.g. `pending,approved`
    pub status: Option<String>,
    pub sort: Option<String>,
    /// `asc` (default) or `desc`
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DetectionQuery {
    fn into_filter(self) -> ApiResult<DetectionFilter> {
        let mut filter = DetectionFilter {
            session: self.session.filter(|s| !s.is_empty()),
            species: self.species.filter(|s| !s.is_empty()).map(|name| {
                if self.exact {
                    SpeciesMatch::Exact(name)
                } else {
                    SpeciesMatch::Contains(name)
                }
            }),
            min_confidence: self.min_confidence,
            limit: self.limit,
            offset: self.offset,
            ..Default::default()
        };

        if let Some(min) = filter.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(ApiError::BadRequest(format!(
                    "min_confidence {} is outside [0, 1]",
                    min
                )));
            }
        }

        if let Some(statuses) = self.status {
            for part in statuses.split(',').filter(|p| !p.trim().is_empty()) {
                filter = filter.status(part.parse::<QualityStatus>()?);
            }
        }

        if let Some(sort) = self.sort {
            let descending = match self.order.as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    return Err(ApiError::BadRequest(format!("unknown order '{}'", other)));
                }
            };
            filter = filter.sort_by(sort.parse::<SortKey>()?, descending);
        }

        Ok(filter)
    }
}

#[derive(Debug, Serialize)]
pub struct DetectionListResponse {
    pub count: usize,
    pub detections: Vec<Detection>,
}

/// GET /api/detections
pub async fn list_detections(
    State(state): State<AppState>,
    Query(query): Query<DetectionQuery>,
) -> ApiResult<Json<DetectionListResponse>> {
    let filter = query.into_filter()?;
    let detections = state.manager.repository().query(&filter).await?;

    Ok(Json(DetectionListResponse {
        count: detections.len(),
        detections,
    }))
}

/// GET /api/detections/:id
pub async fn get_detection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Detection>> {
    state
        .manager
        .repository()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("detection {}", id)))
}

#[derive(Debug, Deserialize)]
pub struct QualityRequest {
    pub status: QualityStatus,
    /// Replaces the stored notes when present
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QualityResponse {
    pub detection_id: i64,
    pub status: QualityStatus,
    pub updated: bool,
}

/// PUT /api/detections/:id/quality
pub async fn set_quality(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<QualityRequest>,
) -> ApiResult<Json<QualityResponse>> {
    let repository = state.manager.repository();
    let updated = match request.notes {
        Some(notes) => {
            repository
                .set_quality_status_with_notes(id, request.status, Some(notes))
                .await?
        }
        None => repository.set_quality_status(id, request.status).await?,
    };

    if !updated {
        return Err(ApiError::NotFound(format!("detection {}", id)));
    }

    info!(detection_id = id, status = %request.status, "Review recorded via API");
    Ok(Json(QualityResponse {
        detection_id: id,
        status: request.status,
        updated,
    }))
}
