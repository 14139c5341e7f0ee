//! birdrev-ag library - Artifact Generation
//!
//! Derives audio segments and spectrogram images from the recordings
//! referenced by bird detections, caches them on disk under a deterministic
//! layout and serves review operations over HTTP.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod artifacts;
pub mod audio;
pub mod error;
pub mod generators;
pub mod manager;

pub use artifacts::{ArtifactKind, ArtifactLayout, PathResolver};
pub use error::{ApiError, ProcessingError, Result};
pub use manager::{BatchReport, ProcessOptions, ProcessOutcome, ProcessingManager};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ProcessingManager>,
}

impl AppState {
    pub fn new(manager: Arc<ProcessingManager>) -> Self {
        Self { manager }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post, put};

    let api = Router::new()
        .route("/api/detections", get(api::list_detections))
        .route("/api/detections/:id", get(api::get_detection))
        .route(
            "/api/detections/:id/artifacts",
            get(api::get_artifacts).post(api::generate_artifacts),
        )
        .route("/api/detections/:id/quality", put(api::set_quality))
        .route("/api/artifacts/batch", post(api::generate_batch))
        .route("/api/artifacts/stats", get(api::artifact_stats))
        .route("/api/summary/sessions", get(api::session_summary))
        .route("/api/summary/species", get(api::species_summary))
        .route("/api/summary/quality", get(api::quality_summary))
        .route("/api/summary/overall", get(api::overall_summary));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
