//! HTTP API handlers for birdrev-ag

pub mod artifacts;
pub mod detections;
pub mod health;
pub mod summary;

pub use artifacts::{artifact_stats, generate_artifacts, generate_batch, get_artifacts};
pub use detections::{get_detection, list_detections, set_quality};
pub use health::health_routes;
pub use summary::{overall_summary, quality_summary, session_summary, species_summary};
