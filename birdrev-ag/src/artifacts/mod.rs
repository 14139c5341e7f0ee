//! Artifact paths and source recording lookup

pub mod layout;
pub mod resolver;

pub use layout::{ArtifactKind, ArtifactLayout, BUCKET_SIZE, TEMP_PREFIX};
pub use resolver::{PathResolver, SUPPORTED_EXTENSIONS};
