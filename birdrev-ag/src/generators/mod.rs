//! Artifact generators
//!
//! A generator turns `(source, start, end)` into one file at a destination
//! chosen by the caller. Output is written to a temporary file in the
//! destination directory and renamed into place, so a file at an artifact
//! path is always complete.

pub mod segment;
pub mod spectrogram;

pub use segment::SegmentGenerator;
pub use spectrogram::SpectrogramGenerator;

use crate::artifacts::{ArtifactKind, TEMP_PREFIX};
use crate::error::{ProcessingError, Result};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Result of one successful generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    /// Source duration, when the region reached the end of the recording
    pub source_duration: Option<f64>,
    /// Non-fatal adjustments such as a clamped end time
    pub warnings: Vec<String>,
}

/// Produces one kind of artifact
pub trait ArtifactGenerator: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Render `start..end` seconds of `source` into `destination`
    fn generate(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        destination: &Path,
    ) -> Result<GenerationOutcome>;
}

/// Write `destination` through a temporary sibling file and return its size
pub(crate) fn write_atomically<F>(destination: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut File) -> std::result::Result<(), String>,
{
    let parent = destination
        .parent()
        .ok_or_else(|| ProcessingError::write(destination, "no parent directory"))?;
    std::fs::create_dir_all(parent).map_err(|e| ProcessingError::write(parent, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| ProcessingError::write(parent, e))?;

    write(temp.as_file_mut()).map_err(|reason| ProcessingError::write(destination, reason))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ProcessingError::write(destination, e))?;

    let file = temp
        .persist(destination)
        .map_err(|e| ProcessingError::write(destination, e.error))?;
    let bytes = file
        .metadata()
        .map_err(|e| ProcessingError::write(destination, e))?
        .len();
    Ok(bytes)
}
