//! Deterministic artifact naming
//!
//! `<root>/<kind dir>/<bucket>/detection_<id:06>.<ext>` with
//! `bucket = id / 1000`. Computing a path never touches the filesystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use birdrev_common::config::{ClipFormat, ImageFormat};

/// Detections per bucket directory
pub const BUCKET_SIZE: i64 = 1000;

/// Prefix of in-progress files inside a bucket directory
pub const TEMP_PREFIX: &str = ".tmp-";

/// Derived file type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Segment,
    Spectrogram,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Segment, ArtifactKind::Spectrogram];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Segment => "segment",
            ArtifactKind::Spectrogram => "spectrogram",
        }
    }

    /// Top-level directory under the artifact root
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Segment => "audio_segments",
            ArtifactKind::Spectrogram => "spectrograms",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segment" | "audio" | "audio_segment" => Ok(ArtifactKind::Segment),
            "spectrogram" | "image" => Ok(ArtifactKind::Spectrogram),
            other => Err(format!(
                "unknown artifact kind '{}' (expected segment or spectrogram)",
                other
            )),
        }
    }
}

/// Maps detection ids to artifact paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    segment_ext: &'static str,
    spectrogram_ext: &'static str,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, clip: ClipFormat, image: ImageFormat) -> Self {
        Self {
            root: root.into(),
            segment_ext: clip.extension(),
            spectrogram_ext: image.extension(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn extension(&self, kind: ArtifactKind) -> &'static str {
        match kind {
            ArtifactKind::Segment => self.segment_ext,
            ArtifactKind::Spectrogram => self.spectrogram_ext,
        }
    }

    /// Path for a non-negative detection id; the manager rejects negative ids first
    pub fn artifact_path(&self, detection_id: i64, kind: ArtifactKind) -> PathBuf {
        let id = detection_id.max(0);
        self.kind_dir(kind)
            .join(format!("{:04}", id / BUCKET_SIZE))
            .join(format!("detection_{:06}.{}", id, self.extension(kind)))
    }

    /// Inverse of [`Self::artifact_path`]'s file name part
    pub fn parse_file_name(&self, kind: ArtifactKind, file_name: &str) -> Option<i64> {
        let stem = file_name.strip_suffix(self.extension(kind))?.strip_suffix('.')?;
        stem.strip_prefix("detection_")?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ArtifactLayout {
        ArtifactLayout::new("/data/birds", ClipFormat::Wav16, ImageFormat::Png)
    }

    #[test]
    fn test_paths_are_bucketed() {
        let layout = layout();
        assert_eq!(
            layout.artifact_path(1, ArtifactKind::Segment),
            PathBuf::from("/data/birds/audio_segments/0000/detection_000001.wav")
        );
        assert_eq!(
            layout.artifact_path(12345, ArtifactKind::Spectrogram),
            PathBuf::from("/data/birds/spectrograms/0012/detection_012345.png")
        );
        assert_eq!(
            layout.artifact_path(1234567, ArtifactKind::Segment),
            PathBuf::from("/data/birds/audio_segments/1234/detection_1234567.wav")
        );
    }

    #[test]
    fn test_same_inputs_same_path() {
        let a = layout();
        let b = layout();
        for id in [0, 7, 999, 1000, 424242] {
            for kind in ArtifactKind::ALL {
                assert_eq!(a.artifact_path(id, kind), b.artifact_path(id, kind));
            }
        }
    }

    #[test]
    fn test_image_format_changes_extension() {
        let layout = ArtifactLayout::new("/r", ClipFormat::WavFloat32, ImageFormat::Bmp);
        assert_eq!(
            layout.artifact_path(5, ArtifactKind::Spectrogram),
            PathBuf::from("/r/spectrograms/0000/detection_000005.bmp")
        );
    }

    #[test]
    fn test_parse_file_name() {
        let layout = layout();
        assert_eq!(layout.parse_file_name(ArtifactKind::Segment, "detection_000042.wav"), Some(42));
        assert_eq!(layout.parse_file_name(ArtifactKind::Segment, "detection_000042.png"), None);
        assert_eq!(layout.parse_file_name(ArtifactKind::Spectrogram, "notes.png"), None);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Segment".parse::<ArtifactKind>().unwrap(), ArtifactKind::Segment);
        assert_eq!("spectrogram".parse::<ArtifactKind>().unwrap(), ArtifactKind::Spectrogram);
        assert!("video".parse::<ArtifactKind>().is_err());
    }
}
