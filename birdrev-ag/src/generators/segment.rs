//! Audio clip generation

use super::{write_atomically, ArtifactGenerator, GenerationOutcome};
use crate::artifacts::ArtifactKind;
use crate::audio::{decode_region, resample_mono, RegionRequest};
use crate::error::Result;
use birdrev_common::config::{ClipFormat, SegmentSettings};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, warn};

/// Writes the detection region as a mono WAV file
#[derive(Debug, Clone, Default)]
pub struct SegmentGenerator {
    settings: SegmentSettings,
}

impl SegmentGenerator {
    pub fn new(settings: SegmentSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }
}

impl ArtifactGenerator for SegmentGenerator {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Segment
    }

    fn generate(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        destination: &Path,
    ) -> Result<GenerationOutcome> {
        let request = RegionRequest::new(start, end).with_context(self.settings.context_seconds);
        let region = decode_region(source, &request)?;
        for warning in &region.warnings {
            warn!(source = %source.display(), "{}", warning);
        }

        let output_rate = self.settings.output_sample_rate.unwrap_or(region.sample_rate);
        let samples = resample_mono(&region.samples, region.sample_rate, output_rate)?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: output_rate,
            bits_per_sample: match self.settings.format {
                ClipFormat::Wav16 => 16,
                ClipFormat::WavFloat32 => 32,
            },
            sample_format: match self.settings.format {
                ClipFormat::Wav16 => hound::SampleFormat::Int,
                ClipFormat::WavFloat32 => hound::SampleFormat::Float,
            },
        };
        let format = self.settings.format;

        let bytes = write_atomically(destination, |file| {
            let mut writer =
                hound::WavWriter::new(BufWriter::new(file), spec).map_err(|e| e.to_string())?;
            for &sample in &samples {
                match format {
                    ClipFormat::Wav16 => {
                        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                        writer.write_sample(value).map_err(|e| e.to_string())?;
                    }
                    ClipFormat::WavFloat32 => {
                        writer.write_sample(sample).map_err(|e| e.to_string())?;
                    }
                }
            }
            writer.finalize().map_err(|e| e.to_string())
        })?;

        debug!(
            destination = %destination.display(),
            bytes,
            samples = samples.len(),
            sample_rate = output_rate,
            "Segment written"
        );

        Ok(GenerationOutcome {
            path: destination.to_path_buf(),
            bytes,
            source_duration: region.source_duration,
            warnings: region.warnings,
        })
    }
}
