//! Spectrogram image generation
//!
//! Pipeline: decode region -> STFT power -> mel or linear bands -> dB
//! relative to the region maximum -> viridis raster, low frequencies at the
//! bottom. Nothing time- or environment-dependent enters the image, so the
//! same region always encodes to the same bytes.

use super::{write_atomically, ArtifactGenerator, GenerationOutcome};
use crate::artifacts::ArtifactKind;
use crate::audio::spectral::{apply_filterbank, linear_band, mel_filterbank, power_to_db, stft_power};
use crate::audio::{decode_region, RegionRequest};
use crate::error::Result;
use birdrev_common::config::{FrequencyScale, ImageFormat, SpectrogramSettings};
use image::{Rgb, RgbImage};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Viridis colour map sampled at 0.0, 0.1, ..., 1.0
const VIRIDIS: [[u8; 3]; 11] = [
    [68, 1, 84],
    [72, 36, 117],
    [65, 68, 135],
    [53, 95, 141],
    [42, 120, 142],
    [33, 145, 140],
    [34, 168, 132],
    [68, 191, 112],
    [122, 209, 81],
    [189, 223, 38],
    [253, 231, 37],
];

/// Renders the detection region as a time-frequency image
#[derive(Debug, Clone, Default)]
pub struct SpectrogramGenerator {
    settings: SpectrogramSettings,
}

impl SpectrogramGenerator {
    pub fn new(settings: SpectrogramSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SpectrogramSettings {
        &self.settings
    }

    /// Band energies in dB, `frames x bands`, lowest band first
    fn analyse(&self, samples: &[f32], sample_rate: u32) -> Vec<Vec<f32>> {
        let s = &self.settings;
        let power = stft_power(samples, s.n_fft, s.hop_length);
        let mut bands = match s.frequency_scale {
            FrequencyScale::Mel => {
                let bank = mel_filterbank(sample_rate, s.n_fft, s.mel_bands, s.fmin, s.fmax);
                apply_filterbank(&power, &bank)
            }
            FrequencyScale::Linear => {
                let fmax = s.fmax.min(sample_rate as f32 / 2.0);
                linear_band(&power, sample_rate, s.n_fft, s.fmin, fmax)
            }
        };
        power_to_db(&mut bands, s.top_db);
        bands
    }

    fn render(&self, bands: &[Vec<f32>]) -> RgbImage {
        let width = self.settings.width;
        let height = self.settings.height;
        let top_db = self.settings.top_db;
        let num_frames = bands.len().max(1);
        let num_bands = bands.first().map(|b| b.len()).unwrap_or(0).max(1);

        RgbImage::from_fn(width, height, |x, y| {
            let frame = (x as usize * num_frames) / width as usize;
            let band = ((height - 1 - y) as usize * num_bands) / height as usize;
            let db = bands
                .get(frame)
                .and_then(|f| f.get(band))
                .copied()
                .unwrap_or(-top_db);
            viridis((db + top_db) / top_db)
        })
    }
}

impl ArtifactGenerator for SpectrogramGenerator {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Spectrogram
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

        let bands = self.analyse(&region.samples, region.sample_rate);
        let raster = self.render(&bands);
        let format = match self.settings.format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        };

        let bytes = write_atomically(destination, |file| {
            let mut writer = BufWriter::new(file);
            raster
                .write_to(&mut writer, format)
                .map_err(|e| e.to_string())?;
            writer.flush().map_err(|e| e.to_string())
        })?;

        debug!(
            destination = %destination.display(),
            bytes,
            frames = bands.len(),
            "Spectrogram written"
        );

        Ok(GenerationOutcome {
            path: destination.to_path_buf(),
            bytes,
            source_duration: region.source_duration,
            warnings: region.warnings,
        })
    }
}

/// Map `t` in [0, 1] onto the viridis colour map
fn viridis(t: f32) -> Rgb<u8> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (VIRIDIS.len() - 1) as f32;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - lower as f32;

    let a = VIRIDIS[lower];
    let b = VIRIDIS[lower + 1];
    let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * frac).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viridis_endpoints() {
        assert_eq!(viridis(0.0), Rgb([68, 1, 84]));
        assert_eq!(viridis(1.0), Rgb([253, 231, 37]));
        assert_eq!(viridis(-3.0), viridis(0.0));
        assert_eq!(viridis(f32::NAN), viridis(0.0));
    }

    #[test]
    fn test_render_has_configured_size() {
        let settings = SpectrogramSettings {
            width: 64,
            height: 32,
            ..Default::default()
        };
        let generator = SpectrogramGenerator::new(settings);
        let bands = vec![vec![0.0, -40.0, -80.0]; 10];

        let image = generator.render(&bands);

        assert_eq!(image.dimensions(), (64, 32));
        // Lowest band is loudest and drawn at the bottom
        assert_eq!(*image.get_pixel(0, 31), viridis(1.0));
        assert_eq!(*image.get_pixel(0, 0), viridis(0.0));
    }

    #[test]
    fn test_linear_scale_analysis() {
        let settings = SpectrogramSettings {
            frequency_scale: FrequencyScale::Linear,
            n_fft: 256,
            hop_length: 64,
            fmax: 2000.0,
            ..Default::default()
        };
        let generator = SpectrogramGenerator::new(settings);
        let samples: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.3).sin()).collect();

        let bands = generator.analyse(&samples, 8000);

        assert!(!bands.is_empty());
        // 2000 Hz at 31.25 Hz per bin
        assert_eq!(bands[0].len(), 64);
        assert!(bands.iter().flatten().any(|v| *v == 0.0));
    }
}
