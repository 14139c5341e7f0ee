//! Audio Test Fixture Generator
//!
//! Utilities for generating field-recording stand-ins

use std::path::{Path, PathBuf};

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub silence_gap_start: Option<f64>,
    pub silence_gap_duration: Option<f64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 30.0,
            sample_rate: 22050,
            channels: 1,
            silence_gap_start: None,
            silence_gap_duration: None,
        }
    }
}

/// Generate a test WAV file (440 Hz tone, optional silence gap).
///
/// Parent directories are created.
pub fn generate_test_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_samples = (config.duration_seconds * config.sample_rate as f64) as usize;

    let (silence_start, silence_end) = if let (Some(start), Some(duration)) =
        (config.silence_gap_start, config.silence_gap_duration)
    {
        let start_sample = (start * config.sample_rate as f64) as usize;
        let end_sample = start_sample + (duration * config.sample_rate as f64) as usize;
        (start_sample, end_sample)
    } else {
        (total_samples + 1, total_samples + 2)
    };

    for i in 0..total_samples {
        let sample = if i >= silence_start && i < silence_end {
            0
        } else {
            let t = i as f32 / config.sample_rate as f32;
            (0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16
        };

        for _ in 0..config.channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Seconds of audio in a WAV file
pub fn wav_duration(path: &Path) -> anyhow::Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}
