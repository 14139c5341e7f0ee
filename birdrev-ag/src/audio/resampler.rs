//! Mono sample-rate conversion with rubato

use crate::error::{ProcessingError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Resample mono `samples` from `input_rate` to `output_rate`.
///
/// Returns the input unchanged when the rates already match.
pub fn resample_mono(samples: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if input_rate == 0 || output_rate == 0 {
        return Err(ProcessingError::Internal(format!(
            "cannot resample {} Hz -> {} Hz",
            input_rate, output_rate
        )));
    }

    debug!(input_rate, output_rate, frames = samples.len(), "Resampling region");

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| ProcessingError::Internal(format!("resampler setup failed: {}", e)))?;

    let input = vec![samples.to_vec()];
    let mut output = resampler
        .process(&input, None)
        .map_err(|e| ProcessingError::Internal(format!("resampling failed: {}", e)))?;

    let mut mono = output.pop().unwrap_or_default();
    let expected = (samples.len() as f64 * ratio).round() as usize;

    // The sinc filter holds back the last frames until more input arrives
    if mono.len() < expected {
        let mut tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| ProcessingError::Internal(format!("resampler flush failed: {}", e)))?;
        mono.extend(tail.pop().unwrap_or_default());
    }

    mono.resize(expected, 0.0);
    Ok(mono)
}
