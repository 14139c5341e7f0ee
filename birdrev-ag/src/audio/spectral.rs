//! STFT, mel filterbank and decibel scaling

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Floor applied before taking logarithms
const POWER_FLOOR: f32 = 1e-10;

/// Periodic Hann window
pub fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / window_length as f32).cos())
        .collect()
}

/// Power spectrogram, one `n_fft / 2 + 1` bin vector per frame.
///
/// The signal is zero-padded by `n_fft / 2` on both sides so frames are
/// centred on multiples of `hop_length`; at least one frame is produced.
pub fn stft_power(samples: &[f32], n_fft: usize, hop_length: usize) -> Vec<Vec<f32>> {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let window = hann_window(n_fft);

    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad];
    padded.extend_from_slice(samples);
    padded.resize(padded.len() + pad, 0.0);
    if padded.len() < n_fft {
        padded.resize(n_fft, 0.0);
    }

    let num_frames = (padded.len() - n_fft) / hop_length + 1;
    let freq_bins = n_fft / 2 + 1;
    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n_fft];

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_length;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }

        fft.process(&mut buffer);
        frames.push(buffer[..freq_bins].iter().map(|c| c.norm_sqr()).collect());
    }

    frames
}

/// Convert Hz to Mel scale (Slaney formula)
pub fn hz_to_mel_slaney(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f64).ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

/// Convert Mel to Hz scale (Slaney formula)
pub fn mel_to_hz_slaney(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f64).ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-normalised triangular filters, `n_mels` rows of `n_fft / 2 + 1` weights.
///
/// `fmax` is capped at the Nyquist frequency.
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let freq_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fmax = (fmax as f64).min(nyquist);
    let fmin = (fmin as f64).min(fmax);

    let fftfreqs: Vec<f64> = (0..freq_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let fmin_mel = hz_to_mel_slaney(fmin);
    let fmax_mel = hz_to_mel_slaney(fmax);
    let mel_f: Vec<f64> = (0..=n_mels + 1)
        .map(|i| {
            let mel = fmin_mel + (fmax_mel - fmin_mel) * i as f64 / (n_mels + 1) as f64;
            mel_to_hz_slaney(mel)
        })
        .collect();
    let fdiff: Vec<f64> = mel_f.windows(2).map(|w| w[1] - w[0]).collect();

    (0..n_mels)
        .map(|i| {
            let enorm = 2.0 / (mel_f[i + 2] - mel_f[i]);
            fftfreqs
                .iter()
                .map(|&freq| {
                    if fdiff[i] <= 0.0 || fdiff[i + 1] <= 0.0 {
                        return 0.0;
                    }
                    let lower = (freq - mel_f[i]) / fdiff[i];
                    let upper = (mel_f[i + 2] - freq) / fdiff[i + 1];
                    (0.0f64.max(lower.min(upper)) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// Project each power frame onto the filterbank; result is `frames x bands`
pub fn apply_filterbank(frames: &[Vec<f32>], filterbank: &[Vec<f32>]) -> Vec<Vec<f32>> {
    frames
        .iter()
        .map(|frame| {
            filterbank
                .iter()
                .map(|weights| weights.iter().zip(frame).map(|(w, p)| w * p).sum())
                .collect()
        })
        .collect()
}

/// Keep only the FFT bins between `fmin` and `fmax`
pub fn linear_band(
    frames: &[Vec<f32>],
    sample_rate: u32,
    n_fft: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let bin_hz = sample_rate as f32 / n_fft as f32;
    let freq_bins = n_fft / 2 + 1;
    let first = ((fmin / bin_hz).floor() as usize).min(freq_bins - 1);
    let last = ((fmax / bin_hz).ceil() as usize).clamp(first + 1, freq_bins);

    frames.iter().map(|frame| frame[first..last].to_vec()).collect()
}

/// Decibels relative to the loudest value, clamped to `[-top_db, 0]`
pub fn power_to_db(frames: &mut [Vec<f32>], top_db: f32) {
    let max = frames
        .iter()
        .flat_map(|f| f.iter().copied())
        .fold(POWER_FLOOR, f32::max);
    let reference = 10.0 * max.log10();

    for frame in frames.iter_mut() {
        for value in frame.iter_mut() {
            let db = 10.0 * value.max(POWER_FLOOR).log10() - reference;
            *value = db.max(-top_db).min(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let sample_rate = 8000;
        let n_fft = 512;
        let samples: Vec<f32> = (0..8000)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sample_rate as f32).sin())
            .collect();

        let frames = stft_power(&samples, n_fft, 128);
        let middle = &frames[frames.len() / 2];
        let peak = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        assert_eq!(frames[0].len(), n_fft / 2 + 1);
        assert_eq!(peak, 1000 * n_fft / sample_rate as usize);
    }

    #[test]
    fn test_short_input_yields_one_frame() {
        let frames = stft_power(&[0.5; 10], 2048, 512);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_mel_filterbank_shape_and_cap() {
        let bank = mel_filterbank(16000, 1024, 40, 0.0, 20000.0);
        assert_eq!(bank.len(), 40);
        assert!(bank.iter().all(|row| row.len() == 513));
        assert!(bank.iter().all(|row| row.iter().any(|w| *w > 0.0)));
    }

    #[test]
    fn test_mel_round_trip() {
        for hz in [0.0, 440.0, 1000.0, 8000.0] {
            assert!((mel_to_hz_slaney(hz_to_mel_slaney(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_db_range() {
        let mut frames = vec![vec![1.0, 0.1, 0.0], vec![1e-20, 0.5, 1.0]];
        power_to_db(&mut frames, 80.0);
        assert_eq!(frames[0][0], 0.0);
        assert!((frames[0][1] + 10.0).abs() < 1e-4);
        assert_eq!(frames[0][2], -80.0);
        assert!(frames.iter().flatten().all(|v| (-80.0..=0.0).contains(v)));
    }
}
