//! Region decoding
//!
//! Decodes a source recording with symphonia, mixes it down to mono f32 and
//! keeps only the requested time region. Decoding stops as soon as the
//! region end has been reached, so long recordings are not read to the end
//! for detections near their start.

use crate::error::{ProcessingError, Result};
use birdrev_common::human_time::format_offset;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

/// Time region to extract, in seconds from the start of the recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRequest {
    pub start: f64,
    pub end: f64,
    /// Padding on both sides, clipped to the recording without warning
    pub context: f64,
}

impl RegionRequest {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end, context: 0.0 }
    }

    pub fn with_context(mut self, context: f64) -> Self {
        self.context = context.max(0.0);
        self
    }

    /// Reject intervals no recording can satisfy
    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(ProcessingError::Range(format!(
                "non-finite bounds {}..{}",
                self.start, self.end
            )));
        }
        if self.start < 0.0 {
            return Err(ProcessingError::Range(format!(
                "start {} is negative",
                self.start
            )));
        }
        if self.start >= self.end {
            return Err(ProcessingError::Range(format!(
                "start {} is not before end {}",
                format_offset(self.start),
                format_offset(self.end)
            )));
        }
        Ok(())
    }
}

/// Decoded mono samples for one region
#[derive(Debug, Clone)]
pub struct ExtractedRegion {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Extracted bounds after padding and clamping
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Known only when decoding ran into the end of the stream
    pub source_duration: Option<f64>,
    /// Non-fatal adjustments (end clamped to the recording)
    pub warnings: Vec<String>,
}

impl ExtractedRegion {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode `request` from the recording at `path`.
///
/// # Errors
/// * `Range` when the interval is invalid or starts past the end of the recording
/// * `SourceRead` when the file cannot be opened, probed or decoded
pub fn decode_region(path: &Path, request: &RegionRequest) -> Result<ExtractedRegion> {
    request.validate()?;

    let file = std::fs::File::open(path).map_err(|e| ProcessingError::source_read(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ProcessingError::source_read(path, format!("unrecognized format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ProcessingError::source_read(path, "no audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ProcessingError::source_read(path, "sample rate unknown"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ProcessingError::source_read(path, format!("unsupported codec: {}", e)))?;

    let rate = sample_rate as f64;
    let padded_start = (request.start - request.context).max(0.0);
    let padded_end = request.end + request.context;
    let first_frame = (padded_start * rate).floor() as u64;
    let last_frame = (padded_end * rate).ceil() as u64;

    let mut samples: Vec<f32> = Vec::new();
    let mut position: u64 = 0;
    let mut reached_eof = false;
    let mut skipped_packets = 0usize;
    let mut packet_mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                reached_eof = true;
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                reached_eof = true;
                break;
            }
            Err(e) => return Err(ProcessingError::source_read(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                skipped_packets += 1;
                debug!(path = %path.display(), "Skipping undecodable packet: {}", reason);
                continue;
            }
            Err(e) => return Err(ProcessingError::source_read(path, e)),
        };

        packet_mono.clear();
        append_mono(&decoded, &mut packet_mono);

        let chunk_start = position;
        let chunk_end = position + packet_mono.len() as u64;
        let keep_from = chunk_start.max(first_frame);
        let keep_to = chunk_end.min(last_frame);
        if keep_from < keep_to {
            samples.extend_from_slice(
                &packet_mono[(keep_from - chunk_start) as usize..(keep_to - chunk_start) as usize],
            );
        }
        position = chunk_end;

        if position >= last_frame {
            break;
        }
    }

    if position == 0 {
        return Err(ProcessingError::source_read(path, "no decodable audio"));
    }
    if skipped_packets > 0 {
        warn!(path = %path.display(), skipped_packets, "Some packets could not be decoded");
    }

    let total_seconds = position as f64 / rate;
    let source_duration = reached_eof.then_some(total_seconds);
    let mut warnings = Vec::new();

    if reached_eof {
        if request.start >= total_seconds {
            return Err(ProcessingError::Range(format!(
                "start {} is beyond source duration {}",
                format_offset(request.start),
                format_offset(total_seconds)
            )));
        }
        if request.end > total_seconds {
            warnings.push(format!(
                "end {} exceeds source duration {}; clamped",
                format_offset(request.end),
                format_offset(total_seconds)
            ));
        }
    }

    if samples.is_empty() {
        return Err(ProcessingError::Range(format!(
            "no audio between {} and {}",
            format_offset(padded_start),
            format_offset(padded_end)
        )));
    }

    let start_seconds = first_frame as f64 / rate;
    let end_seconds = start_seconds + samples.len() as f64 / rate;

    debug!(
        path = %path.display(),
        sample_rate,
        samples = samples.len(),
        start = start_seconds,
        end = end_seconds,
        "Decoded region"
    );

    Ok(ExtractedRegion {
        samples,
        sample_rate,
        start_seconds,
        end_seconds,
        source_duration,
        warnings,
    })
}

/// Average all channels of a decoded buffer into `out`
fn append_mono(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::U8(buf) => mix_down(&**buf, out),
        AudioBufferRef::U16(buf) => mix_down(&**buf, out),
        AudioBufferRef::U24(buf) => mix_down(&**buf, out),
        AudioBufferRef::U32(buf) => mix_down(&**buf, out),
        AudioBufferRef::S8(buf) => mix_down(&**buf, out),
        AudioBufferRef::S16(buf) => mix_down(&**buf, out),
        AudioBufferRef::S24(buf) => mix_down(&**buf, out),
        AudioBufferRef::S32(buf) => mix_down(&**buf, out),
        AudioBufferRef::F32(buf) => mix_down(&**buf, out),
        AudioBufferRef::F64(buf) => mix_down(&**buf, out),
    }
}

fn mix_down<S: Sample>(buf: &AudioBuffer<S>, out: &mut Vec<f32>)
where
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    if channels == 0 {
        return;
    }
    let frames = buf.frames();
    out.reserve(frames);

    for frame in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += f32::from_sample(buf.chan(ch)[frame]);
        }
        out.push(sum / channels as f32);
    }
}
