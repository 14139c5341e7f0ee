//! Audio input: region decoding, resampling and spectral analysis

pub mod decoder;
pub mod resampler;
pub mod spectral;

pub use decoder::{decode_region, ExtractedRegion, RegionRequest};
pub use resampler::resample_mono;
