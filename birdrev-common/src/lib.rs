//! # birdrev common library
//!
//! Shared code for the bird detection review tools:
//! - Detection records, filters and the SQLite repository
//! - Additive schema synchronization for review columns
//! - Configuration loading
//! - Time value parsing

pub mod config;
pub mod db;
pub mod error;
pub mod human_time;

pub use db::{Detection, DetectionFilter, DetectionRepository, QualityStatus};
pub use error::{Error, Result};
