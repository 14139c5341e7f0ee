//! Detection records and query types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Reviewer label on a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl QualityStatus {
    pub const ALL: [QualityStatus; 3] = [
        QualityStatus::Pending,
        QualityStatus::Approved,
        QualityStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Pending => "pending",
            QualityStatus::Approved => "approved",
            QualityStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected rows carry a review timestamp
    pub fn is_reviewed(&self) -> bool {
        !matches!(self, QualityStatus::Pending)
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(QualityStatus::Pending),
            "approved" => Ok(QualityStatus::Approved),
            "rejected" => Ok(QualityStatus::Rejected),
            other => Err(Error::InvalidInput(format!(
                "unknown quality status '{}' (expected pending, approved or rejected)",
                other
            ))),
        }
    }
}

/// One classifier output event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,
    pub session_name: String,
    pub filename: String,
    /// Stored location hint, absolute or relative
    pub file_path: Option<String>,
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub confidence: f64,
    pub model_name: Option<String>,
    pub location: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub quality_status: QualityStatus,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
}

impl Detection {
    pub fn duration_seconds(&self) -> f64 {
        self.end_time_seconds - self.start_time_seconds
    }

    /// Common name, falling back to the scientific name
    pub fn species_label(&self) -> Option<&str> {
        self.common_name
            .as_deref()
            .or(self.scientific_name.as_deref())
    }
}

/// How the species criterion is matched against common and scientific names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum SpeciesMatch {
    Exact(String),
    Contains(String),
}

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Id,
    Confidence,
    StartTime,
    Session,
    Species,
    CreatedAt,
}

impl SortKey {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortKey::Id => "id",
            SortKey::Confidence => "confidence",
            SortKey::StartTime => "start_time_seconds",
            SortKey::Session => "session_name",
            SortKey::Species => "common_name",
            SortKey::CreatedAt => "created_at",
        }
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "confidence" => Ok(SortKey::Confidence),
            "start_time" | "start_time_seconds" => Ok(SortKey::StartTime),
            "session" | "session_name" => Ok(SortKey::Session),
            "species" | "common_name" => Ok(SortKey::Species),
            "created_at" => Ok(SortKey::CreatedAt),
            other => Err(Error::InvalidInput(format!("unknown sort key '{}'", other))),
        }
    }
}

/// Filter criteria for [`crate::db::DetectionRepository::query`].
///
/// Empty criteria match everything. Results are ordered by id ascending
/// unless `sort` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilter {
    pub session: Option<String>,
    pub species: Option<SpeciesMatch>,
    pub min_confidence: Option<f64>,
    /// Membership test; empty means any status
    #[serde(default)]
    pub statuses: Vec<QualityStatus>,
    pub sort: Option<SortKey>,
    #[serde(default)]
    pub descending: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DetectionFilter {
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn species_exact(mut self, name: impl Into<String>) -> Self {
        self.species = Some(SpeciesMatch::Exact(name.into()));
        self
    }

    pub fn species_contains(mut self, fragment: impl Into<String>) -> Self {
        self.species = Some(SpeciesMatch::Contains(fragment.into()));
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn status(mut self, status: QualityStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    pub fn sort_by(mut self, key: SortKey, descending: bool) -> Self {
        self.sort = Some(key);
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Per-session aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_name: String,
    pub detection_count: i64,
    pub file_count: i64,
    pub mean_confidence: f64,
    pub first_created: Option<DateTime<Utc>>,
    pub last_created: Option<DateTime<Utc>>,
}

/// Per-species aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesSummary {
    pub common_name: Option<String>,
    pub scientific_name: Option<String>,
    pub detection_count: i64,
    pub mean_confidence: f64,
}

/// Detection counts per review status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityStats {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub total: i64,
}

/// Whole-table aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallStats {
    pub sessions: i64,
    pub files: i64,
    pub detections: i64,
    pub species: i64,
    pub min_confidence: Option<f64>,
    pub mean_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
}
