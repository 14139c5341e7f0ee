//! `bird_detections` table definitions
//!
//! The table belongs to the ingestion tooling. This module knows which
//! columns must be present, which are read when present, and which review
//! columns it may add itself.

use crate::db::schema_sync::{
    ColumnDefinition, SchemaIntrospector, SchemaSync, SyncReport, TableSchema,
};
use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub const DETECTION_TABLE: &str = "bird_detections";

/// Version recorded in `PRAGMA user_version` once the review columns are added
pub const REVIEW_SCHEMA_VERSION: i64 = 1;

/// Columns every detection row must have
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "id",
    "session_name",
    "filename",
    "start_time_seconds",
    "end_time_seconds",
    "confidence",
];

/// Columns read only when the table has them
pub const OPTIONAL_COLUMNS: [&str; 9] = [
    "common_name",
    "scientific_name",
    "model_name",
    "file_path",
    "location",
    "created_at",
    "quality_status",
    "reviewed_at",
    "review_notes",
];

/// Base layout used when this subsystem creates the table itself
pub struct DetectionTableSchema;

impl TableSchema for DetectionTableSchema {
    fn table_name() -> &'static str {
        DETECTION_TABLE
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("session_name", "TEXT").not_null(),
            ColumnDefinition::new("model_name", "TEXT"),
            ColumnDefinition::new("model_type", "TEXT").default("'default'"),
            ColumnDefinition::new("filename", "TEXT").not_null(),
            ColumnDefinition::new("file_path", "TEXT"),
            ColumnDefinition::new("start_time_seconds", "REAL").not_null(),
            ColumnDefinition::new("end_time_seconds", "REAL").not_null(),
            ColumnDefinition::new("scientific_name", "TEXT"),
            ColumnDefinition::new("common_name", "TEXT"),
            ColumnDefinition::new("confidence", "REAL").not_null(),
            ColumnDefinition::new("location", "TEXT"),
            ColumnDefinition::new("created_at", "TIMESTAMP").default("CURRENT_TIMESTAMP"),
        ]
    }
}

/// Review-state columns added on first use
pub struct ReviewColumnsSchema;

impl TableSchema for ReviewColumnsSchema {
    fn table_name() -> &'static str {
        DETECTION_TABLE
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("quality_status", "TEXT")
                .default("'pending'")
                .check("quality_status IN ('pending', 'approved', 'rejected')"),
            ColumnDefinition::new("reviewed_at", "TIMESTAMP"),
            ColumnDefinition::new("review_notes", "TEXT"),
        ]
    }
}

/// Create `bird_detections` with the base layout and its lookup indexes
pub async fn create_detection_table(pool: &SqlitePool) -> Result<()> {
    let columns: Vec<String> = DetectionTableSchema::expected_columns()
        .iter()
        .map(ColumnDefinition::to_sql)
        .collect();

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        DETECTION_TABLE,
        columns.join(",\n    ")
    );
    sqlx::query(&sql).execute(pool).await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_session_name ON bird_detections(session_name)",
        "CREATE INDEX IF NOT EXISTS idx_species ON bird_detections(scientific_name, common_name)",
        "CREATE INDEX IF NOT EXISTS idx_confidence ON bird_detections(confidence)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Created table '{}'", DETECTION_TABLE);
    Ok(())
}

/// Fail when the table lacks any of [`REQUIRED_COLUMNS`]
pub async fn validate_required_columns(pool: &SqlitePool) -> Result<()> {
    let actual = SchemaIntrospector::introspect_table(pool, DETECTION_TABLE).await?;
    if actual.is_empty() {
        return Err(Error::Schema(format!("table '{}' does not exist", DETECTION_TABLE)));
    }

    let missing = SchemaIntrospector::missing_columns(&actual, &REQUIRED_COLUMNS);
    if !missing.is_empty() {
        return Err(Error::Schema(format!(
            "table '{}' is missing required columns: {}",
            DETECTION_TABLE,
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Add the review columns if absent.
///
/// `quality_status` marks a table as already extended: once it exists the
/// file is never touched again, even when `review_notes` is missing. When
/// something was added, the status index, the two review views and
/// `PRAGMA user_version` are written as well.
pub async fn ensure_review_schema(pool: &SqlitePool) -> Result<SyncReport> {
    let actual = SchemaIntrospector::introspect_table(pool, DETECTION_TABLE).await?;
    if actual.iter().any(|c| c.name.eq_ignore_ascii_case("quality_status")) {
        debug!("'{}' already carries review columns", DETECTION_TABLE);
        return Ok(SyncReport::default());
    }

    let report = SchemaSync::sync_table::<ReviewColumnsSchema>(pool).await?;
    if !report.changed() {
        return Ok(report);
    }

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_quality_status ON bird_detections(quality_status)",
        "CREATE VIEW IF NOT EXISTS pending_review AS \
         SELECT * FROM bird_detections WHERE quality_status = 'pending' ORDER BY created_at ASC",
        "CREATE VIEW IF NOT EXISTS approved_detections AS \
         SELECT * FROM bird_detections WHERE quality_status = 'approved' ORDER BY reviewed_at DESC",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    if current < REVIEW_SCHEMA_VERSION {
        sqlx::query(&format!("PRAGMA user_version = {}", REVIEW_SCHEMA_VERSION))
            .execute(pool)
            .await?;
    }

    info!(
        "Review schema v{} applied to '{}' (added {})",
        REVIEW_SCHEMA_VERSION,
        DETECTION_TABLE,
        report.added.join(", ")
    );
    Ok(report)
}
