//! Database Test Utilities
//!
//! Legacy detection tables and row seeding

use anyhow::Result;
use sqlx::SqlitePool;

/// Table layout written by older ingestion runs (no review columns)
pub const LEGACY_TABLE: &str = r#"
    CREATE TABLE bird_detections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_name TEXT NOT NULL,
        filename TEXT NOT NULL,
        file_path TEXT,
        start_time_seconds REAL NOT NULL,
        end_time_seconds REAL NOT NULL,
        scientific_name TEXT,
        common_name TEXT,
        confidence REAL NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Row to insert into `bird_detections`
#[derive(Debug, Clone)]
pub struct DetectionRow {
    pub id: i64,
    pub session: String,
    pub filename: String,
    pub file_path: Option<String>,
    pub start: f64,
    pub end: f64,
    pub common_name: Option<String>,
    pub confidence: f64,
}

impl DetectionRow {
    pub fn new(id: i64, filename: &str, start: f64, end: f64) -> Self {
        Self {
            id,
            session: "test_session".to_string(),
            filename: filename.to_string(),
            file_path: None,
            start,
            end,
            common_name: Some("Great Tit".to_string()),
            confidence: 0.95,
        }
    }
}

pub async fn create_legacy_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(LEGACY_TABLE).execute(pool).await?;
    Ok(())
}

pub async fn insert_detection(pool: &SqlitePool, row: &DetectionRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO bird_detections (id, session_name, filename, file_path, start_time_seconds, \
         end_time_seconds, common_name, confidence) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(row.id)
    .bind(&row.session)
    .bind(&row.filename)
    .bind(&row.file_path)
    .bind(row.start)
    .bind(row.end)
    .bind(&row.common_name)
    .bind(row.confidence)
    .execute(pool)
    .await?;
    Ok(())
}

/// Check if table has specific column
pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table_name)
            .bind(column_name)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Assert table HAS column
pub async fn assert_has_column(pool: &SqlitePool, table_name: &str, column_name: &str) {
    let has_col = has_column(pool, table_name, column_name).await.unwrap();
    assert!(
        has_col,
        "Table '{}' should have column '{}', but it doesn't exist",
        table_name,
        column_name
    );
}
