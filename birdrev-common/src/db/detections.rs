//! Detection repository
//!
//! Query/update layer over `bird_detections`. The table is owned by the
//! ingestion tooling; the repository only adds the review columns (see
//! [`crate::db::table_schemas::ensure_review_schema`]).
//!
//! Writes are serialized through one async mutex per repository and run in
//! a transaction. Reads go straight to the pool.

use crate::config::DatabaseConfig;
use crate::db::init::{open_pool, PoolSettings};
use crate::db::lookup_cache::{LookupCache, LookupKind};
use crate::db::models::{
    Detection, DetectionFilter, OverallStats, QualityStats, QualityStatus, SessionSummary,
    SortKey, SpeciesMatch, SpeciesSummary,
};
use crate::db::schema_sync::SchemaIntrospector;
use crate::db::table_schemas::{
    create_detection_table, ensure_review_schema, validate_required_columns, DETECTION_TABLE,
    OPTIONAL_COLUMNS,
};
use crate::human_time::{parse_time_value, parse_timestamp};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Options for [`DetectionRepository::open`]
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub pool: PoolSettings,
    /// Create `bird_detections` when absent instead of failing
    pub create_table_if_missing: bool,
    pub lookup_cache_ttl: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            create_table_if_missing: true,
            lookup_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl RepositoryOptions {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            pool: PoolSettings {
                busy_timeout: Duration::from_millis(config.busy_timeout_ms),
                create_if_missing: config.create_if_missing,
                ..PoolSettings::default()
            },
            create_table_if_missing: config.create_if_missing,
            lookup_cache_ttl: Duration::from_secs(config.lookup_cache_ttl_secs),
        }
    }
}

enum NotesUpdate {
    Keep,
    Replace(Option<String>),
}

pub struct DetectionRepository {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    review_ready: AtomicBool,
    /// Lower-cased column names present in the table
    columns: RwLock<HashSet<String>>,
    lookups: LookupCache,
}

impl DetectionRepository {
    /// Open the database file and prepare the table
    pub async fn open(db_path: &Path, options: RepositoryOptions) -> Result<Self> {
        let pool = open_pool(db_path, &options.pool).await?;
        Self::from_pool(pool, options).await
    }

    /// Prepare the table on an existing pool.
    ///
    /// Creates the table when allowed, checks the required columns, then
    /// applies the review-schema extension.
    pub async fn from_pool(pool: SqlitePool, options: RepositoryOptions) -> Result<Self> {
        let repo = Self {
            pool,
            write_lock: Mutex::new(()),
            review_ready: AtomicBool::new(false),
            columns: RwLock::new(HashSet::new()),
            lookups: LookupCache::new(options.lookup_cache_ttl),
        };

        {
            let _guard = repo.write_lock.lock().await;

            if !SchemaIntrospector::table_exists(&repo.pool, DETECTION_TABLE).await? {
                if !options.create_table_if_missing {
                    return Err(Error::Schema(format!(
                        "table '{}' does not exist",
                        DETECTION_TABLE
                    )));
                }
                create_detection_table(&repo.pool).await?;
            }

            validate_required_columns(&repo.pool).await?;
            repo.apply_review_schema().await?;
        }

        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Make sure the review columns exist. Cheap after the first call.
    pub async fn ensure_review_columns(&self) -> Result<()> {
        if self.review_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        if self.review_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.apply_review_schema().await
    }

    /// Caller holds the write lock
    async fn apply_review_schema(&self) -> Result<()> {
        ensure_review_schema(&self.pool).await?;
        self.refresh_columns().await?;
        self.review_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn refresh_columns(&self) -> Result<()> {
        let actual = SchemaIntrospector::introspect_table(&self.pool, DETECTION_TABLE).await?;
        let names: HashSet<String> = actual.iter().map(|c| c.name.to_ascii_lowercase()).collect();

        let optional_present = OPTIONAL_COLUMNS.iter().filter(|c| names.contains(**c)).count();
        debug!(
            "'{}' has {} columns ({} of {} optional)",
            DETECTION_TABLE,
            names.len(),
            optional_present,
            OPTIONAL_COLUMNS.len()
        );

        let mut columns = self
            .columns
            .write()
            .map_err(|_| Error::Internal("column set lock poisoned".into()))?;
        *columns = names;
        Ok(())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .read()
            .map(|c| c.contains(&name.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    fn select_list(&self) -> String {
        let mut parts: Vec<String> = vec![
            "id".into(),
            "session_name".into(),
            "filename".into(),
            "CAST(start_time_seconds AS TEXT) AS start_time_raw".into(),
            "CAST(end_time_seconds AS TEXT) AS end_time_raw".into(),
            "CAST(confidence AS TEXT) AS confidence_raw".into(),
        ];

        for column in OPTIONAL_COLUMNS {
            let expr = if !self.has_column(column) {
                format!("NULL AS {}", column)
            } else if matches!(column, "created_at" | "reviewed_at") {
                format!("CAST({0} AS TEXT) AS {0}", column)
            } else {
                column.to_string()
            };
            parts.push(expr);
        }

        parts.join(", ")
    }

    fn species_expr(&self) -> Option<&'static str> {
        match (self.has_column("common_name"), self.has_column("scientific_name")) {
            (true, true) => Some("COALESCE(common_name, scientific_name)"),
            (true, false) => Some("common_name"),
            (false, true) => Some("scientific_name"),
            (false, false) => None,
        }
    }

    fn push_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, filter: &DetectionFilter) {
        if let Some(session) = &filter.session {
            qb.push(" AND session_name = ").push_bind(session.clone());
        }

        if let Some(species) = &filter.species {
            let name_columns: Vec<&str> = ["common_name", "scientific_name"]
                .into_iter()
                .filter(|c| self.has_column(c))
                .collect();

            if name_columns.is_empty() {
                qb.push(" AND 0");
            } else {
                qb.push(" AND (");
                for (idx, column) in name_columns.iter().enumerate() {
                    if idx > 0 {
                        qb.push(" OR ");
                    }
                    match species {
                        SpeciesMatch::Exact(name) => {
                            qb.push(format!("{} = ", column)).push_bind(name.clone());
                        }
                        SpeciesMatch::Contains(fragment) => {
                            qb.push(format!("{} LIKE ", column))
                                .push_bind(like_pattern(fragment))
                                .push(" ESCAPE '\\'");
                        }
                    }
                }
                qb.push(")");
            }
        }

        if let Some(min) = filter.min_confidence {
            qb.push(" AND confidence >= ").push_bind(min);
        }

        if !filter.statuses.is_empty() {
            if self.has_column("quality_status") {
                qb.push(" AND COALESCE(quality_status, 'pending') IN (");
                let mut separated = qb.separated(", ");
                for status in &filter.statuses {
                    separated.push_bind(status.as_str());
                }
                separated.push_unseparated(")");
            } else if !filter.statuses.contains(&QualityStatus::Pending) {
                qb.push(" AND 0");
            }
        }
    }

    /// Detections matching `filter`. Rows that cannot be decoded are skipped.
    pub async fn query(&self, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM {} WHERE 1 = 1",
            self.select_list(),
            DETECTION_TABLE
        ));
        self.push_filter(&mut qb, filter);

        let sort = filter.sort.unwrap_or(SortKey::Id);
        let column = if self.has_column(sort.column()) {
            sort.column()
        } else {
            "id"
        };
        let direction = if filter.descending { "DESC" } else { "ASC" };
        qb.push(format!(" ORDER BY {} {}, id ASC", column, direction));

        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                qb.push(" LIMIT ").push_bind(limit as i64);
                if let Some(offset) = offset {
                    qb.push(" OFFSET ").push_bind(offset as i64);
                }
            }
            (None, Some(offset)) => {
                qb.push(" LIMIT -1 OFFSET ").push_bind(offset as i64);
            }
            (None, None) => {}
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut detections = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_row(row) {
                Ok(detection) => detections.push(detection),
                Err(reason) => {
                    let id: Option<i64> = row.try_get("id").ok();
                    warn!(detection_id = ?id, "Skipping malformed detection row: {}", reason);
                }
            }
        }
        Ok(detections)
    }

    /// One detection by id. A malformed row is an error, not `None`.
    pub async fn get(&self, id: i64) -> Result<Option<Detection>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            self.select_list(),
            DETECTION_TABLE
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        match row {
            None => Ok(None),
            Some(row) => decode_row(&row)
                .map(Some)
                .map_err(|reason| Error::Schema(format!("detection {} is malformed: {}", id, reason))),
        }
    }

    /// Pending detections, oldest first
    pub async fn pending_reviews(&self, limit: u32) -> Result<Vec<Detection>> {
        let filter = DetectionFilter::default()
            .status(QualityStatus::Pending)
            .sort_by(SortKey::CreatedAt, false)
            .limit(limit);
        self.query(&filter).await
    }

    /// Set the review status. Returns false when `id` does not exist.
    ///
    /// Approved and rejected stamp `reviewed_at` with the current UTC time;
    /// pending clears it. Notes are left unchanged.
    pub async fn set_quality_status(&self, id: i64, status: QualityStatus) -> Result<bool> {
        self.update_status(id, status, NotesUpdate::Keep).await
    }

    /// Like [`Self::set_quality_status`], replacing `review_notes` too.
    ///
    /// Tables that were given review columns elsewhere may lack
    /// `review_notes`; writing notes to them is an [`Error::Schema`].
    pub async fn set_quality_status_with_notes(
        &self,
        id: i64,
        status: QualityStatus,
        notes: Option<String>,
    ) -> Result<bool> {
        self.update_status(id, status, NotesUpdate::Replace(notes)).await
    }

    async fn update_status(&self, id: i64, status: QualityStatus, notes: NotesUpdate) -> Result<bool> {
        self.ensure_review_columns().await?;
        if matches!(notes, NotesUpdate::Replace(_)) && !self.has_column("review_notes") {
            return Err(Error::Schema(format!(
                "table '{}' has no review_notes column",
                DETECTION_TABLE
            )));
        }
        let _guard = self.write_lock.lock().await;

        let reviewed_at = status
            .is_reviewed()
            .then(|| Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());

        let mut tx = self.pool.begin().await?;
        let result = match notes {
            NotesUpdate::Keep => {
                sqlx::query(
                    "UPDATE bird_detections SET quality_status = ?, reviewed_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(&reviewed_at)
                .bind(id)
                .execute(&mut *tx)
                .await?
            }
            NotesUpdate::Replace(notes) => {
                sqlx::query(
                    "UPDATE bird_detections SET quality_status = ?, reviewed_at = ?, review_notes = ? \
                     WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(&reviewed_at)
                .bind(notes)
                .bind(id)
                .execute(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;

        let changed = result.rows_affected() > 0;
        if changed {
            info!(detection_id = id, status = %status, "Quality status updated");
        } else {
            debug!(detection_id = id, "Quality status update matched no detection");
        }
        Ok(changed)
    }

    /// Per-session counts and mean confidence, always a fresh grouped scan
    pub async fn session_summary(&self) -> Result<Vec<SessionSummary>> {
        let (first, last) = if self.has_column("created_at") {
            ("CAST(MIN(created_at) AS TEXT)", "CAST(MAX(created_at) AS TEXT)")
        } else {
            ("NULL", "NULL")
        };

        let sql = format!(
            "SELECT session_name, COUNT(*) AS detection_count, \
                    COUNT(DISTINCT filename) AS file_count, \
                    AVG(confidence) AS mean_confidence, \
                    {} AS first_created, {} AS last_created \
             FROM {} \
             WHERE session_name IS NOT NULL \
             GROUP BY session_name \
             ORDER BY session_name ASC",
            first, last, DETECTION_TABLE
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(SessionSummary {
                session_name: row.try_get("session_name")?,
                detection_count: row.try_get("detection_count")?,
                file_count: row.try_get("file_count")?,
                mean_confidence: row.try_get::<Option<f64>, _>("mean_confidence")?.unwrap_or(0.0),
                first_created: row
                    .try_get::<Option<String>, _>("first_created")?
                    .as_deref()
                    .and_then(parse_timestamp),
                last_created: row
                    .try_get::<Option<String>, _>("last_created")?
                    .as_deref()
                    .and_then(parse_timestamp),
            });
        }
        Ok(summaries)
    }

    /// Per-species counts and mean confidence, most detected first
    pub async fn species_summary(&self) -> Result<Vec<SpeciesSummary>> {
        let common = if self.has_column("common_name") { "common_name" } else { "NULL" };
        let scientific = if self.has_column("scientific_name") { "scientific_name" } else { "NULL" };
        let Some(species) = self.species_expr() else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {} AS common_name, {} AS scientific_name, \
                    COUNT(*) AS detection_count, AVG(confidence) AS mean_confidence \
             FROM {} \
             WHERE {} IS NOT NULL \
             GROUP BY 1, 2 \
             ORDER BY detection_count DESC, 1 ASC, 2 ASC",
            common, scientific, DETECTION_TABLE, species
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(SpeciesSummary {
                common_name: row.try_get("common_name")?,
                scientific_name: row.try_get("scientific_name")?,
                detection_count: row.try_get("detection_count")?,
                mean_confidence: row.try_get::<Option<f64>, _>("mean_confidence")?.unwrap_or(0.0),
            });
        }
        Ok(summaries)
    }

    /// Counts per review status
    pub async fn quality_statistics(&self) -> Result<QualityStats> {
        let sql = if self.has_column("quality_status") {
            "SELECT COALESCE(quality_status, 'pending') AS status, COUNT(*) AS n \
             FROM bird_detections GROUP BY 1"
        } else {
            "SELECT 'pending' AS status, COUNT(*) AS n FROM bird_detections"
        };

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut stats = QualityStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("n")?;
            match status.parse::<QualityStatus>() {
                Ok(QualityStatus::Pending) => stats.pending += count,
                Ok(QualityStatus::Approved) => stats.approved += count,
                Ok(QualityStatus::Rejected) => stats.rejected += count,
                Err(_) => warn!("{} detections carry unknown status '{}'", count, status),
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Whole-table totals
    pub async fn overall_statistics(&self) -> Result<OverallStats> {
        let species = self
            .species_expr()
            .map(|expr| format!("COUNT(DISTINCT {})", expr))
            .unwrap_or_else(|| "0".to_string());

        let sql = format!(
            "SELECT COUNT(DISTINCT session_name) AS sessions, COUNT(DISTINCT filename) AS files, \
                    COUNT(*) AS detections, {} AS species, \
                    MIN(confidence) AS min_confidence, AVG(confidence) AS mean_confidence, \
                    MAX(confidence) AS max_confidence \
             FROM {}",
            species, DETECTION_TABLE
        );

        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(OverallStats {
            sessions: row.try_get("sessions")?,
            files: row.try_get("files")?,
            detections: row.try_get("detections")?,
            species: row.try_get("species")?,
            min_confidence: row.try_get("min_confidence")?,
            mean_confidence: row.try_get("mean_confidence")?,
            max_confidence: row.try_get("max_confidence")?,
        })
    }

    /// Distinct session names (cached)
    pub async fn distinct_sessions(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.lookups.get(LookupKind::Sessions) {
            return Ok(cached);
        }

        let sessions: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT session_name FROM bird_detections \
             WHERE session_name IS NOT NULL ORDER BY session_name",
        )
        .fetch_all(&self.pool)
        .await?;

        self.lookups.put(LookupKind::Sessions, sessions.clone());
        Ok(sessions)
    }

    /// Distinct species labels, common name preferred (cached)
    pub async fn distinct_species(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.lookups.get(LookupKind::Species) {
            return Ok(cached);
        }
        let Some(expr) = self.species_expr() else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT DISTINCT {0} AS species FROM {1} WHERE {0} IS NOT NULL ORDER BY 1",
            expr, DETECTION_TABLE
        );
        let species: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;

        self.lookups.put(LookupKind::Species, species.clone());
        Ok(species)
    }

    /// Drop cached lookups so the next call rescans
    pub fn clear_cache(&self) {
        self.lookups.clear();
    }
}

/// `%fragment%` with LIKE wildcards in the fragment escaped
fn like_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn opt_text(row: &SqliteRow, column: &str) -> std::result::Result<Option<String>, String> {
    row.try_get::<Option<String>, _>(column)
        .map_err(|e| format!("{}: {}", column, e))
}

fn required_text(row: &SqliteRow, column: &str) -> std::result::Result<String, String> {
    opt_text(row, column)?.ok_or_else(|| format!("{} is NULL", column))
}

fn required_time(row: &SqliteRow, column: &str) -> std::result::Result<f64, String> {
    let raw = required_text(row, column)?;
    parse_time_value(&raw).ok_or_else(|| format!("{} has unparseable value '{}'", column, raw))
}

fn decode_row(row: &SqliteRow) -> std::result::Result<Detection, String> {
    let id: i64 = row.try_get("id").map_err(|e| format!("id: {}", e))?;

    let confidence_raw = required_text(row, "confidence_raw")?;
    let confidence = confidence_raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|c| (0.0..=1.0).contains(c))
        .ok_or_else(|| format!("confidence '{}' is not within [0, 1]", confidence_raw))?;

    let quality_status = match opt_text(row, "quality_status")? {
        Some(raw) => raw.parse().map_err(|e: Error| e.to_string())?,
        None => QualityStatus::Pending,
    };

    Ok(Detection {
        id,
        session_name: required_text(row, "session_name")?,
        filename: required_text(row, "filename")?,
        file_path: opt_text(row, "file_path")?.filter(|p| !p.trim().is_empty()),
        start_time_seconds: required_time(row, "start_time_raw")?,
        end_time_seconds: required_time(row, "end_time_raw")?,
        scientific_name: opt_text(row, "scientific_name")?,
        common_name: opt_text(row, "common_name")?,
        confidence,
        model_name: opt_text(row, "model_name")?,
        location: opt_text(row, "location")?,
        created_at: opt_text(row, "created_at")?.as_deref().and_then(parse_timestamp),
        quality_status,
        reviewed_at: opt_text(row, "reviewed_at")?.as_deref().and_then(parse_timestamp),
        review_notes: opt_text(row, "review_notes")?,
    })
}
