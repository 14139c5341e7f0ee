//! Additive schema synchronization
//!
//! Declarative column definitions compared against `PRAGMA table_info`.
//! Missing columns are added with `ALTER TABLE ... ADD COLUMN`; nothing is
//! ever dropped, renamed or retyped. Drift that cannot be fixed additively
//! is logged and left alone.
//!
//! # Usage
//!
//! ```rust,ignore
//! pub struct ReviewColumnsSchema;
//!
//! impl TableSchema for ReviewColumnsSchema {
//!     fn table_name() -> &'static str { "bird_detections" }
//!
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![ColumnDefinition::new("reviewed_at", "TIMESTAMP")]
//!     }
//! }
//!
//! let report = SchemaSync::sync_table::<ReviewColumnsSchema>(&pool).await?;
//! ```

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "TIMESTAMP")
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// DEFAULT value, as SQL text (`'pending'`, `CURRENT_TIMESTAMP`)
    pub default_value: Option<String>,
    /// CHECK expression without the `CHECK` keyword
    pub check: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            default_value: None,
            check: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.check = Some(expression.into());
        self
    }

    /// Column clause usable in `CREATE TABLE` and `ALTER TABLE ADD COLUMN`
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK({})", check));
        }
        sql
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Column missing from database
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch (cannot auto-fix)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
}

/// Expected columns for one table
pub trait TableSchema {
    fn table_name() -> &'static str;

    /// Expected column definitions (order matters for new table creation)
    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Outcome of one [`SchemaSync::sync_table`] run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Columns added by this run
    pub added: Vec<String>,
    /// Drift items that were logged but not fixed
    pub unresolved: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Schema introspection via PRAGMA table_info
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns, ordered by cid
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", quote_identifier(table_name));
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);
        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Names from `required` that the table lacks
    pub fn missing_columns<'a>(actual: &[ActualColumn], required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !actual.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
            .copied()
            .collect()
    }
}

/// Schema comparison
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            match actual
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&expected_col.name))
            {
                Some(actual_col) => {
                    if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            expected: expected_col.sql_type.clone(),
                            actual: actual_col.type_name.clone(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                }),
            }
        }

        drift
    }

    /// SQLite type affinity comparison. Untyped columns accept anything.
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act || act.is_empty() {
            return true;
        }

        let is_int = |t: &str| t.contains("INT");
        let is_text = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        let is_real = |t: &str| t.contains("REAL") || t.contains("FLOAT") || t.contains("DOUBLE");
        let is_time = |t: &str| t.contains("TIMESTAMP") || t.contains("DATETIME");

        (is_int(&exp) && is_int(&act))
            || (is_text(&exp) && is_text(&act))
            || (is_real(&exp) && is_real(&act))
            || (is_time(&exp) && (is_time(&act) || is_text(&act)))
    }
}

/// Apply additive schema changes
pub struct SchemaSync;

impl SchemaSync {
    /// Add every missing column of `T` to an existing table.
    ///
    /// A table that does not exist is an error: creation belongs to the caller.
    pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<SyncReport> {
        let table_name = T::table_name();
        let expected = T::expected_columns();

        debug!("Schema sync: checking table '{}'", table_name);

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            return Err(Error::Schema(format!("table '{}' does not exist", table_name)));
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        let drift = SchemaDiff::compare(table_name, &expected, &actual);

        let mut report = SyncReport::default();
        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    if Self::add_column(pool, &table, &column).await? {
                        report.added.push(column.name);
                    }
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'; leaving column as is",
                        table, column, expected, actual
                    );
                    report.unresolved += 1;
                }
            }
        }

        if report.changed() {
            info!("Schema sync added {:?} to '{}'", report.added, table_name);
        }
        Ok(report)
    }

    /// `ALTER TABLE ADD COLUMN`. Returns false when another connection won the race.
    pub async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<bool> {
        // SQLite cannot add PRIMARY KEY columns, nor NOT NULL ones without a default
        let mut effective = column.clone();
        if effective.primary_key {
            warn!("Cannot add PRIMARY KEY column {}.{}; adding it as a plain column", table, column.name);
            effective.primary_key = false;
        }
        if effective.not_null && effective.default_value.is_none() {
            warn!("Cannot add NOT NULL column {}.{} without a DEFAULT; adding it nullable", table, column.name);
            effective.not_null = false;
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_identifier(table),
            effective.to_sql()
        );

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => {
                info!("Added column {}.{} ({})", table, column.name, column.sql_type);
                Ok(true)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                info!("Column {}.{} already added by another connection", table, column.name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Double-quote an identifier for interpolation into DDL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
