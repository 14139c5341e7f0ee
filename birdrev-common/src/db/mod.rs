//! Database access: connection setup, schema sync and the detection repository

pub mod detections;
pub mod init;
pub mod lookup_cache;
pub mod models;
pub mod schema_sync;
pub mod table_schemas;

pub use detections::{DetectionRepository, RepositoryOptions};
pub use init::{open_pool, PoolSettings};
pub use models::*;
pub use schema_sync::{ColumnDefinition, SchemaIntrospector, SchemaSync, SyncReport, TableSchema};
pub use table_schemas::{DETECTION_TABLE, REVIEW_SCHEMA_VERSION};
