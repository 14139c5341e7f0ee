//! Test Helper Utilities
//!
//! Shared utilities for testing birdrev-ag

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;

pub use audio_generator::{generate_test_wav, wav_duration, AudioConfig};
pub use db_utils::{assert_has_column, create_legacy_table, has_column, insert_detection, DetectionRow};

use birdrev_ag::ProcessingManager;
use birdrev_common::config::{AppConfig, TomlConfig};
use birdrev_common::db::{open_pool, PoolSettings, RepositoryOptions};
use birdrev_common::DetectionRepository;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Database folder laid out like a field station install:
/// `result.db` plus `audio/{completed,inbox,failed}`, artifacts alongside.
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub config: AppConfig,
}

impl TestEnv {
    /// Legacy detection table, no rows, default configuration
    pub async fn new() -> Self {
        Self::with_toml("").await
    }

    /// Same as [`Self::new`] with extra TOML configuration
    pub async fn with_toml(toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let toml_config = TomlConfig::from_str(toml).unwrap();
        let config = AppConfig::from_toml(toml_config, dir.path()).unwrap();

        let pool = open_pool(&config.database_path, &PoolSettings::default())
            .await
            .unwrap();
        create_legacy_table(&pool).await.unwrap();

        Self { dir, pool, config }
    }

    /// Source root by directory name (`completed`, `inbox`, `failed`)
    pub fn root(&self, name: &str) -> PathBuf {
        self.dir.path().join("audio").join(name)
    }

    pub async fn insert(&self, row: DetectionRow) {
        insert_detection(&self.pool, &row).await.unwrap();
    }

    pub async fn repository(&self) -> Arc<DetectionRepository> {
        Arc::new(
            DetectionRepository::from_pool(self.pool.clone(), RepositoryOptions::default())
                .await
                .unwrap(),
        )
    }

    /// Manager with the real segment and spectrogram generators
    pub async fn manager(&self) -> ProcessingManager {
        ProcessingManager::from_app_config(self.repository().await, &self.config)
    }
}
