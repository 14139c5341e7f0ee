//! Configuration loading tests
//!
//! Priority for the database folder: CLI flag, then BIRDNET_DATABASE_PATH,
//! then `[paths] database_folder` from the TOML file, then the built-in default.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.

use birdrev_common::config::{AppConfig, ConfigOverrides, CONFIG_FILE_ENV, DATABASE_FOLDER_ENV};
use birdrev_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(DATABASE_FOLDER_ENV);
    env::remove_var(CONFIG_FILE_ENV);
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_env_folder_used_without_cli_flag() {
    clear_env();
    let dir = TempDir::new().unwrap();
    env::set_var(DATABASE_FOLDER_ENV, dir.path());

    let config = AppConfig::load(&ConfigOverrides::default()).unwrap();

    assert_eq!(config.database_folder, dir.path());
    assert_eq!(config.database_path, dir.path().join("result.db"));
    assert_eq!(config.source_roots[0], dir.path().join("audio/completed"));
    clear_env();
}

#[test]
#[serial]
fn test_cli_flag_beats_env() {
    clear_env();
    let env_dir = TempDir::new().unwrap();
    let cli_dir = TempDir::new().unwrap();
    env::set_var(DATABASE_FOLDER_ENV, env_dir.path());

    let config = AppConfig::load(&ConfigOverrides {
        config_file: None,
        database_folder: Some(cli_dir.path().to_path_buf()),
    })
    .unwrap();

    assert_eq!(config.database_folder, cli_dir.path());
    clear_env();
}

#[test]
#[serial]
fn test_config_file_from_env() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let folder = dir.path().join("station");
    let config_path = write_config(
        &dir,
        &format!(
            "[paths]\ndatabase_folder = {:?}\nartifact_root = \"derived\"\n\n[server]\nport = 6000\n",
            folder.to_string_lossy()
        ),
    );
    env::set_var(CONFIG_FILE_ENV, &config_path);

    let config = AppConfig::load(&ConfigOverrides::default()).unwrap();

    assert_eq!(config.database_folder, folder);
    assert_eq!(config.artifact_root, folder.join("derived"));
    assert_eq!(config.server.port, 6000);

    // Env folder still outranks the file
    env::set_var(DATABASE_FOLDER_ENV, dir.path());
    let config = AppConfig::load(&ConfigOverrides::default()).unwrap();
    assert_eq!(config.database_folder, dir.path());
    clear_env();
}

#[test]
#[serial]
fn test_explicit_missing_config_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let result = AppConfig::load(&ConfigOverrides {
        config_file: Some(dir.path().join("absent.toml")),
        database_folder: Some(dir.path().to_path_buf()),
    });

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_invalid_config_file_is_reported() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, "[spectrogram]\nwidth = \"wide\"\n");

    let result = AppConfig::load(&ConfigOverrides {
        config_file: Some(config_path),
        database_folder: Some(dir.path().to_path_buf()),
    });

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_relative_folder_is_made_absolute() {
    clear_env();

    let config = AppConfig::load(&ConfigOverrides {
        config_file: None,
        database_folder: Some(PathBuf::from("relative/db")),
    })
    .unwrap();

    assert!(config.database_folder.is_absolute());
    assert!(config.database_folder.ends_with("relative/db"));
    assert!(config.database_path.is_absolute());
}
