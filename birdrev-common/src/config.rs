//! Configuration loading and database folder resolution
//!
//! Two layers:
//! 1. **TOML bootstrap** ([`TomlConfig`]): optional file, every field defaulted.
//! 2. **Resolved config** ([`AppConfig`]): absolute paths and validated
//!    generation parameters, built once at startup and handed to the
//!    repository and the processing manager. Nothing below this layer reads
//!    environment variables or files.
//!
//! # Database folder priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `BIRDNET_DATABASE_PATH` environment variable
//! 3. `[paths] database_folder` in the TOML file
//! 4. `./database` (fallback)
//!
//! The config file itself is taken from `--config`, then `BIRDREV_CONFIG`,
//! then `<user config dir>/birdrev/config.toml`, then
//! `/etc/birdrev/config.toml` on Linux. A missing default file is not an
//! error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the database folder
pub const DATABASE_FOLDER_ENV: &str = "BIRDNET_DATABASE_PATH";

/// Environment variable naming the config file
pub const CONFIG_FILE_ENV: &str = "BIRDREV_CONFIG";

const DEFAULT_DATABASE_FOLDER: &str = "database";
const DEFAULT_DATABASE_FILE: &str = "result.db";
const DEFAULT_SOURCE_ROOTS: [&str; 3] = ["audio/completed", "audio/inbox", "audio/failed"];

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub segment: SegmentSettings,

    #[serde(default)]
    pub spectrogram: SpectrogramSettings,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[paths]` section. Relative entries are resolved against the database folder.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathsConfig {
    /// Folder holding the database and, by default, audio and artifacts
    #[serde(default)]
    pub database_folder: Option<PathBuf>,

    /// Database file (default `result.db`)
    #[serde(default)]
    pub database_file: Option<PathBuf>,

    /// Source roots in search priority order
    #[serde(default)]
    pub source_roots: Option<Vec<PathBuf>>,

    /// Artifact output root (default: the database folder)
    #[serde(default)]
    pub artifact_root: Option<PathBuf>,
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Create `bird_detections` when the table is absent
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// SQLite busy timeout for writers in other processes
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Lifetime of cached session/species lookups
    #[serde(default = "default_lookup_cache_ttl_secs")]
    pub lookup_cache_ttl_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            lookup_cache_ttl_secs: default_lookup_cache_ttl_secs(),
        }
    }
}

/// Audio clip encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipFormat {
    /// 16-bit signed PCM WAV
    #[default]
    Wav16,
    /// 32-bit float WAV
    WavFloat32,
}

impl ClipFormat {
    pub fn extension(&self) -> &'static str {
        "wav"
    }
}

/// `[segment]` section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SegmentSettings {
    /// Output sample rate; `None` keeps the source rate
    #[serde(default)]
    pub output_sample_rate: Option<u32>,

    /// Padding added before start and after end, clipped to the recording
    #[serde(default)]
    pub context_seconds: f64,

    #[serde(default)]
    pub format: ClipFormat,
}

/// Spectrogram image encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Bmp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Bmp => "bmp",
        }
    }
}

/// Frequency axis of the rendered spectrogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyScale {
    #[default]
    Mel,
    Linear,
}

/// `[spectrogram]` section
#[derive(Debug, Clone, Deserialize)]
pub struct SpectrogramSettings {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_n_fft")]
    pub n_fft: usize,

    #[serde(default = "default_hop_length")]
    pub hop_length: usize,

    #[serde(default)]
    pub frequency_scale: FrequencyScale,

    #[serde(default = "default_mel_bands")]
    pub mel_bands: usize,

    #[serde(default)]
    pub fmin: f32,

    #[serde(default = "default_fmax")]
    pub fmax: f32,

    /// Dynamic range below the loudest bin that is rendered
    #[serde(default = "default_top_db")]
    pub top_db: f32,

    /// Same padding rule as segments
    #[serde(default)]
    pub context_seconds: f64,

    #[serde(default)]
    pub format: ImageFormat,
}

impl Default for SpectrogramSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            frequency_scale: FrequencyScale::default(),
            mel_bands: default_mel_bands(),
            fmin: 0.0,
            fmax: default_fmax(),
            top_db: default_top_db(),
            context_seconds: 0.0,
            format: ImageFormat::default(),
        }
    }
}

/// `[processing]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Detections processed at once in a batch (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Walk source roots recursively when the direct lookup fails
    #[serde(default = "default_true")]
    pub recursive_search: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            recursive_search: true,
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_lookup_cache_ttl_secs() -> u64 {
    300
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    480
}

fn default_n_fft() -> usize {
    2048
}

fn default_hop_length() -> usize {
    512
}

fn default_mel_bands() -> usize {
    128
}

fn default_fmax() -> f32 {
    8000.0
}

fn default_top_db() -> f32 {
    80.0
}

fn default_concurrency() -> usize {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub database_folder: Option<PathBuf>,
}

/// Fully resolved, process-wide configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_folder: PathBuf,
    pub database_path: PathBuf,
    /// Search roots, highest priority first
    pub source_roots: Vec<PathBuf>,
    pub artifact_root: PathBuf,
    pub database: DatabaseConfig,
    pub segment: SegmentSettings,
    pub spectrogram: SpectrogramSettings,
    pub processing: ProcessingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI overrides, environment, TOML and defaults
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let toml_config = match locate_config_file(overrides.config_file.as_deref())? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                TomlConfig::from_file(&path)?
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                TomlConfig::default()
            }
        };

        let database_folder = resolve_database_folder(
            overrides.database_folder.as_deref(),
            std::env::var(DATABASE_FOLDER_ENV).ok().as_deref(),
            toml_config.paths.database_folder.as_deref(),
        );

        Self::from_toml(toml_config, &absolutize(&database_folder)?)
    }

    /// Build from an already parsed TOML config and a resolved database folder
    pub fn from_toml(toml_config: TomlConfig, database_folder: &Path) -> Result<Self> {
        let TomlConfig {
            paths,
            database,
            segment,
            spectrogram,
            processing,
            server,
            logging,
        } = toml_config;

        let under_folder = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                database_folder.join(p)
            }
        };

        let database_path = under_folder(
            paths
                .database_file
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_DATABASE_FILE)),
        );

        let source_roots = match paths.source_roots {
            Some(roots) => roots.iter().map(|r| under_folder(r)).collect(),
            None => DEFAULT_SOURCE_ROOTS
                .iter()
                .map(|r| database_folder.join(r))
                .collect(),
        };

        let artifact_root = paths
            .artifact_root
            .as_deref()
            .map(under_folder)
            .unwrap_or_else(|| database_folder.to_path_buf());

        let config = Self {
            database_folder: database_folder.to_path_buf(),
            database_path,
            source_roots,
            artifact_root,
            database,
            segment,
            spectrogram,
            processing,
            server,
            logging,
        };
        config.validate()?;

        debug!(
            database = %config.database_path.display(),
            artifacts = %config.artifact_root.display(),
            roots = config.source_roots.len(),
            "Configuration resolved"
        );
        Ok(config)
    }

    /// Reject parameter combinations the generators cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.source_roots.is_empty() {
            return Err(Error::Config("at least one source root is required".into()));
        }
        if self.segment.context_seconds < 0.0 || self.spectrogram.context_seconds < 0.0 {
            return Err(Error::Config("context_seconds must not be negative".into()));
        }
        if self.segment.output_sample_rate == Some(0) {
            return Err(Error::Config("output_sample_rate must be positive".into()));
        }

        let spectrogram = &self.spectrogram;
        if spectrogram.width == 0 || spectrogram.height == 0 {
            return Err(Error::Config(format!(
                "spectrogram size {}x{} is empty",
                spectrogram.width, spectrogram.height
            )));
        }
        if spectrogram.n_fft < 2 || spectrogram.hop_length == 0 || spectrogram.hop_length > spectrogram.n_fft {
            return Err(Error::Config(format!(
                "invalid STFT parameters n_fft={} hop_length={}",
                spectrogram.n_fft, spectrogram.hop_length
            )));
        }
        if spectrogram.frequency_scale == FrequencyScale::Mel && spectrogram.mel_bands == 0 {
            return Err(Error::Config("mel_bands must be positive".into()));
        }
        if spectrogram.fmin < 0.0 || spectrogram.fmax <= spectrogram.fmin {
            return Err(Error::Config(format!(
                "frequency range {}..{} Hz is empty",
                spectrogram.fmin, spectrogram.fmax
            )));
        }
        if spectrogram.top_db <= 0.0 {
            return Err(Error::Config("top_db must be positive".into()));
        }
        if self.processing.concurrency == 0 {
            return Err(Error::Config("processing concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

impl TomlConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Apply the CLI > env > TOML > default priority for the database folder
pub fn resolve_database_folder(
    cli_arg: Option<&Path>,
    env_value: Option<&str>,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }
    PathBuf::from(DEFAULT_DATABASE_FOLDER)
}

/// Find the config file. An explicit path that does not exist is an error.
fn locate_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    let requested = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from));

    if let Some(path) = requested {
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let user_config = dirs::config_dir().map(|d| d.join("birdrev").join("config.toml"));
    if let Some(path) = user_config.filter(|p| p.exists()) {
        return Ok(Some(path));
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/birdrev/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }
    }

    Ok(None)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
