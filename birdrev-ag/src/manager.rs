//! Processing manager
//!
//! Orchestrates artifact generation for one or many detections:
//! look up the detection, skip artifacts that already exist (unless forced),
//! resolve the source recording and run the generators on the blocking pool.
//!
//! Every per-detection failure ends up in a [`ProcessOutcome`]; only
//! repository failures are returned as `Err`.

use crate::artifacts::{ArtifactKind, ArtifactLayout, PathResolver, TEMP_PREFIX};
use crate::error::{ProcessingError, Result};
use crate::generators::{ArtifactGenerator, SegmentGenerator, SpectrogramGenerator};
use birdrev_common::config::AppConfig;
use birdrev_common::{Detection, DetectionFilter, DetectionRepository};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Recent error messages kept in [`ProcessingStats`]
pub const MAX_RECENT_ERRORS: usize = 100;

/// Default size threshold for [`ProcessingManager::cleanup_incomplete`]
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;

/// Per-request options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub kinds: Vec<ArtifactKind>,
    /// Regenerate even when the artifact exists
    pub force: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            kinds: ArtifactKind::ALL.to_vec(),
            force: false,
        }
    }
}

impl ProcessOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn only(kind: ArtifactKind) -> Self {
        Self {
            kinds: vec![kind],
            force: false,
        }
    }

    /// Requested kinds in a stable order, without duplicates
    fn normalized_kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds = self.kinds.clone();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// What happened to one artifact of one detection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactResult {
    AlreadyExists { path: PathBuf },
    Generated { path: PathBuf, bytes: u64 },
    Failed { code: String, message: String },
}

impl ArtifactResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ArtifactResult::Failed { .. })
    }

    fn describe(&self) -> String {
        match self {
            ArtifactResult::AlreadyExists { .. } => "already exists".to_string(),
            ArtifactResult::Generated { .. } => "generated".to_string(),
            ArtifactResult::Failed { message, .. } => format!("failed ({})", message),
        }
    }
}

/// Result of processing one detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub detection_id: i64,
    pub success: bool,
    pub message: String,
    /// Resolved recording, when resolution was needed and succeeded
    pub source: Option<PathBuf>,
    pub artifacts: BTreeMap<ArtifactKind, ArtifactResult>,
    /// Error code of the failure that stopped processing early
    pub error_code: Option<String>,
    pub warnings: Vec<String>,
}

impl ProcessOutcome {
    fn failed(detection_id: i64, error: &ProcessingError) -> Self {
        Self {
            detection_id,
            success: false,
            message: error.to_string(),
            source: None,
            artifacts: BTreeMap::new(),
            error_code: Some(error.code().to_string()),
            warnings: Vec::new(),
        }
    }

    fn cancelled(detection_id: i64) -> Self {
        Self::failed(detection_id, &ProcessingError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_code.as_deref() == Some(ProcessingError::Cancelled.code())
    }
}

/// Result of a batch request; every requested id has an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: BTreeMap<i64, ProcessOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed entries that never started because the batch was cancelled
    pub cancelled: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: ProcessOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if outcome.is_cancelled() {
                self.cancelled += 1;
            }
        }
        self.results.insert(outcome.detection_id, outcome);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }
}

/// Snapshot of cumulative processing counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub generated: BTreeMap<ArtifactKind, u64>,
    pub already_existing: BTreeMap<ArtifactKind, u64>,
    /// Newest last, at most [`MAX_RECENT_ERRORS`]
    pub recent_errors: Vec<String>,
}

#[derive(Default)]
struct StatsCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    generated: [AtomicU64; 2],
    already_existing: [AtomicU64; 2],
    recent_errors: Mutex<VecDeque<String>>,
}

impl StatsCounters {
    fn record(&self, outcome: &ProcessOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.push_error(format!("detection {}: {}", outcome.detection_id, outcome.message));
        }

        for (kind, result) in &outcome.artifacts {
            let slot = kind_index(*kind);
            match result {
                ArtifactResult::Generated { .. } => {
                    self.generated[slot].fetch_add(1, Ordering::Relaxed);
                }
                ArtifactResult::AlreadyExists { .. } => {
                    self.already_existing[slot].fetch_add(1, Ordering::Relaxed);
                }
                ArtifactResult::Failed { .. } => {}
            }
        }
    }

    fn push_error(&self, message: String) {
        let mut errors = self.recent_errors.lock().unwrap_or_else(|e| e.into_inner());
        if errors.len() == MAX_RECENT_ERRORS {
            errors.pop_front();
        }
        errors.push_back(message);
    }

    fn snapshot(&self) -> ProcessingStats {
        let per_kind = |counters: &[AtomicU64; 2]| -> BTreeMap<ArtifactKind, u64> {
            ArtifactKind::ALL
                .iter()
                .map(|kind| (*kind, counters[kind_index(*kind)].load(Ordering::Relaxed)))
                .collect()
        };
        let errors = self.recent_errors.lock().unwrap_or_else(|e| e.into_inner());

        ProcessingStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            generated: per_kind(&self.generated),
            already_existing: per_kind(&self.already_existing),
            recent_errors: errors.iter().cloned().collect(),
        }
    }

    fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        for counter in self.generated.iter().chain(self.already_existing.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
        self.recent_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn kind_index(kind: ArtifactKind) -> usize {
    match kind {
        ArtifactKind::Segment => 0,
        ArtifactKind::Spectrogram => 1,
    }
}

/// File count and size for one artifact kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindUsage {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub kinds: BTreeMap<ArtifactKind, KindUsage>,
    pub total_files: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Undersized artifacts removed, per kind
    pub removed: BTreeMap<ArtifactKind, u64>,
    pub temp_files_removed: u64,
    pub errors: Vec<String>,
}

/// Settings the manager needs from the process configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub source_roots: Vec<PathBuf>,
    pub artifact_root: PathBuf,
    pub recursive_search: bool,
    pub concurrency: usize,
}

impl ManagerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            source_roots: config.source_roots.clone(),
            artifact_root: config.artifact_root.clone(),
            recursive_search: config.processing.recursive_search,
            concurrency: config.processing.concurrency,
        }
    }
}

pub struct ProcessingManager {
    repository: Arc<DetectionRepository>,
    resolver: Arc<PathResolver>,
    layout: ArtifactLayout,
    generators: BTreeMap<ArtifactKind, Arc<dyn ArtifactGenerator>>,
    concurrency: usize,
    stats: StatsCounters,
}

impl ProcessingManager {
    /// Manager with the standard segment and spectrogram generators
    pub fn from_app_config(repository: Arc<DetectionRepository>, config: &AppConfig) -> Self {
        let layout = ArtifactLayout::new(
            config.artifact_root.clone(),
            config.segment.format,
            config.spectrogram.format,
        );
        Self::new(repository, ManagerConfig::from_app_config(config), layout)
            .with_generator(Arc::new(SegmentGenerator::new(config.segment.clone())))
            .with_generator(Arc::new(SpectrogramGenerator::new(config.spectrogram.clone())))
    }

    /// Manager without generators; register them with [`Self::with_generator`]
    pub fn new(
        repository: Arc<DetectionRepository>,
        config: ManagerConfig,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            repository,
            resolver: Arc::new(PathResolver::new(config.source_roots, config.recursive_search)),
            layout,
            generators: BTreeMap::new(),
            concurrency: config.concurrency.max(1),
            stats: StatsCounters::default(),
        }
    }

    /// Register (or replace) the generator for its kind
    pub fn with_generator(mut self, generator: Arc<dyn ArtifactGenerator>) -> Self {
        self.generators.insert(generator.kind(), generator);
        self
    }

    pub fn repository(&self) -> &Arc<DetectionRepository> {
        &self.repository
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Locate the source recording on the blocking pool.
    ///
    /// Hint probes and the recursive walk touch the filesystem, so they stay
    /// off the runtime workers.
    pub async fn resolve_source(&self, detection: &Detection) -> Result<PathBuf> {
        let resolver = Arc::clone(&self.resolver);
        let detection = detection.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&detection))
            .await
            .map_err(|e| ProcessingError::Internal(format!("source lookup task failed: {}", e)))?
    }

    /// Process one detection with default options
    pub async fn process_single(&self, detection_id: i64) -> Result<ProcessOutcome> {
        self.process_single_with(detection_id, &ProcessOptions::default())
            .await
    }

    pub async fn process_single_with(
        &self,
        detection_id: i64,
        options: &ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let outcome = self.process_one(detection_id, options).await?;
        self.stats.record(&outcome);

        if outcome.success {
            debug!(detection_id, "{}", outcome.message);
        } else {
            warn!(detection_id, code = ?outcome.error_code, "Processing failed: {}", outcome.message);
        }
        Ok(outcome)
    }

    async fn process_one(&self, detection_id: i64, options: &ProcessOptions) -> Result<ProcessOutcome> {
        if detection_id < 0 {
            let error = ProcessingError::Range(format!("detection id {} is negative", detection_id));
            return Ok(ProcessOutcome::failed(detection_id, &error));
        }

        let detection = match self.repository.get(detection_id).await {
            Ok(Some(detection)) => detection,
            Ok(None) => {
                let error = ProcessingError::DetectionNotFound(detection_id);
                return Ok(ProcessOutcome::failed(detection_id, &error));
            }
            Err(e) if e.is_storage_failure() => return Err(ProcessingError::Repository(e)),
            Err(e) => {
                let error = ProcessingError::InvalidDetection {
                    id: detection_id,
                    reason: e.to_string(),
                };
                return Ok(ProcessOutcome::failed(detection_id, &error));
            }
        };

        Ok(self.generate_for(&detection, options).await)
    }

    /// Run the requested generators for an already loaded detection
    async fn generate_for(&self, detection: &Detection, options: &ProcessOptions) -> ProcessOutcome {
        let mut artifacts = BTreeMap::new();
        let mut pending = Vec::new();

        for kind in options.normalized_kinds() {
            let path = self.layout.artifact_path(detection.id, kind);
            if !options.force && path.is_file() {
                artifacts.insert(kind, ArtifactResult::AlreadyExists { path });
            } else {
                pending.push((kind, path));
            }
        }

        let mut outcome = ProcessOutcome {
            detection_id: detection.id,
            success: true,
            message: String::new(),
            source: None,
            artifacts,
            error_code: None,
            warnings: Vec::new(),
        };

        if !pending.is_empty() {
            match self.resolve_source(detection).await {
                Ok(source) => {
                    for (kind, path) in pending {
                        let result = self
                            .run_generator(kind, &source, detection, &path)
                            .await;
                        let result = match result {
                            Ok(generated) => {
                                outcome.warnings.extend(generated.warnings);
                                ArtifactResult::Generated {
                                    path: generated.path,
                                    bytes: generated.bytes,
                                }
                            }
                            Err(e) => {
                                outcome.error_code.get_or_insert_with(|| e.code().to_string());
                                ArtifactResult::Failed {
                                    code: e.code().to_string(),
                                    message: e.to_string(),
                                }
                            }
                        };
                        outcome.artifacts.insert(kind, result);
                    }
                    outcome.source = Some(source);
                }
                Err(e) => {
                    for (kind, _) in pending {
                        outcome.artifacts.insert(
                            kind,
                            ArtifactResult::Failed {
                                code: e.code().to_string(),
                                message: e.to_string(),
                            },
                        );
                    }
                    outcome.error_code = Some(e.code().to_string());
                }
            }
        }

        outcome.warnings.dedup();
        outcome.success = outcome.artifacts.values().all(ArtifactResult::is_ok);
        outcome.message = if outcome.artifacts.is_empty() {
            "no artifact kinds requested".to_string()
        } else {
            outcome
                .artifacts
                .iter()
                .map(|(kind, result)| format!("{}: {}", kind, result.describe()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        outcome
    }

    async fn run_generator(
        &self,
        kind: ArtifactKind,
        source: &Path,
        detection: &Detection,
        destination: &Path,
    ) -> Result<crate::generators::GenerationOutcome> {
        let generator = self
            .generators
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProcessingError::Internal(format!("no generator registered for {}", kind)))?;

        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let start = detection.start_time_seconds;
        let end = detection.end_time_seconds;

        tokio::task::spawn_blocking(move || generator.generate(&source, start, end, &destination))
            .await
            .map_err(|e| ProcessingError::Internal(format!("generator task failed: {}", e)))?
    }

    /// Process several detections with default options
    pub async fn process_multiple(&self, ids: &[i64]) -> Result<BatchReport> {
        self.process_multiple_with_cancel(ids, &ProcessOptions::default(), &CancellationToken::new())
            .await
    }

    /// Process several detections until `token` is cancelled.
    ///
    /// Duplicate ids are processed once. Items already running when the
    /// token fires finish normally; items not yet started are reported as
    /// cancelled failures.
    pub async fn process_multiple_with_cancel(
        &self,
        ids: &[i64],
        options: &ProcessOptions,
        token: &CancellationToken,
    ) -> Result<BatchReport> {
        let mut seen = HashSet::new();
        let unique: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        info!(
            requested = ids.len(),
            unique = unique.len(),
            concurrency = self.concurrency,
            "Batch processing started"
        );

        let mut report = BatchReport::default();
        let mut results = stream::iter(unique)
            .map(|id| async move {
                if token.is_cancelled() {
                    return Ok(ProcessOutcome::cancelled(id));
                }
                self.process_single_with(id, options).await
            })
            .buffer_unordered(self.concurrency);

        while let Some(result) = results.next().await {
            report.record(result?);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Batch processing finished"
        );
        Ok(report)
    }

    /// Where each artifact kind would be written for `detection_id`
    pub fn artifact_paths(&self, detection_id: i64) -> BTreeMap<ArtifactKind, PathBuf> {
        ArtifactKind::ALL
            .iter()
            .map(|kind| (*kind, self.layout.artifact_path(detection_id, *kind)))
            .collect()
    }

    /// Existence probe per kind. No generation, no database access.
    pub fn check_files_exist(&self, detection_id: i64) -> BTreeMap<ArtifactKind, bool> {
        self.artifact_paths(detection_id)
            .into_iter()
            .map(|(kind, path)| (kind, detection_id >= 0 && path.is_file()))
            .collect()
    }

    /// Process every detection matching `filter` that lacks a requested artifact
    pub async fn process_missing(
        &self,
        filter: &DetectionFilter,
        options: &ProcessOptions,
        token: &CancellationToken,
    ) -> Result<BatchReport> {
        let detections = self.repository.query(filter).await?;
        let kinds = options.normalized_kinds();

        let ids: Vec<i64> = detections
            .iter()
            .filter(|d| {
                options.force
                    || kinds
                        .iter()
                        .any(|kind| !self.layout.artifact_path(d.id, *kind).is_file())
            })
            .map(|d| d.id)
            .collect();

        info!(
            matched = detections.len(),
            missing = ids.len(),
            "Processing detections with missing artifacts"
        );

        if ids.is_empty() {
            return Ok(BatchReport::default());
        }
        self.process_multiple_with_cancel(&ids, options, token).await
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Artifact files and bytes under the output root, per kind
    pub fn storage_usage(&self) -> StorageUsage {
        let mut usage = StorageUsage::default();

        for kind in ArtifactKind::ALL {
            let mut kind_usage = KindUsage::default();
            for (_, size) in self.artifact_files(kind) {
                kind_usage.files += 1;
                kind_usage.bytes += size;
            }
            usage.total_files += kind_usage.files;
            usage.total_bytes += kind_usage.bytes;
            usage.kinds.insert(kind, kind_usage);
        }
        usage
    }

    /// Remove artifacts smaller than `min_bytes` and leftover temporary files.
    ///
    /// Run while no batch is active; in-progress temporary files are removed too.
    pub fn cleanup_incomplete(&self, min_bytes: u64) -> CleanupReport {
        let mut report = CleanupReport::default();

        for kind in ArtifactKind::ALL {
            let mut removed = 0;
            for (path, size) in self.artifact_files(kind) {
                if size >= min_bytes {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), size, "Removed undersized artifact");
                        removed += 1;
                    }
                    Err(e) => report.errors.push(format!("{}: {}", path.display(), e)),
                }
            }
            report.removed.insert(kind, removed);

            for entry in WalkDir::new(self.layout.kind_dir(kind))
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => report.temp_files_removed += 1,
                    Err(e) => report.errors.push(format!("{}: {}", entry.path().display(), e)),
                }
            }
        }

        info!(
            removed = ?report.removed,
            temp_files = report.temp_files_removed,
            errors = report.errors.len(),
            "Artifact cleanup finished"
        );
        report
    }

    /// Artifact files of one kind with their sizes
    fn artifact_files(&self, kind: ArtifactKind) -> Vec<(PathBuf, u64)> {
        let dir = self.layout.kind_dir(kind);
        if !dir.is_dir() {
            return Vec::new();
        }

        WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                self.layout
                    .parse_file_name(kind, &e.file_name().to_string_lossy())
                    .is_some()
            })
            .filter_map(|e| {
                let size = e.metadata().ok()?.len();
                Some((e.into_path(), size))
            })
            .collect()
    }
}
