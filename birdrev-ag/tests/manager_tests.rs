//! Processing manager integration tests
//!
//! Real generators run against WAV fixtures written with hound; the
//! counting generator stands in where only the call count matters.

mod helpers;

use birdrev_ag::artifacts::{ArtifactKind, ArtifactLayout};
use birdrev_ag::generators::{ArtifactGenerator, GenerationOutcome};
use birdrev_ag::manager::{ArtifactResult, ManagerConfig, ProcessOptions, ProcessingManager};
use birdrev_common::DetectionFilter;
use helpers::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct CountingGenerator {
    kind: ArtifactKind,
    calls: Arc<AtomicUsize>,
    /// Cancelled on the first call when set
    cancel: Option<CancellationToken>,
}

impl ArtifactGenerator for CountingGenerator {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn generate(
        &self,
        _source: &Path,
        _start: f64,
        _end: f64,
        destination: &Path,
    ) -> birdrev_ag::Result<GenerationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
        std::fs::write(destination, b"artifact").unwrap();
        Ok(GenerationOutcome {
            path: destination.to_path_buf(),
            bytes: 8,
            source_duration: None,
            warnings: Vec::new(),
        })
    }
}

struct Counters {
    segment: Arc<AtomicUsize>,
    spectrogram: Arc<AtomicUsize>,
}

impl Counters {
    fn segment(&self) -> usize {
        self.segment.load(Ordering::SeqCst)
    }

    fn spectrogram(&self) -> usize {
        self.spectrogram.load(Ordering::SeqCst)
    }
}

async fn counting_manager(env: &TestEnv, cancel: Option<CancellationToken>) -> (ProcessingManager, Counters) {
    let counters = Counters {
        segment: Arc::new(AtomicUsize::new(0)),
        spectrogram: Arc::new(AtomicUsize::new(0)),
    };
    let layout = ArtifactLayout::new(
        env.config.artifact_root.clone(),
        env.config.segment.format,
        env.config.spectrogram.format,
    );
    let manager = ProcessingManager::new(
        env.repository().await,
        ManagerConfig::from_app_config(&env.config),
        layout,
    )
    .with_generator(Arc::new(CountingGenerator {
        kind: ArtifactKind::Segment,
        calls: counters.segment.clone(),
        cancel: cancel.clone(),
    }))
    .with_generator(Arc::new(CountingGenerator {
        kind: ArtifactKind::Spectrogram,
        calls: counters.spectrogram.clone(),
        cancel: None,
    }));
    (manager, counters)
}

fn thirty_second_source(env: &TestEnv, root: &str, name: &str) {
    generate_test_wav(&env.root(root).join(name), &AudioConfig::default()).unwrap();
}

#[tokio::test]
async fn test_scenario_generates_both_artifacts() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "test_audio.wav");
    env.insert(DetectionRow::new(1, "test_audio.wav", 10.0, 13.0)).await;
    let manager = env.manager().await;

    let outcome = manager.process_single(1).await.unwrap();

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.source, Some(env.root("completed").join("test_audio.wav")));

    let segment = env
        .dir
        .path()
        .join("audio_segments/0000/detection_000001.wav");
    let spectrogram = env
        .dir
        .path()
        .join("spectrograms/0000/detection_000001.png");
    assert!(std::fs::metadata(&segment).unwrap().len() > 0);
    assert!(std::fs::metadata(&spectrogram).unwrap().len() > 0);
    assert!((wav_duration(&segment).unwrap() - 3.0).abs() < 0.01);

    let image = image::open(&spectrogram).unwrap();
    assert_eq!((image.width(), image.height()), (800, 480));
}

#[tokio::test]
async fn test_second_call_reports_already_exists() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 1.0, 2.0)).await;
    let (manager, counters) = counting_manager(&env, None).await;

    let first = manager.process_single(1).await.unwrap();
    let second = manager.process_single(1).await.unwrap();

    assert!(first.success && second.success);
    assert_eq!(counters.segment(), 1);
    assert_eq!(counters.spectrogram(), 1);
    assert!(matches!(
        second.artifacts[&ArtifactKind::Segment],
        ArtifactResult::AlreadyExists { .. }
    ));
    assert!(second.message.contains("already exists"));

    let forced = manager
        .process_single_with(1, &ProcessOptions::forced())
        .await
        .unwrap();
    assert!(forced.success);
    assert_eq!(counters.segment(), 2);
    assert_eq!(counters.spectrogram(), 2);
}

#[tokio::test]
async fn test_existing_artifacts_do_not_need_the_source() {
    let env = TestEnv::new().await;
    env.insert(DetectionRow::new(4, "moved_away.wav", 1.0, 2.0)).await;
    let (manager, counters) = counting_manager(&env, None).await;
    for path in manager.artifact_paths(4).values() {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"cached").unwrap();
    }

    let outcome = manager.process_single(4).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.source.is_none());
    assert_eq!(counters.segment() + counters.spectrogram(), 0);
}

#[tokio::test]
async fn test_end_past_source_is_clamped() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "test_audio.wav");
    env.insert(DetectionRow::new(1, "test_audio.wav", 25.0, 35.0)).await;
    let manager = env.manager().await;

    let outcome = manager.process_single(1).await.unwrap();

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.warnings.iter().any(|w| w.contains("clamped")));
    let segment = manager.layout().artifact_path(1, ArtifactKind::Segment);
    assert!((wav_duration(&segment).unwrap() - 5.0).abs() < 0.01);
}

#[tokio::test]
async fn test_inverted_range_fails_without_files() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "test_audio.wav");
    env.insert(DetectionRow::new(1, "test_audio.wav", 13.0, 10.0)).await;
    let manager = env.manager().await;

    let outcome = manager.process_single(1).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_code.as_deref(), Some("RANGE_ERROR"));
    assert_eq!(
        manager.check_files_exist(1).values().filter(|e| **e).count(),
        0
    );
}

#[tokio::test]
async fn test_start_beyond_source_is_range_error() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "test_audio.wav");
    env.insert(DetectionRow::new(1, "test_audio.wav", 31.0, 33.0)).await;
    let manager = env.manager().await;

    let outcome = manager.process_single(1).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_code.as_deref(), Some("RANGE_ERROR"));
}

#[tokio::test]
async fn test_missing_detection_is_a_failed_outcome() {
    let env = TestEnv::new().await;
    let manager = env.manager().await;

    let outcome = manager.process_single(999).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error_code.as_deref(), Some("DETECTION_NOT_FOUND"));

    let negative = manager.process_single(-5).await.unwrap();
    assert_eq!(negative.error_code.as_deref(), Some("RANGE_ERROR"));
}

#[tokio::test]
async fn test_batch_isolates_missing_source() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    thirty_second_source(&env, "inbox", "b.wav");
    env.insert(DetectionRow::new(1, "a.wav", 1.0, 3.0)).await;
    env.insert(DetectionRow::new(2, "a.wav", 5.0, 6.5)).await;
    env.insert(DetectionRow::new(3, "b.wav", 2.0, 4.0)).await;
    env.insert(DetectionRow::new(4, "gone.wav", 2.0, 4.0)).await;
    let manager = env.manager().await;

    let report = manager.process_multiple(&[1, 2, 3, 4]).await.unwrap();

    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    let failed = &report.results[&4];
    assert!(!failed.success);
    assert_eq!(failed.error_code.as_deref(), Some("NOT_FOUND"));
    assert_eq!(report.results[&3].source, Some(env.root("inbox").join("b.wav")));
}

#[tokio::test]
async fn test_batch_deduplicates_and_reports_every_id() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 1.0, 2.0)).await;
    env.insert(DetectionRow::new(2, "a.wav", 3.0, 4.0)).await;
    let (manager, counters) = counting_manager(&env, None).await;

    let report = manager.process_multiple(&[2, 1, 2, 77, 1]).await.unwrap();

    assert_eq!(report.results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 77]);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(counters.segment(), 2);
}

#[tokio::test]
async fn test_concurrent_batch() {
    let env = TestEnv::with_toml("[processing]\nconcurrency = 4\n").await;
    thirty_second_source(&env, "completed", "a.wav");
    for id in 1..=12 {
        env.insert(DetectionRow::new(id, "a.wav", id as f64, id as f64 + 1.5)).await;
    }
    let manager = env.manager().await;
    let ids: Vec<i64> = (1..=12).collect();

    let report = manager.process_multiple(&ids).await.unwrap();

    assert_eq!(report.succeeded, 12);
    for id in ids {
        assert!(manager.check_files_exist(id).values().all(|e| *e));
    }
}

#[tokio::test]
async fn test_cancelled_batch_reports_unstarted_items() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    for id in 1..=3 {
        env.insert(DetectionRow::new(id, "a.wav", 1.0, 2.0)).await;
    }

    // Already cancelled: nothing runs
    let (manager, counters) = counting_manager(&env, None).await;
    let token = CancellationToken::new();
    token.cancel();
    let report = manager
        .process_multiple_with_cancel(&[1, 2, 3], &ProcessOptions::default(), &token)
        .await
        .unwrap();
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(counters.segment(), 0);

    // Cancelled while the first item runs: it finishes, the rest are skipped
    let token = CancellationToken::new();
    let (manager, counters) = counting_manager(&env, Some(token.clone())).await;
    let report = manager
        .process_multiple_with_cancel(&[1, 2, 3], &ProcessOptions::default(), &token)
        .await
        .unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(counters.segment(), 1);
    assert!(report.results[&1].success);
}

#[tokio::test]
async fn test_kind_selection() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 1.0, 2.0)).await;
    let (manager, counters) = counting_manager(&env, None).await;

    let outcome = manager
        .process_single_with(1, &ProcessOptions::only(ArtifactKind::Spectrogram))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(counters.segment(), 0);
    assert_eq!(counters.spectrogram(), 1);
    let exists = manager.check_files_exist(1);
    assert!(!exists[&ArtifactKind::Segment]);
    assert!(exists[&ArtifactKind::Spectrogram]);
}

#[tokio::test]
async fn test_spectrogram_bytes_are_deterministic() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 4.0, 7.0)).await;
    let manager = env.manager().await;
    let options = ProcessOptions {
        kinds: vec![ArtifactKind::Spectrogram],
        force: true,
    };

    manager.process_single_with(1, &options).await.unwrap();
    let path = manager.layout().artifact_path(1, ArtifactKind::Spectrogram);
    let first = std::fs::read(&path).unwrap();
    manager.process_single_with(1, &options).await.unwrap();
    let second = std::fs::read(&path).unwrap();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_bmp_and_float_formats() {
    let env = TestEnv::with_toml(
        "[segment]\nformat = \"wav_float32\"\noutput_sample_rate = 16000\n\n\
         [spectrogram]\nformat = \"bmp\"\nwidth = 200\nheight = 100\nfrequency_scale = \"linear\"\n",
    )
    .await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 2.0, 4.0)).await;
    let manager = env.manager().await;

    let outcome = manager.process_single(1).await.unwrap();
    assert!(outcome.success, "{}", outcome.message);

    let segment = manager.layout().artifact_path(1, ArtifactKind::Segment);
    let reader = hound::WavReader::open(&segment).unwrap();
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    assert_eq!(reader.spec().sample_rate, 16000);

    let spectrogram = manager.layout().artifact_path(1, ArtifactKind::Spectrogram);
    assert_eq!(spectrogram.extension().unwrap(), "bmp");
    let image = image::open(&spectrogram).unwrap();
    assert_eq!((image.width(), image.height()), (200, 100));
}

#[tokio::test]
async fn test_process_missing_only_touches_incomplete_detections() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    for id in 1..=3 {
        env.insert(DetectionRow::new(id, "a.wav", 1.0, 2.0)).await;
    }
    let mut other = DetectionRow::new(4, "a.wav", 1.0, 2.0);
    other.session = "other".to_string();
    env.insert(other).await;
    let (manager, counters) = counting_manager(&env, None).await;
    manager.process_single(2).await.unwrap();

    let report = manager
        .process_missing(
            &DetectionFilter::default().session("test_session"),
            &ProcessOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(counters.segment(), 3);

    let again = manager
        .process_missing(
            &DetectionFilter::default().session("test_session"),
            &ProcessOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(again.total(), 0);
}

#[tokio::test]
async fn test_stats_storage_and_cleanup() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "completed", "a.wav");
    env.insert(DetectionRow::new(1, "a.wav", 1.0, 2.0)).await;
    env.insert(DetectionRow::new(2, "a.wav", 3.0, 4.0)).await;
    let (manager, _) = counting_manager(&env, None).await;

    manager.process_multiple(&[1, 2, 99]).await.unwrap();
    manager.process_single(1).await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.generated[&ArtifactKind::Segment], 2);
    assert_eq!(stats.already_existing[&ArtifactKind::Spectrogram], 1);
    assert_eq!(stats.recent_errors.len(), 1);

    manager.reset_stats();
    assert_eq!(manager.stats().processed, 0);

    let usage = manager.storage_usage();
    assert_eq!(usage.total_files, 4);
    assert_eq!(usage.kinds[&ArtifactKind::Segment].bytes, 16);

    // Counting generator writes 8-byte files; a leftover temp file goes too
    let bucket = manager.layout().kind_dir(ArtifactKind::Segment).join("0000");
    std::fs::write(bucket.join(".tmp-abandoned"), b"partial").unwrap();
    let report = manager.cleanup_incomplete(1024);
    assert_eq!(report.removed[&ArtifactKind::Segment], 2);
    assert_eq!(report.removed[&ArtifactKind::Spectrogram], 2);
    assert_eq!(report.temp_files_removed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(manager.storage_usage().total_files, 0);
}

#[tokio::test]
async fn test_source_lookup_follows_root_priority() {
    let env = TestEnv::new().await;
    thirty_second_source(&env, "failed", "dup.wav");
    thirty_second_source(&env, "inbox", "dup.wav");
    generate_test_wav(
        &env.root("completed").join("nested/deeper/stem_only.wav"),
        &AudioConfig::default(),
    )
    .unwrap();
    thirty_second_source(&env, "inbox", "stem_only.mp3");
    env.insert(DetectionRow::new(1, "dup.wav", 1.0, 2.0)).await;
    env.insert(DetectionRow::new(2, "stem_only", 1.0, 2.0)).await;
    let (manager, _) = counting_manager(&env, None).await;

    let outcome = manager.process_single(1).await.unwrap();
    assert_eq!(outcome.source, Some(env.root("inbox").join("dup.wav")));

    // Direct lookup in any root beats the recursive walk
    let outcome = manager.process_single(2).await.unwrap();
    assert_eq!(outcome.source, Some(env.root("inbox").join("stem_only.mp3")));
}

#[tokio::test(flavor = "current_thread")]
async fn test_source_lookup_runs_off_the_runtime_thread() {
    let env = TestEnv::new().await;
    for idx in 0..3 {
        generate_test_wav(
            &env.root("failed").join(format!("moved/day{}/rec_{}.wav", idx, idx)),
            &AudioConfig::default(),
        )
        .unwrap();
        env.insert(DetectionRow::new(idx + 1, &format!("rec_{}.wav", idx), 1.0, 2.0)).await;
    }
    env.insert(DetectionRow::new(9, "gone.wav", 1.0, 2.0)).await;
    let (manager, counters) = counting_manager(&env, None).await;

    let detection = manager.repository().get(2).await.unwrap().unwrap();
    let source = manager.resolve_source(&detection).await.unwrap();
    assert_eq!(source, env.root("failed").join("moved/day1/rec_1.wav"));

    let missing = manager.repository().get(9).await.unwrap().unwrap();
    let err = manager.resolve_source(&missing).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    // Recursive lookups inside a batch on a single-threaded runtime
    let report = manager.process_multiple(&[1, 2, 3, 9]).await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(counters.segment() + counters.spectrogram(), 6);
}

#[tokio::test]
async fn test_review_columns_created_by_manager_repository() {
    let env = TestEnv::new().await;
    let _manager = env.manager().await;

    assert_has_column(&env.pool, "bird_detections", "quality_status").await;
    assert_has_column(&env.pool, "bird_detections", "reviewed_at").await;
    assert_has_column(&env.pool, "bird_detections", "review_notes").await;
}
