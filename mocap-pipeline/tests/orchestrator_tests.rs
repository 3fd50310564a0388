//! End-to-end orchestrator tests
//!
//! Sessions are built in a temp folder with placeholder video files. Video
//! access, detection and (where noted) filtering are in-memory fakes; the
//! geometry, COM and artifact code are the production paths.

mod helpers;

use helpers::scene::{IMAGE_HEIGHT, IMAGE_WIDTH};
use helpers::{
    body_point, capture_test_logs, landmark_frames, scene_bundle, FakeVideoIo, IdentityFilter, SceneDetector,
    SCENE_CALIBRATION_TOML,
};
use mocap_common::config::{PipelineConfig, SyncMode};
use mocap_common::events::{progress_channel, PipelineEvent, Stage};
use mocap_pipeline::arrays::{
    Keypoints2D, NumericArray, ReprojectionError, SegmentCom, Skeleton3D, WholeBodyCom,
};
use mocap_pipeline::detect::frames_to_keypoints;
use mocap_pipeline::filter::{ButterworthFilter, TemporalFilter};
use mocap_pipeline::npy;
use mocap_pipeline::schema::{BODY_LANDMARK_NAMES, BODY_POINT_COUNT, TOTAL_POINT_COUNT};
use mocap_pipeline::sync::debug_record::SyncDebugRecord;
use mocap_pipeline::{Orchestrator, PipelineRun, RunContext, RunState};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FRAMES: usize = 100;

/// Session folder with `cameras` placeholder raw videos and a calibration
/// file outside the session
fn create_session(temp_dir: &TempDir, cameras: usize) -> (PathBuf, PathBuf) {
    let session = temp_dir.path().join("session_01");
    let raw_videos = session.join("raw_videos");
    std::fs::create_dir_all(&raw_videos).unwrap();
    for camera in 0..cameras {
        std::fs::write(raw_videos.join(format!("cam_{}.mp4", camera)), b"").unwrap();
    }

    let calibration = temp_dir.path().join("scene_calibration.toml");
    std::fs::write(&calibration, SCENE_CALIBRATION_TOML).unwrap();
    (session, calibration)
}

fn manual_sync_config(cameras: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.synchronization.mode = SyncMode::Manual;
    config.synchronization.manual_frames = vec![0; cameras];
    config.synchronization.export_trimmed_audio = false;
    config.progress_channel_capacity = 4096;
    config
}

fn scene_detector(cameras: usize) -> SceneDetector {
    let bundle = scene_bundle();
    SceneDetector::new((0..cameras).map(|c| landmark_frames(&bundle, c, FRAMES)).collect())
}

async fn run_pipeline(
    orchestrator: &Orchestrator,
    ctx: &RunContext,
    cancel_token: &CancellationToken,
) -> (PipelineRun, Vec<PipelineEvent>) {
    let (progress, mut receiver) = progress_channel(ctx.config.progress_channel_capacity);
    let run = orchestrator.run(ctx, &progress, cancel_token).await;
    (run, receiver.drain())
}

fn started_stages(events: &[PipelineEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn skipped_stages(events: &[PipelineEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageSkipped { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn assert_close(got: [f64; 3], want: [f64; 3], tolerance: f64) {
    for axis in 0..3 {
        assert!(
            (got[axis] - want[axis]).abs() < tolerance,
            "axis {}: {} vs {}",
            axis,
            got[axis],
            want[axis]
        );
    }
}

fn scene_keypoints(cameras: usize) -> Keypoints2D {
    let bundle = scene_bundle();
    let per_camera = (0..cameras)
        .map(|c| frames_to_keypoints(&landmark_frames(&bundle, c, FRAMES), IMAGE_WIDTH, IMAGE_HEIGHT, 0.5))
        .collect();
    Keypoints2D::from_cameras(per_camera).unwrap()
}

fn save_scene_keypoints(path: &Path, cameras: usize) {
    npy::save(path, &scene_keypoints(cameras)).unwrap();
}

fn failure(events: &[PipelineEvent]) -> (Option<Stage>, String) {
    match events.last() {
        Some(PipelineEvent::RunFailed { stage, error, .. }) => (*stage, error.clone()),
        other => panic!("expected RunFailed, got {:?}", other),
    }
}

/// **Test:** Full three-camera run with manual sync and the Butterworth filter
/// **Expected:** Completed, every stage started in order, every artifact
/// written with the documented shape, scene recovered in the raw 3D data
#[tokio::test]
async fn test_three_camera_run_completes() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 3);
    let ctx = RunContext::new(&session, manual_sync_config(3), Some(calibration));
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(3)),
        Arc::new(ButterworthFilter::new()),
    );

    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Completed, "error: {:?}", run.error);
    assert!(run.qa_warnings.is_empty(), "{:?}", run.qa_warnings);
    assert_eq!(run.lag_seconds.len(), 3);
    assert_eq!(run.stages.len(), 7);

    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::RunCompleted { .. })));
    assert_eq!(started_stages(&events), Stage::ALL.to_vec());
    assert!(skipped_stages(&events).is_empty());

    // Raw 3D: every tracked point, body landmarks recovered
    let raw: Skeleton3D = npy::load(&ctx.raw_3d_path()).unwrap();
    assert_eq!(raw.shape(), vec![FRAMES, TOTAL_POINT_COUNT, 3]);
    for frame in [0, 37, 99] {
        for point in 0..BODY_POINT_COUNT {
            assert_close(raw.get(frame, point), body_point(frame, point), 1e-6);
        }
    }
    let error: ReprojectionError = npy::load(&ctx.reprojection_error_path()).unwrap();
    assert_eq!(error.shape(), vec![FRAMES, TOTAL_POINT_COUNT]);

    let filtered: Skeleton3D = npy::load(&ctx.filtered_3d_path()).unwrap();
    assert_eq!(filtered.shape(), vec![FRAMES, TOTAL_POINT_COUNT, 3]);

    let segment: SegmentCom = npy::load(&ctx.segment_com_path()).unwrap();
    let whole_body: WholeBodyCom = npy::load(&ctx.total_body_com_path()).unwrap();
    assert_eq!(segment.shape(), vec![FRAMES, 14, 3]);
    assert_eq!(whole_body.shape(), vec![FRAMES, 3]);
    assert_eq!(whole_body.nan_count(), 0);

    let record = SyncDebugRecord::read(&ctx.synchronization_debug_path()).unwrap();
    assert_eq!(record.mode, "manual");
    assert!(record.lag_dictionary.values().all(|lag| *lag == 0.0));

    assert!(ctx.names_and_connections_path().is_file());
    assert!(ctx.segment_lengths_path().is_file());
    assert!(session.join("scene_calibration.toml").is_file());

    let mut body_table = csv::Reader::from_path(ctx.landmark_csv_path("body")).unwrap();
    assert_eq!(&body_table.headers().unwrap()[0], "nose_x");
    assert_eq!(body_table.records().count(), FRAMES);
    for group in ["right_hand", "left_hand", "face"] {
        assert!(ctx.landmark_csv_path(group).is_file(), "{} table missing", group);
    }

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(ctx.run_summary_path()).unwrap()).unwrap();
    assert_eq!(summary["run_id"], serde_json::json!(ctx.run_id));
}

/// **Test:** `skip_3d_triangulation` with no raw 3D artifact on disk
/// **Expected:** Earlier skipped stages load their artifacts; the run fails
/// in Triangulate3D with a missing-input error
#[tokio::test]
async fn test_skip_triangulation_without_artifact_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 3);

    let mut config = manual_sync_config(3);
    config.synchronization.skip_synchronization = true;
    config.detection_2d.skip_2d_image_tracking = true;
    config.triangulation.skip_3d_triangulation = true;
    let ctx = RunContext::new(&session, config, Some(calibration));

    let synchronized = ctx.synchronized_videos_folder();
    std::fs::create_dir_all(&synchronized).unwrap();
    for camera in 0..3 {
        std::fs::write(synchronized.join(format!("synchronized_cam_{}.mp4", camera)), b"").unwrap();
    }
    save_scene_keypoints(&ctx.raw_2d_path(), 3);

    let detector = Arc::new(scene_detector(3));
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        detector.clone(),
        Arc::new(IdentityFilter),
    );

    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(skipped_stages(&events), vec![Stage::Sync, Stage::Detect2D]);
    match events.last() {
        Some(PipelineEvent::RunFailed { stage, error, .. }) => {
            assert_eq!(*stage, Some(Stage::Triangulate3D));
            assert!(error.contains("3D skeleton"), "{}", error);
        }
        other => panic!("expected RunFailed, got {:?}", other),
    }
    assert!(!ctx.filtered_3d_path().exists());
    assert!(ctx.run_summary_path().is_file());
}

/// **Test:** Skipped synchronization with no synchronized videos
/// **Expected:** Fails in Sync before any detection
#[tokio::test]
async fn test_skip_sync_without_videos_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 2);
    let mut config = manual_sync_config(2);
    config.synchronization.skip_synchronization = true;
    let ctx = RunContext::new(&session, config, Some(calibration));

    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(2)),
        Arc::new(IdentityFilter),
    );
    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Failed);
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFailed { stage: Some(Stage::Sync), .. })
    ));
}

/// **Test:** Cancellation requested while 2D detection is running
/// **Expected:** Detection finishes and is persisted, then the run stops
/// before triangulation with Detect2D as the last completed stage
#[tokio::test]
async fn test_cancel_during_detection_stops_between_stages() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 3);
    let ctx = RunContext::new(&session, manual_sync_config(3), Some(calibration));

    let cancel_token = CancellationToken::new();
    let mut detector = scene_detector(3);
    detector.cancel_on_detect = Some(cancel_token.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(detector),
        Arc::new(IdentityFilter),
    );

    let (run, events) = run_pipeline(&orchestrator, &ctx, &cancel_token).await;

    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(started_stages(&events), vec![Stage::Sync, Stage::Detect2D]);
    match events.last() {
        Some(PipelineEvent::RunCancelled { last_stage, .. }) => {
            assert_eq!(*last_stage, Some(Stage::Detect2D));
        }
        other => panic!("expected RunCancelled, got {:?}", other),
    }
    assert!(ctx.raw_2d_path().is_file());
    assert!(!ctx.raw_3d_path().exists());
}

/// **Test:** Token cancelled before the run starts
/// **Expected:** No stage entered, RunCancelled without a last stage
#[tokio::test]
async fn test_cancel_before_start() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 2);
    let ctx = RunContext::new(&session, manual_sync_config(2), Some(calibration));
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(2)),
        Arc::new(IdentityFilter),
    );

    let cancel_token = CancellationToken::new();
    cancel_token.cancel();
    let (run, events) = run_pipeline(&orchestrator, &ctx, &cancel_token).await;

    assert_eq!(run.state, RunState::Cancelled);
    assert!(started_stages(&events).is_empty());
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunCancelled { last_stage: None, .. })
    ));
}

/// **Test:** One camera and no calibration
/// **Expected:** Planar fallback, raw z == 0; after normalization y == 0
#[tokio::test]
async fn test_single_camera_run() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _) = create_session(&temp_dir, 1);
    let ctx = RunContext::new(&session, manual_sync_config(1), None);
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(1)),
        Arc::new(IdentityFilter),
    );

    let (run, _) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;
    assert_eq!(run.state, RunState::Completed, "error: {:?}", run.error);

    let raw: Skeleton3D = npy::load(&ctx.raw_3d_path()).unwrap();
    assert_eq!(raw.shape(), vec![FRAMES, TOTAL_POINT_COUNT, 3]);
    let error: ReprojectionError = npy::load(&ctx.reprojection_error_path()).unwrap();
    assert!(error.data().iter().all(|e| *e == 0.0));
    for frame in 0..FRAMES {
        for point in 0..BODY_POINT_COUNT {
            assert_eq!(raw.get(frame, point)[2], 0.0);
        }
    }

    let filtered: Skeleton3D = npy::load(&ctx.filtered_3d_path()).unwrap();
    assert_eq!(filtered.get(0, 0)[1], 0.0);
}

/// **Test:** Reused 2D data shorter than the synchronized videos
/// **Expected:** One QA warning per video, run still completes
#[tokio::test]
async fn test_frame_count_disagreement_is_only_a_warning() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 3);
    let mut config = manual_sync_config(3);
    config.detection_2d.skip_2d_image_tracking = true;
    let ctx = RunContext::new(&session, config, Some(calibration));
    save_scene_keypoints(&ctx.raw_2d_path(), 3);

    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, 120)),
        Arc::new(scene_detector(3)),
        Arc::new(IdentityFilter),
    );
    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Completed, "error: {:?}", run.error);
    assert_eq!(run.qa_warnings.len(), 3);
    let qa_events = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::QaWarning { stage: Stage::Detect2D, .. }))
        .count();
    assert_eq!(qa_events, 3);
}

/// Filter used to check that a wrongly shaped result aborts the run
struct TruncatingFilter;

impl TemporalFilter for TruncatingFilter {
    fn name(&self) -> &str {
        "truncating"
    }

    fn filter(
        &self,
        skeleton: &Skeleton3D,
        _params: &mocap_pipeline::filter::FilterParameters,
    ) -> anyhow::Result<Skeleton3D> {
        Ok(Skeleton3D::new_nan(skeleton.frames() - 1, skeleton.points()))
    }
}

/// **Test:** Filter returns fewer frames than it was given
/// **Expected:** Run fails in Filter
#[tokio::test]
async fn test_filter_shape_change_fails_run() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _) = create_session(&temp_dir, 1);
    let ctx = RunContext::new(&session, manual_sync_config(1), None);
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(1)),
        Arc::new(TruncatingFilter),
    );

    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;
    assert_eq!(run.state, RunState::Failed);
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFailed { stage: Some(Stage::Filter), .. })
    ));
}

/// **Test:** Detector reporting left and right shoulder in swapped order
/// **Expected:** Run fails in ComputeCom with a schema mismatch before any
/// center of mass is written
#[tokio::test]
async fn test_detector_landmark_order_mismatch_fails_before_com() {
    let temp_dir = TempDir::new().unwrap();
    let (session, calibration) = create_session(&temp_dir, 3);
    let ctx = RunContext::new(&session, manual_sync_config(3), Some(calibration));

    let mut names: Vec<String> = BODY_LANDMARK_NAMES.iter().map(|n| n.to_string()).collect();
    let left = names.iter().position(|n| n == "left_shoulder").unwrap();
    let right = names.iter().position(|n| n == "right_shoulder").unwrap();
    names.swap(left, right);
    let mut detector = scene_detector(3);
    detector.body_landmark_names = Some(names);

    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(detector),
        Arc::new(IdentityFilter),
    );
    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Failed);
    let (stage, error) = failure(&events);
    assert_eq!(stage, Some(Stage::ComputeCom));
    assert!(error.contains("Schema mismatch"), "{}", error);
    assert!(error.contains("left_shoulder"), "{}", error);
    assert!(ctx.raw_3d_path().is_file());
    assert!(!ctx.segment_com_path().exists());
    assert!(!ctx.total_body_com_path().exists());
}

/// **Test:** Three cameras and no calibration file
/// **Expected:** Run fails in Triangulate3D with a missing-input error
/// instead of falling back to the single-camera path
#[tokio::test]
async fn test_multi_camera_without_calibration_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _) = create_session(&temp_dir, 3);
    let ctx = RunContext::new(&session, manual_sync_config(3), None);
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(3)),
        Arc::new(IdentityFilter),
    );

    let (run, events) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Failed);
    let (stage, error) = failure(&events);
    assert_eq!(stage, Some(Stage::Triangulate3D));
    assert!(error.starts_with("Missing input"), "{}", error);
    assert!(error.contains("camera calibration"), "{}", error);
    assert!(ctx.raw_2d_path().is_file());
    assert!(!ctx.raw_3d_path().exists());
}

/// Session whose saved 2D data has camera 2 misplacing body point 5 at
/// frame 10, with the reprojection outlier filter enabled
fn outlier_session(temp_dir: &TempDir, body_confidence_threshold: f64) -> RunContext {
    let (session, calibration) = create_session(temp_dir, 3);
    let mut config = manual_sync_config(3);
    config.detection_2d.skip_2d_image_tracking = true;
    config.detection_2d.body_confidence_threshold = body_confidence_threshold;
    config.triangulation.reprojection_outlier_filter.enabled = true;
    let ctx = RunContext::new(&session, config, Some(calibration));

    let mut keypoints = scene_keypoints(3);
    let [u, v] = keypoints.get(2, 10, 5);
    keypoints.set(2, 10, 5, [u + 250.0, v - 180.0]);
    npy::save(&ctx.raw_2d_path(), &keypoints).unwrap();
    ctx
}

/// **Test:** Outlier filter enabled with the default 2D confidence threshold
/// **Expected:** The misplaced point is removed after the raw 3D data is
/// saved, the double-filtering warning is logged, and the run completes
#[tokio::test]
async fn test_outlier_filter_removes_misplaced_point() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = outlier_session(&temp_dir, 0.5);
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(3)),
        Arc::new(IdentityFilter),
    );

    let (logs, _guard) = capture_test_logs();
    let (run, _) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Completed, "error: {:?}", run.error);

    let raw: Skeleton3D = npy::load(&ctx.raw_3d_path()).unwrap();
    assert!(raw.get(10, 5).iter().all(|v| v.is_finite()));
    let error: ReprojectionError = npy::load(&ctx.reprojection_error_path()).unwrap();
    assert!(error.get(10, 5) > 20.0, "error {}", error.get(10, 5));

    let filtered: Skeleton3D = npy::load(&ctx.filtered_3d_path()).unwrap();
    assert!(filtered.get(10, 5).iter().all(|v| v.is_nan()));

    assert_eq!(logs.matching_at(tracing::Level::WARN, "points may be removed twice").len(), 1);
    logs.assert_contains("Removed high reprojection error points");
}

/// **Test:** Outlier filter enabled with 2D confidence thresholding off
/// **Expected:** Point still removed, no double-filtering warning
#[tokio::test]
async fn test_outlier_filter_without_confidence_threshold_is_quiet() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = outlier_session(&temp_dir, 0.0);
    let orchestrator = Orchestrator::new(
        Arc::new(FakeVideoIo::new(30.0, FRAMES as u64)),
        Arc::new(scene_detector(3)),
        Arc::new(IdentityFilter),
    );

    let (logs, _guard) = capture_test_logs();
    let (run, _) = run_pipeline(&orchestrator, &ctx, &CancellationToken::new()).await;

    assert_eq!(run.state, RunState::Completed, "error: {:?}", run.error);
    let filtered: Skeleton3D = npy::load(&ctx.filtered_3d_path()).unwrap();
    assert!(filtered.get(10, 5).iter().all(|v| v.is_nan()));
    logs.assert_contains("Removed high reprojection error points");
    logs.assert_no_match("points may be removed twice");
}
