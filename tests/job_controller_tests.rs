//! Integration tests for JobController
//!
//! These tests drive full jobs against a gated in-memory pipeline and verify:
//! - Start is rejected while a job is active
//! - Pipeline errors become exactly one Failed notification
//! - Suspend writes a resumable session snapshot
//! - Kill aborts without a snapshot
//! - Kill forces a suspended pipeline down and keeps its snapshot
//! - A resumed job adopts the existing workspace

use camino::Utf8PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use upscale_driver::models::{DeveloperSettings, SessionMarkers, UserSettings};
use upscale_driver::services::{
    ConfigBuilder, Pipeline, PipelineError, SNAPSHOT_FILE_NAME, UserInputs, WorkspaceManager,
    snapshot,
};
use upscale_driver::{
    Configuration, InvalidStateError, JobController, JobError, JobOutcome, JobPhase, StateChange,
};

/// Pipeline whose `join` blocks until the test releases it, a stop is
/// requested, or it is killed.
#[derive(Default)]
struct GatedPipeline {
    release: Mutex<Option<Result<(), String>>>,
    wake: Condvar,
    starts: AtomicUsize,
    stop_requested: AtomicBool,
    ignores_stop: AtomicBool,
    killed: AtomicBool,
}

impl GatedPipeline {
    fn finish(&self, result: Result<(), String>) {
        *self.release.lock().unwrap() = Some(result);
        self.wake.notify_all();
    }
}

impl Pipeline for GatedPipeline {
    fn start(&self, _configuration: &Configuration) -> Result<(), PipelineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn join(&self) -> Result<(), PipelineError> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut release = self.release.lock().unwrap();
        loop {
            if self.killed.load(Ordering::SeqCst) {
                return Err(PipelineError::Killed);
            }
            if self.stop_requested.load(Ordering::SeqCst) && !self.ignores_stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(result) = release.take() {
                return result.map_err(PipelineError::Failed);
            }
            if Instant::now() > deadline {
                return Err(PipelineError::Failed("test pipeline never released".into()));
            }
            release = self
                .wake
                .wait_timeout(release, Duration::from_millis(20))
                .unwrap()
                .0;
        }
    }

    fn request_stop(&self) -> Result<(), PipelineError> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_all();
        Ok(())
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    fn resume_markers(&self) -> Option<SessionMarkers> {
        let mut markers = SessionMarkers {
            frames_processed: 120,
            ..SessionMarkers::default()
        };
        markers
            .markers
            .insert("last_block".to_string(), "6".to_string());
        Some(markers)
    }
}

struct Harness {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
    pipeline: Arc<GatedPipeline>,
    controller: JobController,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let pipeline = Arc::new(GatedPipeline::default());

        let shared = pipeline.clone();
        let factory = move |_: &Configuration| -> Result<Arc<dyn Pipeline>, PipelineError> {
            Ok(shared.clone())
        };
        let controller = JobController::new(
            WorkspaceManager::default(),
            Arc::new(factory),
            tokio::runtime::Handle::current(),
        );

        Self {
            _temp_dir: temp_dir,
            root,
            pipeline,
            controller,
        }
    }

    fn configuration(&self) -> Configuration {
        Configuration {
            user_settings: UserSettings {
                input_file: self.root.join("clip.mkv"),
                output_file: self.root.join("out/clip_upscaled.mp4"),
                ..UserSettings::default()
            },
            developer_settings: DeveloperSettings {
                workspace: self.root.join("workspace"),
                extra: Default::default(),
            },
            session: None,
            extra: Default::default(),
        }
    }

    async fn wait_for(&self, phase: JobPhase) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.controller.phase() != phase {
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {}, job is {}",
                phase,
                self.controller.phase()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn terminal_events(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if let StateChange::PhaseChanged { to, .. } = event {
            if to.is_terminal() {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_workspace_removed_before_pipeline_starts() {
    let harness = Harness::new();
    let workspace = harness.root.join("workspace");
    std::fs::create_dir_all(workspace.join("frames")).unwrap();
    std::fs::write(workspace.join("frames/000001.png"), b"stale").unwrap();

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    assert!(!workspace.exists());
    assert_eq!(harness.controller.metrics().workspaces_cleaned.load(Ordering::Relaxed), 1);

    harness.pipeline.finish(Ok(()));
    assert_eq!(harness.controller.join().await.unwrap(), JobOutcome::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_while_running_is_rejected() {
    let harness = Harness::new();

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    let err = harness.controller.start(harness.configuration()).unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidState(InvalidStateError {
            operation: "start",
            phase: JobPhase::Running
        })
    ));
    assert_eq!(harness.pipeline.starts.load(Ordering::SeqCst), 1);

    harness.pipeline.finish(Ok(()));
    assert_eq!(harness.controller.join().await.unwrap(), JobOutcome::Completed);
    assert_eq!(harness.pipeline.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pipeline_error_notifies_once_for_all_observers() {
    let harness = Arc::new(Harness::new());
    let mut events = harness.controller.subscribe();

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    let observers: Vec<_> = (0..2)
        .map(|_| {
            let harness = harness.clone();
            tokio::spawn(async move { harness.controller.join().await.unwrap() })
        })
        .collect();

    harness.pipeline.finish(Err("encoder crashed".to_string()));

    let mut outcomes = Vec::new();
    for observer in observers {
        outcomes.push(observer.await.unwrap());
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert!(matches!(
        &outcomes[0],
        JobOutcome::Failed { reason } if reason.contains("encoder crashed")
    ));
    assert_eq!(harness.controller.phase(), JobPhase::Failed);
    assert_eq!(harness.controller.metrics().notifications(), 1);
    assert_eq!(terminal_events(&mut events), 1);

    let status = harness.controller.status();
    assert!(status.last_error.unwrap().contains("encoder crashed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_suspend_writes_snapshot_and_resume_adopts_workspace() {
    let harness = Harness::new();
    let configuration = harness.configuration();

    harness.controller.start(configuration.clone()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    // Frames produced so far must survive into the resumed job
    let workspace = harness.root.join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("000001.png"), b"frame").unwrap();

    let path = harness.controller.suspend().unwrap();
    assert_eq!(path, harness.root.join("out").join(SNAPSHOT_FILE_NAME));
    assert_eq!(harness.controller.phase(), JobPhase::Suspended);
    assert!(harness.pipeline.stop_requested.load(Ordering::SeqCst));

    let saved = snapshot::load_snapshot(&path).unwrap();
    assert_eq!(saved.user_settings.input_file, configuration.user_settings.input_file);
    assert_eq!(saved.user_settings.output_file, configuration.user_settings.output_file);
    let session = saved.session.clone().unwrap();
    assert!(session.resume_session);
    assert_eq!(session.frames_processed, 120);
    assert_eq!(session.markers.get("last_block").map(String::as_str), Some("6"));

    assert_eq!(
        harness.controller.join().await.unwrap(),
        JobOutcome::Suspended {
            snapshot: path.clone()
        }
    );
    assert_eq!(harness.controller.metrics().notifications(), 1);

    // Resume from the snapshot
    harness.controller.reset().await.unwrap();
    harness.pipeline.stop_requested.store(false, Ordering::SeqCst);

    let resumed = ConfigBuilder::new()
        .build(
            &harness.configuration(),
            &UserInputs {
                input_file: path.clone(),
                ..UserInputs::default()
            },
        )
        .unwrap();
    assert_eq!(resumed, saved);

    harness.controller.start(resumed).unwrap();
    harness.wait_for(JobPhase::Running).await;
    assert!(workspace.join("000001.png").exists());
    assert!(harness.controller.status().resumed);

    harness.pipeline.finish(Ok(()));
    assert_eq!(harness.controller.join().await.unwrap(), JobOutcome::Completed);
    assert!(!path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_aborts_without_snapshot() {
    let harness = Harness::new();

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    harness.controller.kill().unwrap();
    assert_eq!(harness.controller.phase(), JobPhase::Failed);
    assert!(harness.pipeline.killed.load(Ordering::SeqCst));

    let outcome = harness.controller.join().await.unwrap();
    assert!(matches!(outcome, JobOutcome::Failed { ref reason } if reason.contains("aborted")));
    assert!(!harness.root.join("out").join(SNAPSHOT_FILE_NAME).exists());

    assert!(harness.controller.kill().is_err());
    assert!(harness.controller.suspend().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_forces_suspended_pipeline_that_ignores_stop() {
    let harness = Arc::new(Harness::new());
    harness.pipeline.ignores_stop.store(true, Ordering::SeqCst);

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;

    let path = harness.controller.suspend().unwrap();
    assert!(harness.pipeline.stop_requested.load(Ordering::SeqCst));

    let observer = tokio::spawn({
        let harness = harness.clone();
        async move { harness.controller.join().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!observer.is_finished());

    harness.controller.kill().unwrap();
    assert!(harness.pipeline.killed.load(Ordering::SeqCst));

    let outcome = tokio::time::timeout(Duration::from_secs(5), observer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, JobOutcome::Suspended { snapshot: path.clone() });
    assert_eq!(harness.controller.phase(), JobPhase::Suspended);
    assert!(path.exists());
    assert_eq!(harness.controller.metrics().notifications(), 1);

    // Nothing left to force once the outcome is in
    assert!(harness.controller.kill().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_suspend_after_completion_is_rejected() {
    let harness = Harness::new();

    harness.controller.start(harness.configuration()).unwrap();
    harness.wait_for(JobPhase::Running).await;
    harness.pipeline.finish(Ok(()));
    harness.controller.join().await.unwrap();

    let err = harness.controller.suspend().unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidState(InvalidStateError {
            phase: JobPhase::Completed,
            ..
        })
    ));

    // A finished job has to be reset before the next one
    assert!(harness.controller.start(harness.configuration()).is_err());
    harness.controller.reset().await.unwrap();
    assert_eq!(harness.controller.phase(), JobPhase::Idle);
}
