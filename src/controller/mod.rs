// Job Controller - owns the lifecycle of one upscaling job
//
// This module contains the JobController which coordinates between:
// - WorkspaceManager (stale workspace teardown)
// - Pipeline (the external upscaling engine, run on a background worker)
// - StateManager (observable job status)
// - Completion (one-shot terminal notification)
//
// It handles:
// - start / suspend / kill / join / reset
// - Writing the session snapshot on suspend
// - Converting every worker-side error into the Failed state

pub mod completion;

pub use completion::{Completion, CompletionSender, completion_channel};

use crate::metrics::Metrics;
use crate::models::{Configuration, JobOutcome, JobPhase, JobStatus};
use crate::services::config_builder::{ConfigBuilder, ValidationError};
use crate::services::pipeline::{Pipeline, PipelineError, PipelineFactory};
use crate::services::snapshot::{self, SnapshotError};
use crate::services::workspace::WorkspaceManager;
use crate::state::{StateChange, StateManager};
use camino::Utf8PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;

/// An operation was requested in a phase that does not allow it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot {operation} while the job is {phase}")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub phase: JobPhase,
}

/// Errors returned synchronously by the controller
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Handle of the job currently owned by the controller
struct ActiveJob {
    configuration: Arc<Configuration>,
    pipeline: Arc<dyn Pipeline>,
    completion: Arc<Completion>,
}

/// Owns one job at a time: start, suspend, kill, join, report.
///
/// The controller is an ordinary value owned by the embedding application;
/// nothing about it is global. [`start`](Self::start) returns as soon as the
/// job is accepted, and the workspace teardown and the pipeline run happen on
/// the tokio runtime passed at construction. The pipeline's blocking `join`
/// runs on a blocking worker thread, so neither the caller nor the runtime's
/// async workers are held up by it.
///
/// Exactly one [`JobOutcome`] is delivered per job; every [`join`](Self::join)
/// caller receives the same one.
///
/// # Example
/// ```ignore
/// let controller = JobController::new(
///     WorkspaceManager::new(settings.workspace),
///     Arc::new(ProcessPipelineFactory { program, args }),
///     runtime.handle().clone(),
/// );
///
/// controller.start(configuration)?;
/// // ... later, from a Ctrl-C handler or a button:
/// let snapshot = controller.suspend()?;
///
/// let outcome = controller.join().await?;
/// ```
pub struct JobController {
    workspace: Arc<WorkspaceManager>,
    factory: Arc<dyn PipelineFactory>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
    runtime: tokio::runtime::Handle,
    job: Mutex<Option<ActiveJob>>,
}

impl JobController {
    pub fn new(
        workspace: WorkspaceManager,
        factory: Arc<dyn PipelineFactory>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            workspace: Arc::new(workspace),
            factory,
            state: Arc::new(StateManager::new()),
            metrics: Arc::new(Metrics::new()),
            runtime,
            job: Mutex::new(None),
        }
    }

    /// Share metrics with the rest of the application
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase()
    }

    pub fn status(&self) -> JobStatus {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Configuration of the current job, if any
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.active_job().as_ref().map(|job| job.configuration.clone())
    }

    /// Accept a job and launch it in the background.
    ///
    /// Only valid while idle. The returned [`Completion`] resolves with the
    /// job's outcome; [`join`](Self::join) waits on the same one.
    pub fn start(&self, configuration: Configuration) -> Result<Arc<Completion>, JobError> {
        let mut job = self.active_job();

        let phase = self.state.phase();
        if phase != JobPhase::Idle {
            tracing::error!("Refusing to start a job while another one is {}", phase);
            return Err(InvalidStateError {
                operation: "start",
                phase,
            }
            .into());
        }

        ConfigBuilder::validate(&configuration.user_settings)?;

        let pipeline = self.factory.create(&configuration)?;
        let configuration = Arc::new(configuration);

        self.state
            .begin_job(&configuration)
            .map_err(|phase| InvalidStateError {
                operation: "start",
                phase,
            })?;
        self.metrics.record_job_started();

        tracing::info!(
            "Starting job: {} -> {} (workspace {}, resumed: {})",
            configuration.user_settings.input_file,
            configuration.user_settings.output_file,
            configuration.workspace(),
            configuration.is_resume()
        );

        let (sender, completion) = completion_channel();
        let completion = Arc::new(completion);

        let worker = JobWorker {
            configuration: configuration.clone(),
            pipeline: pipeline.clone(),
            workspace: self.workspace.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        };
        self.runtime.spawn(worker.run(sender));

        *job = Some(ActiveJob {
            configuration,
            pipeline,
            completion: completion.clone(),
        });

        Ok(completion)
    }

    /// Cooperatively stop the running job and persist a session snapshot.
    ///
    /// Returns the snapshot path without waiting for the pipeline to wind down.
    pub fn suspend(&self) -> Result<Utf8PathBuf, JobError> {
        let job = self.active_job();

        let phase = self.state.phase();
        let active = match job.as_ref() {
            Some(active) if phase == JobPhase::Running => active,
            _ => {
                return Err(InvalidStateError {
                    operation: "suspend",
                    phase,
                }
                .into());
            }
        };

        // Claim the terminal phase first so a run that ends meanwhile reports Suspended
        self.state
            .transition(&[JobPhase::Running], JobPhase::Suspended, |status| {
                status.current_operation = "Suspending".to_string();
            })
            .map_err(|phase| InvalidStateError {
                operation: "suspend",
                phase,
            })?;

        tracing::info!("Suspending job");

        let mut markers = active.pipeline.resume_markers().unwrap_or_default();
        markers.resume_session = true;

        let mut suspended = (*active.configuration).clone();
        suspended.session = Some(markers);

        let path = snapshot::snapshot_path_for(&active.configuration);
        if let Err(e) = snapshot::write_snapshot(&suspended, &path) {
            tracing::error!("Suspend failed, could not write session snapshot: {}", e);
            let reason = format!("suspend failed: {}", e);
            let _ = self
                .state
                .transition(&[JobPhase::Suspended], JobPhase::Failed, |status| {
                    status.current_operation.clear();
                    status.last_error = Some(reason);
                });
            active.pipeline.kill();
            return Err(e.into());
        }

        self.state.update(|status| {
            status.current_operation.clear();
            status.snapshot_path = Some(path.clone());
        });

        if let Err(e) = active.pipeline.request_stop() {
            tracing::warn!("Pipeline did not accept the stop request ({}), forcing it", e);
            active.pipeline.kill();
        }

        tracing::info!("Job suspended, session saved to {}", path);
        Ok(path)
    }

    /// Abandon the current job without writing a snapshot.
    ///
    /// A suspended job whose pipeline is still winding down is forced to stop,
    /// but it stays `Suspended` and its snapshot is kept.
    pub fn kill(&self) -> Result<(), JobError> {
        let job = self.active_job();

        let active = job.as_ref().ok_or(InvalidStateError {
            operation: "kill",
            phase: self.state.phase(),
        })?;

        if self.state.phase() == JobPhase::Suspended && active.completion.outcome().is_none() {
            tracing::warn!("Forcing the suspended pipeline to stop");
            active.pipeline.kill();
            return Ok(());
        }

        self.state
            .finish(&JobOutcome::failed("aborted by user"))
            .map_err(|phase| InvalidStateError {
                operation: "kill",
                phase,
            })?;

        tracing::warn!("Killing job");
        active.pipeline.kill();
        self.metrics.record_job_killed();
        Ok(())
    }

    /// Wait for the current job's outcome.
    ///
    /// Safe to call from several observers; all receive the same outcome.
    pub async fn join(&self) -> Result<JobOutcome, InvalidStateError> {
        let completion = self.completion("join")?;
        Ok(completion.wait().await)
    }

    /// Discard a finished job and return to idle.
    ///
    /// Waits for the worker to deliver its outcome first, so the next job never
    /// shares the workspace with a pipeline that is still winding down.
    pub async fn reset(&self) -> Result<JobOutcome, InvalidStateError> {
        let phase = self.state.phase();
        if !phase.is_terminal() {
            return Err(InvalidStateError {
                operation: "reset",
                phase,
            });
        }

        let outcome = self.completion("reset")?.wait().await;

        let mut job = self.active_job();
        self.state.reset().map_err(|phase| InvalidStateError {
            operation: "reset",
            phase,
        })?;
        *job = None;

        tracing::debug!("Controller reset to idle");
        Ok(outcome)
    }

    fn completion(&self, operation: &'static str) -> Result<Arc<Completion>, InvalidStateError> {
        self.active_job()
            .as_ref()
            .map(|job| job.completion.clone())
            .ok_or(InvalidStateError {
                operation,
                phase: self.state.phase(),
            })
    }

    fn active_job(&self) -> std::sync::MutexGuard<'_, Option<ActiveJob>> {
        // The slot is only written after every fallible step, so a panic
        // while it was held never leaves a half-built job behind
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything the background worker needs, moved onto the runtime
struct JobWorker {
    configuration: Arc<Configuration>,
    pipeline: Arc<dyn Pipeline>,
    workspace: Arc<WorkspaceManager>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
}

impl JobWorker {
    async fn run(self, sender: CompletionSender) {
        let started = Instant::now();

        let outcome = self.execute().await;
        let outcome = self.settle(outcome);

        if outcome.is_success() {
            let path = snapshot::snapshot_path_for(&self.configuration);
            if let Err(e) = snapshot::remove_snapshot(&path) {
                tracing::warn!("Could not remove finished session snapshot: {}", e);
            }
        }

        match &outcome {
            JobOutcome::Failed { reason } => tracing::error!("Job failed: {}", reason),
            other => tracing::info!("Job finished: {}", other),
        }

        self.metrics.record_outcome(&outcome, started.elapsed());
        if !sender.send(outcome) {
            tracing::debug!("Job outcome delivered with no observers left");
        }
    }

    async fn execute(&self) -> JobOutcome {
        let workspace = self.configuration.workspace();

        let prepared = if self.configuration.is_resume() {
            self.workspace.adopt(workspace).await
        } else {
            self.workspace.prepare(workspace).await
        };

        match prepared {
            Ok(report) => {
                if report.removed {
                    self.metrics.record_workspace_cleaned();
                }
                for warning in &report.warnings {
                    self.metrics.record_workspace_warning();
                    self.state.add_workspace_warning(warning.to_string());
                }
            }
            Err(e) => {
                return JobOutcome::failed(format!("workspace preparation failed: {}", e));
            }
        }

        if self.state.phase() != JobPhase::Starting {
            return JobOutcome::failed("aborted before the pipeline started");
        }

        self.state.set_operation("Starting pipeline");
        let pipeline = self.pipeline.clone();
        let configuration = self.configuration.clone();
        match tokio::task::spawn_blocking(move || pipeline.start(&configuration)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return JobOutcome::failed(format!("pipeline failed to start: {}", e)),
            Err(e) => return JobOutcome::failed(format!("pipeline panicked while starting: {}", e)),
        }

        if self.state.mark_running().is_err() {
            // Killed while the pipeline was starting
            self.pipeline.kill();
        }

        let pipeline = self.pipeline.clone();
        match tokio::task::spawn_blocking(move || pipeline.join()).await {
            Ok(Ok(())) => JobOutcome::Completed,
            Ok(Err(e)) => JobOutcome::failed(e.to_string()),
            Err(e) => JobOutcome::failed(format!("pipeline panicked: {}", e)),
        }
    }

    /// Record `outcome` as the terminal phase, unless suspend or kill already did.
    fn settle(&self, outcome: JobOutcome) -> JobOutcome {
        match self.state.finish(&outcome) {
            Ok(_) => outcome,
            Err(phase) => {
                let status = self.state.snapshot();
                match phase {
                    JobPhase::Suspended => JobOutcome::Suspended {
                        snapshot: snapshot::snapshot_path_for(&self.configuration),
                    },
                    JobPhase::Failed => JobOutcome::Failed {
                        reason: status.last_error.unwrap_or_else(|| "job failed".to_string()),
                    },
                    JobPhase::Completed => JobOutcome::Completed,
                    JobPhase::Idle | JobPhase::Starting | JobPhase::Running => outcome,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeveloperSettings, UserSettings};
    use crate::services::pipeline::MockPipeline;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn configuration(temp_dir: &TempDir) -> Configuration {
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        Configuration {
            user_settings: UserSettings {
                input_file: root.join("in.mkv"),
                output_file: root.join("out.mp4"),
                ..UserSettings::default()
            },
            developer_settings: DeveloperSettings {
                workspace: root.join("workspace"),
                extra: Default::default(),
            },
            session: None,
            extra: Default::default(),
        }
    }

    fn controller_with(mock: MockPipeline) -> JobController {
        let pipeline: Arc<dyn Pipeline> = Arc::new(mock);
        let factory = move |_: &Configuration| -> Result<Arc<dyn Pipeline>, PipelineError> {
            Ok(pipeline.clone())
        };
        JobController::new(
            WorkspaceManager::default(),
            Arc::new(factory),
            tokio::runtime::Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_successful_job_completes_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut mock = MockPipeline::new();
        mock.expect_start().times(1).returning(|_| Ok(()));
        mock.expect_join().times(1).returning(|| Ok(()));

        let controller = controller_with(mock);
        controller.start(configuration(&temp_dir)).unwrap();

        assert_eq!(controller.join().await.unwrap(), JobOutcome::Completed);
        assert_eq!(controller.join().await.unwrap(), JobOutcome::Completed);
        assert_eq!(controller.phase(), JobPhase::Completed);
        assert_eq!(controller.metrics().notifications(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_error_becomes_failed() {
        let temp_dir = TempDir::new().unwrap();
        let mut mock = MockPipeline::new();
        mock.expect_start().returning(|_| Ok(()));
        mock.expect_join()
            .returning(|| Err(PipelineError::Failed("ffmpeg crashed".into())));

        let controller = controller_with(mock);
        controller.start(configuration(&temp_dir)).unwrap();

        let outcome = controller.join().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { ref reason } if reason.contains("ffmpeg crashed")));
        assert_eq!(controller.phase(), JobPhase::Failed);
        assert_eq!(controller.metrics().notifications(), 1);
    }

    struct PanickingPipeline;

    impl Pipeline for PanickingPipeline {
        fn start(&self, _configuration: &Configuration) -> Result<(), PipelineError> {
            Ok(())
        }

        fn join(&self) -> Result<(), PipelineError> {
            panic!("upscaler exploded")
        }

        fn request_stop(&self) -> Result<(), PipelineError> {
            Ok(())
        }

        fn kill(&self) {}

        fn resume_markers(&self) -> Option<crate::models::SessionMarkers> {
            None
        }
    }

    #[tokio::test]
    async fn test_pipeline_panic_is_contained() {
        let temp_dir = TempDir::new().unwrap();
        let factory = |_: &Configuration| -> Result<Arc<dyn Pipeline>, PipelineError> {
            Ok(Arc::new(PanickingPipeline))
        };
        let controller = JobController::new(
            WorkspaceManager::default(),
            Arc::new(factory),
            tokio::runtime::Handle::current(),
        );
        controller.start(configuration(&temp_dir)).unwrap();

        let outcome = controller.join().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { ref reason } if reason.contains("panicked")));
    }

    #[tokio::test]
    async fn test_workspace_failure_never_starts_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let config = configuration(&temp_dir);
        // A file where the workspace directory should be cannot be removed recursively
        std::fs::write(config.workspace(), b"not a directory").unwrap();

        let mut mock = MockPipeline::new();
        mock.expect_start().never();
        mock.expect_join().never();

        let controller = controller_with(mock);
        controller.start(config).unwrap();

        let outcome = controller.join().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { ref reason } if reason.contains("workspace")));
        assert_eq!(controller.phase(), JobPhase::Failed);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_configuration() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = configuration(&temp_dir);
        config.user_settings.output_file = Utf8PathBuf::new();

        let controller = controller_with(MockPipeline::new());
        let err = controller.start(config).unwrap_err();

        assert!(matches!(err, JobError::Validation(ValidationError::MissingOutputFile)));
        assert_eq!(controller.phase(), JobPhase::Idle);
    }

    #[tokio::test]
    async fn test_factory_is_not_called_when_busy() {
        let temp_dir = TempDir::new().unwrap();
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = created.clone();

        let factory = move |_: &Configuration| -> Result<Arc<dyn Pipeline>, PipelineError> {
            created_clone.fetch_add(1, Ordering::SeqCst);
            let mut mock = MockPipeline::new();
            mock.expect_start().returning(|_| Ok(()));
            mock.expect_join().returning(|| Ok(()));
            Ok(Arc::new(mock))
        };
        let controller = JobController::new(
            WorkspaceManager::default(),
            Arc::new(factory),
            tokio::runtime::Handle::current(),
        );

        controller.start(configuration(&temp_dir)).unwrap();
        let err = controller.start(configuration(&temp_dir)).unwrap_err();
        assert!(matches!(err, JobError::InvalidState(InvalidStateError { operation: "start", .. })));
        assert_eq!(created.load(Ordering::SeqCst), 1);

        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_and_suspend_without_job() {
        let controller = controller_with(MockPipeline::new());

        let err = controller.join().await.unwrap_err();
        assert_eq!(err.phase, JobPhase::Idle);
        assert!(matches!(
            controller.suspend(),
            Err(JobError::InvalidState(InvalidStateError { operation: "suspend", .. }))
        ));
        assert!(controller.kill().is_err());
        assert!(controller.reset().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_allows_a_new_job() {
        let temp_dir = TempDir::new().unwrap();
        let mut mock = MockPipeline::new();
        mock.expect_start().times(2).returning(|_| Ok(()));
        mock.expect_join().times(2).returning(|| Ok(()));

        let controller = controller_with(mock);
        controller.start(configuration(&temp_dir)).unwrap();
        controller.join().await.unwrap();

        assert_eq!(controller.reset().await.unwrap(), JobOutcome::Completed);
        assert_eq!(controller.phase(), JobPhase::Idle);
        assert!(controller.configuration().is_none());

        controller.start(configuration(&temp_dir)).unwrap();
        assert_eq!(controller.join().await.unwrap(), JobOutcome::Completed);
        assert_eq!(controller.metrics().notifications(), 2);
    }

    #[tokio::test]
    async fn test_panicking_factory_leaves_controller_usable() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let factory = move |_: &Configuration| -> Result<Arc<dyn Pipeline>, PipelineError> {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("factory exploded");
            }
            let mut mock = MockPipeline::new();
            mock.expect_start().returning(|_| Ok(()));
            mock.expect_join().returning(|| Ok(()));
            Ok(Arc::new(mock))
        };
        let controller = JobController::new(
            WorkspaceManager::default(),
            Arc::new(factory),
            tokio::runtime::Handle::current(),
        );

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            controller.start(configuration(&temp_dir))
        }));
        assert!(panicked.is_err());
        assert_eq!(controller.phase(), JobPhase::Idle);
        assert!(controller.configuration().is_none());

        controller.start(configuration(&temp_dir)).unwrap();
        assert_eq!(controller.join().await.unwrap(), JobOutcome::Completed);
    }
}
