use crate::models::{Configuration, SessionMarkers};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// File the [`ProcessPipeline`] writes the configuration to, inside the workspace.
pub const PIPELINE_CONFIG_FILE_NAME: &str = "session_config.yaml";

/// Created inside the workspace to ask the upscaler to stop after flushing its state.
pub const SUSPEND_SIGNAL_FILE_NAME: &str = "suspend.signal";

/// Optional progress markers the upscaler keeps up to date inside the workspace.
pub const PROGRESS_FILE_NAME: &str = "progress.yaml";

/// Errors reported by a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline failed to start: {0}")]
    Start(String),

    #[error("Pipeline failed: {0}")]
    Failed(String),

    #[error("Pipeline exited with code {0}")]
    ExitCode(i32),

    #[error("Pipeline was killed")]
    Killed,

    #[error("Pipeline was never started")]
    NotStarted,

    #[error("Pipeline I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The frame extraction / upscaling / remux engine.
///
/// The driver only needs this surface. `join` blocks the calling thread, so
/// the controller always calls it from a blocking worker. Implementations must
/// make `join` return promptly after `kill`.
#[cfg_attr(test, mockall::automock)]
pub trait Pipeline: Send + Sync {
    /// Begin processing `configuration`. Must not block until completion.
    fn start(&self, configuration: &Configuration) -> Result<(), PipelineError>;

    /// Block until the run ends.
    fn join(&self) -> Result<(), PipelineError>;

    /// Ask the run to stop after flushing resumable state.
    fn request_stop(&self) -> Result<(), PipelineError>;

    /// Best-effort forced stop.
    fn kill(&self);

    /// Progress markers to store in a session snapshot, if the pipeline has any.
    fn resume_markers(&self) -> Option<SessionMarkers>;
}

/// Creates one pipeline per job.
pub trait PipelineFactory: Send + Sync {
    fn create(&self, configuration: &Configuration) -> Result<Arc<dyn Pipeline>, PipelineError>;
}

impl<F> PipelineFactory for F
where
    F: Fn(&Configuration) -> Result<Arc<dyn Pipeline>, PipelineError> + Send + Sync,
{
    fn create(&self, configuration: &Configuration) -> Result<Arc<dyn Pipeline>, PipelineError> {
        self(configuration)
    }
}

/// Runs an external upscaler executable as the pipeline.
///
/// The protocol is file based and lives in the workspace:
/// - the configuration is written to [`PIPELINE_CONFIG_FILE_NAME`] and its path is
///   passed as the last argument
/// - a cooperative stop creates [`SUSPEND_SIGNAL_FILE_NAME`]
/// - the upscaler may report progress in [`PROGRESS_FILE_NAME`] (YAML [`SessionMarkers`])
///
/// The child is supervised by a task on the current tokio runtime, so `start`
/// must be called from within one (a blocking worker thread is fine).
pub struct ProcessPipeline {
    program: Utf8PathBuf,
    args: Vec<String>,
    process: Mutex<ProcessState>,
}

#[derive(Default)]
struct ProcessState {
    workspace: Option<Utf8PathBuf>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: Option<oneshot::Receiver<ProcessExit>>,
    killed: bool,
}

#[derive(Debug)]
enum ProcessExit {
    Exited(io::Result<ExitStatus>),
    Killed,
}

impl ProcessPipeline {
    pub fn new(program: impl Into<Utf8PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            process: Mutex::new(ProcessState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProcessState> {
        // A panic while holding the lock leaves the channels intact
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn workspace_file(&self, name: &str) -> Option<Utf8PathBuf> {
        self.state().workspace.as_ref().map(|ws| ws.join(name))
    }
}

/// Wait for the child to exit, or kill it when asked to.
async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    let exit = tokio::select! {
        status = child.wait() => ProcessExit::Exited(status),
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill pipeline process: {}", e);
            }
            ProcessExit::Killed
        }
    };

    if exit_tx.send(exit).is_err() {
        tracing::debug!("Pipeline exited with nobody joining it");
    }
}

impl Pipeline for ProcessPipeline {
    fn start(&self, configuration: &Configuration) -> Result<(), PipelineError> {
        let runtime = Handle::try_current()
            .map_err(|e| PipelineError::Start(format!("no async runtime to supervise the upscaler: {}", e)))?;

        let workspace = configuration.workspace();
        fs::create_dir_all(workspace)?;

        let config_path = workspace.join(PIPELINE_CONFIG_FILE_NAME);
        let yaml = serde_yaml_ng::to_string(configuration)
            .map_err(|e| PipelineError::Start(format!("cannot serialize configuration: {}", e)))?;
        fs::write(&config_path, yaml)?;

        // Leftover signal from a suspended run must not stop the resumed one
        let signal = workspace.join(SUSPEND_SIGNAL_FILE_NAME);
        if signal.exists() {
            fs::remove_file(&signal)?;
        }

        tracing::info!("Launching pipeline: {} {:?} {}", self.program, self.args, config_path);

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(config_path.as_str())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Start(format!("cannot launch {}: {}", self.program, e)))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        runtime.spawn(supervise(child, kill_rx, exit_tx));

        let mut state = self.state();
        state.workspace = Some(workspace.to_path_buf());
        state.kill_tx = Some(kill_tx);
        state.exit_rx = Some(exit_rx);
        state.killed = false;
        Ok(())
    }

    fn join(&self) -> Result<(), PipelineError> {
        let exit_rx = self.state().exit_rx.take().ok_or(PipelineError::NotStarted)?;

        let exit = exit_rx
            .blocking_recv()
            .map_err(|_| PipelineError::Failed("pipeline supervisor stopped".to_string()))?;

        let status = match exit {
            ProcessExit::Killed => return Err(PipelineError::Killed),
            ProcessExit::Exited(status) => status?,
        };

        tracing::info!("Pipeline process exited with {}", status);
        if self.state().killed {
            return Err(PipelineError::Killed);
        }
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(PipelineError::ExitCode(code)),
            None => Err(PipelineError::Failed(format!("terminated by {}", status))),
        }
    }

    fn request_stop(&self) -> Result<(), PipelineError> {
        let signal = self
            .workspace_file(SUSPEND_SIGNAL_FILE_NAME)
            .ok_or(PipelineError::NotStarted)?;

        fs::write(&signal, b"suspend")?;
        tracing::info!("Requested pipeline stop via {}", signal);
        Ok(())
    }

    fn kill(&self) {
        let mut state = self.state();
        state.killed = true;
        if let Some(kill_tx) = state.kill_tx.take() {
            // The supervisor is gone once the process has exited
            let _ = kill_tx.send(());
        }
    }

    fn resume_markers(&self) -> Option<SessionMarkers> {
        let path = self.workspace_file(PROGRESS_FILE_NAME)?;
        read_markers(&path)
    }
}

fn read_markers(path: &Utf8Path) -> Option<SessionMarkers> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_yaml_ng::from_str(&contents) {
        Ok(markers) => Some(markers),
        Err(e) => {
            tracing::warn!("Ignoring unreadable progress file {}: {}", path, e);
            None
        }
    }
}

/// Builds a [`ProcessPipeline`] for every job.
#[derive(Debug, Clone)]
pub struct ProcessPipelineFactory {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
}

impl PipelineFactory for ProcessPipelineFactory {
    fn create(&self, _configuration: &Configuration) -> Result<Arc<dyn Pipeline>, PipelineError> {
        Ok(Arc::new(ProcessPipeline::new(
            self.program.clone(),
            self.args.clone(),
        )))
    }
}
