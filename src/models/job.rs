use camino::Utf8PathBuf;
use std::fmt;

/// Lifecycle phase of the job owned by a [`JobController`](crate::controller::JobController).
///
/// ```text
/// Idle -> Starting -> Running -> { Completed, Failed, Suspended }
/// ```
///
/// `Suspended` ends the current execution but leaves a session snapshot behind
/// so a fresh controller can start again from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JobPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Suspended,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Suspended
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobPhase::Starting | JobPhase::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Starting => "starting",
            JobPhase::Running => "running",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
            JobPhase::Suspended => "suspended",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the one-shot completion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed { reason: String },
    Suspended { snapshot: Utf8PathBuf },
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        JobOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Phase the controller ends in for this outcome.
    pub fn phase(&self) -> JobPhase {
        match self {
            JobOutcome::Completed => JobPhase::Completed,
            JobOutcome::Failed { .. } => JobPhase::Failed,
            JobOutcome::Suspended { .. } => JobPhase::Suspended,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => f.write_str("upscale complete"),
            JobOutcome::Failed { reason } => write!(f, "upscale failed: {}", reason),
            JobOutcome::Suspended { snapshot } => {
                write!(f, "upscale suspended, resume with {}", snapshot)
            }
        }
    }
}

/// Observable status of the current job.
///
/// Owned by [`StateManager`](crate::state::StateManager); presentation layers
/// read it through snapshots or react to [`StateChange`](crate::state::StateChange) events.
#[derive(Clone, Debug, Default)]
pub struct JobStatus {
    pub phase: JobPhase,

    pub input_file: Option<Utf8PathBuf>,
    pub output_file: Option<Utf8PathBuf>,
    pub workspace: Option<Utf8PathBuf>,
    pub resumed: bool,

    pub current_operation: String,

    // Warnings raised while preparing the workspace
    pub workspace_warnings: Vec<String>,

    pub last_error: Option<String>,
    pub snapshot_path: Option<Utf8PathBuf>,
}

impl JobStatus {
    /// Human readable one-line status.
    pub fn status_message(&self) -> String {
        match self.phase {
            JobPhase::Idle => {
                if self.input_file.is_some() && self.output_file.is_some() {
                    "Ready to upscale!".to_string()
                } else {
                    "Select a video to upscale".to_string()
                }
            }
            JobPhase::Starting => "Preparing workspace".to_string(),
            JobPhase::Running => "Upscaling in progress".to_string(),
            JobPhase::Completed => "Upscale complete!".to_string(),
            JobPhase::Failed => "Upscale failed. See log".to_string(),
            JobPhase::Suspended => match &self.snapshot_path {
                Some(path) => format!("Upscale suspended ({})", path),
                None => "Upscale suspended".to_string(),
            },
        }
    }
}
