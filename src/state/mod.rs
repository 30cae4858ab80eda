// State management module
//
// This module provides the StateManager which wraps JobStatus with thread-safe access
// using Arc<RwLock<T>> and emits change events for front ends.

use crate::models::{Configuration, JobOutcome, JobPhase, JobStatus};
use camino::Utf8PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when the job status is modified
///
/// Front ends subscribe to these instead of polling the status.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The job moved to another lifecycle phase
    PhaseChanged { from: JobPhase, to: JobPhase },

    /// A job was accepted and is preparing its workspace
    JobStarted {
        input_file: Option<Utf8PathBuf>,
        output_file: Option<Utf8PathBuf>,
        resumed: bool,
    },

    /// Current operation has changed
    OperationChanged { operation: String },

    /// Workspace preparation produced a warning
    WorkspaceWarning { message: String },

    /// A session snapshot was written
    SnapshotWritten { path: Utf8PathBuf },

    /// Status has been reset to idle
    StateReset,
}

/// Thread-safe job status with event emission
///
/// - Provides thread-safe access to [`JobStatus`] via `Arc<RwLock<T>>`
/// - Detects status changes and emits [`StateChange`] events
/// - Guards phase transitions so that concurrent callers cannot both win
///
/// # Usage
///
/// - [`read()`](Self::read) for reading without cloning
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`transition()`](Self::transition) for compare-and-set phase changes
/// - [`subscribe()`](Self::subscribe) for listening to changes
pub struct StateManager {
    status: Arc<RwLock<JobStatus>>,

    /// Multiple subscribers can listen for changes
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager in the idle phase
    ///
    /// The broadcast channel buffers 100 events.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            status: Arc::new(RwLock::new(JobStatus::default())),
            state_tx,
        }
    }

    /// Clone of the current status
    pub fn snapshot(&self) -> JobStatus {
        self.status.read().unwrap().clone()
    }

    /// Execute a function with read access to the status
    ///
    /// # Example
    /// ```ignore
    /// let running = state_manager.read(|status| status.phase == JobPhase::Running);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&JobStatus) -> R,
    {
        let status = self.status.read().unwrap();
        f(&status)
    }

    pub fn phase(&self) -> JobPhase {
        self.read(|s| s.phase)
    }

    /// Update the status and emit change events
    ///
    /// Returns the events that were emitted.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut JobStatus),
    {
        let mut status = self.status.write().unwrap();
        let old_status = status.clone();

        update_fn(&mut status);

        self.emit(&old_status, &status)
    }

    /// Move from one of `from` to `to`, applying `update_fn` in the same critical section.
    ///
    /// Returns the phase that was left, or the current phase when the transition
    /// is not allowed (in which case nothing is changed).
    pub fn transition<F>(
        &self,
        from: &[JobPhase],
        to: JobPhase,
        update_fn: F,
    ) -> Result<JobPhase, JobPhase>
    where
        F: FnOnce(&mut JobStatus),
    {
        let mut status = self.status.write().unwrap();
        let previous = status.phase;
        if !from.contains(&previous) {
            return Err(previous);
        }

        let old_status = status.clone();
        status.phase = to;
        update_fn(&mut status);
        self.emit(&old_status, &status);

        Ok(previous)
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn emit(&self, old: &JobStatus, new: &JobStatus) -> Vec<StateChange> {
        let changes = Self::detect_changes(old, new);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }
        changes
    }

    /// Detect what changed between two statuses and generate events
    fn detect_changes(old: &JobStatus, new: &JobStatus) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.phase != new.phase {
            if old.phase.is_terminal() || old.phase == JobPhase::Idle {
                if new.phase == JobPhase::Idle {
                    changes.push(StateChange::StateReset);
                } else if new.phase == JobPhase::Starting {
                    changes.push(StateChange::JobStarted {
                        input_file: new.input_file.clone(),
                        output_file: new.output_file.clone(),
                        resumed: new.resumed,
                    });
                }
            }

            changes.push(StateChange::PhaseChanged {
                from: old.phase,
                to: new.phase,
            });
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        if new.workspace_warnings.len() > old.workspace_warnings.len() {
            for message in &new.workspace_warnings[old.workspace_warnings.len()..] {
                changes.push(StateChange::WorkspaceWarning {
                    message: message.clone(),
                });
            }
        }

        if old.snapshot_path != new.snapshot_path {
            if let Some(path) = &new.snapshot_path {
                changes.push(StateChange::SnapshotWritten { path: path.clone() });
            }
        }

        changes
    }

    // Convenience methods for the job lifecycle

    /// Accept a new job: `Idle -> Starting`
    pub fn begin_job(&self, configuration: &Configuration) -> Result<JobPhase, JobPhase> {
        let settings = &configuration.user_settings;
        let resumed = configuration.is_resume();

        self.transition(&[JobPhase::Idle], JobPhase::Starting, |status| {
            status.input_file = Some(settings.input_file.clone());
            status.output_file = Some(settings.output_file.clone());
            status.workspace = Some(configuration.workspace().to_path_buf());
            status.resumed = resumed;
            status.current_operation = "Preparing workspace".to_string();
            status.workspace_warnings.clear();
            status.last_error = None;
            status.snapshot_path = None;
        })
    }

    /// The pipeline is up: `Starting -> Running`
    pub fn mark_running(&self) -> Result<JobPhase, JobPhase> {
        self.transition(&[JobPhase::Starting], JobPhase::Running, |status| {
            status.current_operation = "Upscaling".to_string();
        })
    }

    /// Enter the terminal phase matching `outcome`, from `Starting` or `Running`
    pub fn finish(&self, outcome: &JobOutcome) -> Result<JobPhase, JobPhase> {
        self.transition(
            &[JobPhase::Starting, JobPhase::Running],
            outcome.phase(),
            |status| {
                status.current_operation.clear();
                match outcome {
                    JobOutcome::Completed => {}
                    JobOutcome::Failed { reason } => status.last_error = Some(reason.clone()),
                    JobOutcome::Suspended { snapshot } => {
                        status.snapshot_path = Some(snapshot.clone())
                    }
                }
            },
        )
    }

    /// Back to `Idle` after a terminal phase
    pub fn reset(&self) -> Result<JobPhase, JobPhase> {
        self.transition(
            &[JobPhase::Completed, JobPhase::Failed, JobPhase::Suspended],
            JobPhase::Idle,
            |status| *status = JobStatus::default(),
        )
    }

    pub fn set_operation(&self, operation: impl Into<String>) -> Vec<StateChange> {
        let operation = operation.into();
        self.update(|status| status.current_operation = operation)
    }

    pub fn add_workspace_warning(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|status| status.workspace_warnings.push(message))
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
