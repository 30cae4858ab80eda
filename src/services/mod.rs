//! Services module - the building blocks the job controller is assembled from.
//!
//! Nothing in here knows about a front end. Every service takes explicit inputs,
//! which keeps it testable without a running job.
//!
//! # Components
//!
//! - [`ConfigBuilder`]: merges the platform base configuration with the user's
//!   selections, validates the result, and switches to the session snapshot when
//!   the selected input is one.
//! - [`WorkspaceManager`]: removes a stale workspace left by an aborted run and
//!   waits (bounded, with exponential backoff) until the deletion is visible.
//!   Permission problems come back as [`WorkspaceWarning`]s in the report.
//! - [`snapshot`]: reads and writes `suspended_session_data.yaml`.
//! - [`Pipeline`] / [`PipelineFactory`]: the contract of the external upscaling
//!   engine, plus [`ProcessPipeline`], which drives an upscaler executable.
//!
//! # Usage Example
//!
//! ```ignore
//! use upscale_driver::services::{ConfigBuilder, UserInputs, WorkspaceManager};
//!
//! let config = ConfigBuilder::new().build(&base, &inputs)?;
//!
//! let report = WorkspaceManager::default()
//!     .prepare(config.workspace())
//!     .await?;
//! for warning in &report.warnings {
//!     eprintln!("warning: {}", warning);
//! }
//! ```

pub mod config_builder;
pub mod pipeline;
pub mod snapshot;
pub mod workspace;

pub use config_builder::{BuildError, ConfigBuilder, UserInputs, ValidationError};
pub use pipeline::{Pipeline, PipelineError, PipelineFactory, ProcessPipeline, ProcessPipelineFactory};
pub use snapshot::{SNAPSHOT_FILE_NAME, SnapshotError};
pub use workspace::{WorkspaceError, WorkspaceManager, WorkspaceReport, WorkspaceWarning};
