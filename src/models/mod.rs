//! Data models for the upscale driver.
//!
//! - [`Configuration`]: The canonical pipeline configuration (`user_settings`,
//!   `developer_settings`, optional resume markers, pass-through sections)
//! - [`DriverSettings`]: The driver's own runtime settings (workspace polling, logging)
//! - [`JobPhase`], [`JobStatus`], [`JobOutcome`]: Job lifecycle and the payload of the
//!   completion notification
//!
//! Configuration types derive `Serialize`/`Deserialize` because they are persisted as YAML,
//! both as the per-platform base file and as the suspended session snapshot.

pub mod configuration;
pub mod job;
pub mod settings;

pub use configuration::{
    Configuration, DenoiseLevel, DeveloperSettings, OptionParseError, PassThrough, ScaleFactor,
    SessionMarkers, UserSettings, Waifu2xType,
};
pub use job::{JobOutcome, JobPhase, JobStatus};
pub use settings::{DriverSettings, LogSettings, PermissionPolicy, WorkspacePolicy};
