// upscale-driver - job controller for suspendable video upscaling pipelines
//
// This is the library crate containing the job lifecycle, workspace housekeeping
// and configuration handling. The binary crate (main.rs) provides the CLI entry point.

pub mod cli;
pub mod config;
pub mod controller;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use controller::{InvalidStateError, JobController, JobError};
pub use metrics::Metrics;
pub use models::{Configuration, DriverSettings, JobOutcome, JobPhase, JobStatus};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
