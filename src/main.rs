//! upscale-driver - command line front end for the upscaling job controller
//!
//! # Execution Flow
//!
//! 1. Parse arguments (clap)
//! 2. Load driver settings from `<config-dir>/driver.yaml` and `UPSCALE_DRIVER__*`
//! 3. Initialize logging → logs/upscale-driver.<date>
//! 4. Create tokio runtime with 4 worker threads
//! 5. Build the job configuration, start the job and wait for its outcome
//!    (Ctrl-C suspends, a second Ctrl-C aborts)
//! 6. Shutdown the runtime with a 5s timeout and exit with the job's status

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use upscale_driver::cli::{self, Cli};
use upscale_driver::models::JobOutcome;
use upscale_driver::{APP_NAME, ConfigManager, VERSION};

fn main() -> ExitCode {
    let args = Cli::parse();

    match run(&args) {
        Ok(outcome) => {
            match &outcome {
                JobOutcome::Completed => println!("Upscaling complete"),
                JobOutcome::Suspended { snapshot } => {
                    println!("Suspended. Resume with: --input {}", snapshot)
                }
                JobOutcome::Failed { reason } => eprintln!("Job failed: {}", reason),
            }
            ExitCode::from(cli::exit_code(&outcome))
        }
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<JobOutcome> {
    let config_manager = ConfigManager::new(&args.config_dir)?;
    let settings = args.apply_overrides(config_manager.load_driver_settings()?);

    let _guard = upscale_driver::logging::setup_logging(&settings.logging, APP_NAME)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("upscale-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 4);

    let result = runtime.block_on(cli::run(args, &config_manager, settings));

    // The pipeline is finished by now; give stray blocking tasks a moment
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Shutdown complete");
    result
}
