use crate::config::ConfigManager;
use crate::controller::JobController;
use crate::models::{
    DenoiseLevel, DriverSettings, JobOutcome, JobPhase, PermissionPolicy, ScaleFactor,
    Waifu2xType,
};
use crate::services::{
    ConfigBuilder, ProcessPipelineFactory, UserInputs, WorkspaceManager, snapshot,
};
use crate::state::StateChange;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "upscale-driver",
    version,
    about = "Run a suspendable waifu2x video upscaling job"
)]
pub struct Cli {
    /// Input video, or a suspended_session_data.yaml to resume a session
    #[arg(short, long)]
    pub input: Utf8PathBuf,

    /// Output video (default: derived from the input name and settings)
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// Upscaler backend: caffe, vulkan, vulkan-legacy or converter-cpp
    #[arg(long, default_value = "vulkan")]
    pub waifu2x_type: Waifu2xType,

    /// Scale factor (1-4)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub scale: u8,

    /// Denoise level (0-3)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub noise: u8,

    /// Frames per upscaling block
    #[arg(long, default_value_t = 20)]
    pub block_size: u32,

    /// Minimum quality (0-100)
    #[arg(long, default_value_t = 85, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub quality: u8,

    /// Directory holding upscale_<platform>.yaml and driver.yaml
    #[arg(long, default_value = "config")]
    pub config_dir: Utf8PathBuf,

    /// Override the workspace directory from the platform configuration
    #[arg(long)]
    pub workspace: Option<Utf8PathBuf>,

    /// Fail instead of warning when the stale workspace cannot be deleted
    #[arg(long)]
    pub strict_permissions: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Emit JSON logs on stdout instead of the console format
    #[arg(long)]
    pub json_logs: bool,

    /// Upscaler executable; it receives the configuration file path as its last argument
    #[arg(long)]
    pub pipeline: Utf8PathBuf,

    /// Extra arguments for the upscaler, placed after `--`
    #[arg(last = true)]
    pub pipeline_args: Vec<String>,
}

impl Cli {
    /// Selections for [`ConfigBuilder`]; fills in the default output name.
    pub fn user_inputs(&self) -> Result<UserInputs> {
        let mut inputs = UserInputs {
            input_file: self.input.clone(),
            output_file: self.output.clone().unwrap_or_default(),
            block_size: self.block_size,
            quality_minimum: self.quality,
            waifu2x_type: self.waifu2x_type,
            scale_factor: ScaleFactor::try_from(self.scale)?,
            denoise_level: DenoiseLevel::try_from(self.noise)?,
        };

        if self.output.is_none() && !snapshot::is_snapshot_file(&inputs.input_file) {
            inputs.output_file = ConfigBuilder::default_output_file(&inputs);
        }

        Ok(inputs)
    }

    /// Apply command line switches on top of the loaded driver settings.
    pub fn apply_overrides(&self, mut settings: DriverSettings) -> DriverSettings {
        if self.strict_permissions {
            settings.workspace.permission_policy = PermissionPolicy::Strict;
        }
        if self.debug {
            settings.logging.debug = true;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings
    }

    fn pipeline_factory(&self) -> ProcessPipelineFactory {
        ProcessPipelineFactory {
            program: self.pipeline.clone(),
            args: self.pipeline_args.clone(),
        }
    }
}

/// Process exit code for a finished job.
pub fn exit_code(outcome: &JobOutcome) -> u8 {
    match outcome {
        JobOutcome::Completed | JobOutcome::Suspended { .. } => 0,
        JobOutcome::Failed { .. } => 1,
    }
}

/// Build the configuration, run one job and wait for its outcome.
///
/// The first Ctrl-C suspends a running job (or kills one that is still
/// starting); a second Ctrl-C kills it.
pub async fn run(
    args: &Cli,
    config_manager: &ConfigManager,
    settings: DriverSettings,
) -> Result<JobOutcome> {
    let mut base = config_manager.load_base_configuration()?;
    if let Some(workspace) = &args.workspace {
        base.developer_settings.workspace = workspace.clone();
    }

    let inputs = args.user_inputs()?;
    let configuration = ConfigBuilder::new()
        .build(&base, &inputs)
        .context("Invalid job configuration")?;

    let controller = JobController::new(
        WorkspaceManager::new(settings.workspace),
        Arc::new(args.pipeline_factory()),
        tokio::runtime::Handle::current(),
    );

    let listener = tokio::spawn(log_state_changes(controller.subscribe()));

    controller.start(configuration)?;

    let join = controller.join();
    tokio::pin!(join);

    let mut interrupts = 0u32;
    let outcome = loop {
        tokio::select! {
            outcome = &mut join => break outcome?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupts += 1;
                handle_interrupt(&controller, interrupts);
            }
        }
    };

    listener.abort();
    tracing::info!("{}", controller.status().status_message());
    controller.metrics().log_summary();

    Ok(outcome)
}

fn handle_interrupt(controller: &JobController, interrupts: u32) {
    if interrupts == 1 && controller.phase() == JobPhase::Running {
        tracing::warn!("Interrupted, suspending (press Ctrl-C again to abort)");
        match controller.suspend() {
            Ok(path) => {
                eprintln!("Suspending... resume later with --input {}", path);
                return;
            }
            Err(e) => tracing::error!("Suspend failed: {}", e),
        }
    }

    tracing::warn!("Aborting job");
    if let Err(e) = controller.kill() {
        tracing::debug!("Kill ignored: {}", e);
    }
}

async fn log_state_changes(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(StateChange::PhaseChanged { from, to }) => {
                tracing::info!("Job phase: {} -> {}", from, to)
            }
            Ok(StateChange::OperationChanged { operation }) if !operation.is_empty() => {
                tracing::info!("{}", operation)
            }
            Ok(StateChange::WorkspaceWarning { message }) => tracing::warn!("{}", message),
            Ok(StateChange::SnapshotWritten { path }) => {
                tracing::info!("Session snapshot written to {}", path)
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("State listener lagged, skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
