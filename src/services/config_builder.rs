use crate::models::{Configuration, DenoiseLevel, ScaleFactor, UserSettings, Waifu2xType};
use crate::services::snapshot::{self, SnapshotError};
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Raw selections coming from the front end.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInputs {
    pub input_file: Utf8PathBuf,
    pub output_file: Utf8PathBuf,
    pub block_size: u32,
    pub quality_minimum: u8,
    pub waifu2x_type: Waifu2xType,
    pub scale_factor: ScaleFactor,
    pub denoise_level: DenoiseLevel,
}

impl Default for UserInputs {
    fn default() -> Self {
        let defaults = UserSettings::default();
        Self {
            input_file: Utf8PathBuf::new(),
            output_file: Utf8PathBuf::new(),
            block_size: defaults.block_size,
            quality_minimum: defaults.quality_minimum,
            waifu2x_type: defaults.waifu2x_type,
            scale_factor: defaults.scale_factor,
            denoise_level: defaults.denoise_level,
        }
    }
}

/// A configuration that may not be handed to the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No input video selected")]
    MissingInputFile,

    #[error("No output file selected")]
    MissingOutputFile,

    #[error("Scale factor {scale_factor} is not supported by waifu2x type {waifu2x_type}")]
    UnsupportedScaleFactor {
        waifu2x_type: Waifu2xType,
        scale_factor: ScaleFactor,
    },

    #[error("Block size must be positive")]
    InvalidBlockSize,

    #[error("Minimum quality must be between 0 and 100, got {0}")]
    QualityOutOfRange(u8),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Turns platform defaults plus user selections into a [`Configuration`].
///
/// Stateless; the only filesystem access is reading a session snapshot when the
/// selected input is one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder;

impl ConfigBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the configuration for a job.
    ///
    /// If `inputs.input_file` names a session snapshot, the snapshot is loaded
    /// and returned as-is: `base` and every other input are ignored.
    pub fn build(
        &self,
        base: &Configuration,
        inputs: &UserInputs,
    ) -> Result<Configuration, BuildError> {
        if snapshot::is_snapshot_file(&inputs.input_file) {
            tracing::info!("Input is a suspended session, resuming from {}", inputs.input_file);
            return Ok(self.load_snapshot(&inputs.input_file)?);
        }

        let mut config = base.clone();
        config.user_settings = UserSettings {
            input_file: inputs.input_file.clone(),
            output_file: inputs.output_file.clone(),
            block_size: inputs.block_size,
            quality_minimum: inputs.quality_minimum,
            waifu2x_type: inputs.waifu2x_type,
            scale_factor: inputs.scale_factor,
            denoise_level: inputs.denoise_level,
        };
        config.session = None;

        Self::validate(&config.user_settings)?;

        tracing::info!(
            input = %config.user_settings.input_file,
            output = %config.user_settings.output_file,
            waifu2x_type = %config.user_settings.waifu2x_type,
            scale_factor = %config.user_settings.scale_factor,
            denoise_level = %config.user_settings.denoise_level,
            block_size = config.user_settings.block_size,
            quality_minimum = config.user_settings.quality_minimum,
            workspace = %config.developer_settings.workspace,
            "Built job configuration"
        );

        Ok(config)
    }

    /// Load a suspended session; the snapshot is authoritative.
    pub fn load_snapshot(&self, path: &Utf8Path) -> Result<Configuration, SnapshotError> {
        snapshot::load_snapshot(path)
    }

    /// Check the invariants a job needs before it may start.
    pub fn validate(settings: &UserSettings) -> Result<(), ValidationError> {
        if settings.input_file.as_str().trim().is_empty() {
            return Err(ValidationError::MissingInputFile);
        }

        if settings.output_file.as_str().trim().is_empty() {
            return Err(ValidationError::MissingOutputFile);
        }

        if !settings.waifu2x_type.supports(settings.scale_factor) {
            return Err(ValidationError::UnsupportedScaleFactor {
                waifu2x_type: settings.waifu2x_type,
                scale_factor: settings.scale_factor,
            });
        }

        if settings.block_size == 0 {
            return Err(ValidationError::InvalidBlockSize);
        }

        if settings.quality_minimum > 100 {
            return Err(ValidationError::QualityOutOfRange(settings.quality_minimum));
        }

        Ok(())
    }

    /// Default output path for the selected input.
    ///
    /// `<dir>/<name>_[vulkan][s2][n1][b20][q85].mp4`, where `<name>` is the input
    /// file name up to its first dot.
    pub fn default_output_file(inputs: &UserInputs) -> Utf8PathBuf {
        let dir = inputs.input_file.parent().unwrap_or(Utf8Path::new(""));
        let name = inputs.input_file.file_name().unwrap_or_default();
        let name_only = name.split('.').next().unwrap_or_default();

        dir.join(format!(
            "{}_[{}][s{}][n{}][b{}][q{}].mp4",
            name_only,
            inputs.waifu2x_type,
            inputs.scale_factor,
            inputs.denoise_level,
            inputs.block_size,
            inputs.quality_minimum
        ))
    }
}
