use crate::models::{Configuration, DeveloperSettings, DriverSettings, UserSettings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix of environment variables that override [`DriverSettings`],
/// e.g. `UPSCALE_DRIVER__WORKSPACE__PERMISSION_POLICY=strict`.
pub const ENV_PREFIX: &str = "UPSCALE_DRIVER";

/// Name of the optional driver settings file inside the configuration directory.
pub const DRIVER_SETTINGS_FILE_NAME: &str = "driver.yaml";

/// Name of the platform base configuration for the OS this binary was built for.
pub fn platform_config_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "upscale_win32.yaml"
    } else if cfg!(target_os = "macos") {
        "upscale_macos.yaml"
    } else {
        "upscale_linux.yaml"
    }
}

/// Configuration manager for the files in the configuration directory.
///
/// Manages two files:
/// - Platform base configuration (`upscale_<platform>.yaml`): pipeline defaults,
///   the workspace location and any pass-through sections for the pipeline
/// - Driver settings (`driver.yaml`, optional): workspace polling and logging,
///   layered with `UPSCALE_DRIVER__*` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    platform_config_path: Utf8PathBuf,
    driver_settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            platform_config_path: config_dir.join(platform_config_file_name()),
            driver_settings_path: config_dir.join(DRIVER_SETTINGS_FILE_NAME),
            config_dir,
        })
    }

    /// Load the platform base configuration.
    ///
    /// # Returns
    /// The loaded Configuration, or generated defaults if the file doesn't exist
    pub fn load_base_configuration(&self) -> Result<Configuration> {
        if !self.platform_config_path.exists() {
            tracing::warn!(
                "Platform config file not found at {}, using defaults",
                self.platform_config_path
            );
            return Ok(self.default_base_configuration());
        }

        let file_contents = fs::read_to_string(&self.platform_config_path).with_context(|| {
            format!("Failed to read platform config: {}", self.platform_config_path)
        })?;

        let mut config = Configuration::from_yaml(&file_contents).with_context(|| {
            format!("Failed to parse platform config: {}", self.platform_config_path)
        })?;

        // Relative workspaces are relative to the configuration directory
        if config.developer_settings.workspace.is_relative() {
            config.developer_settings.workspace =
                self.config_dir.join(&config.developer_settings.workspace);
        }

        tracing::info!("Loaded platform config from {}", self.platform_config_path);
        Ok(config)
    }

    /// Save the platform base configuration.
    pub fn save_base_configuration(&self, config: &Configuration) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(config)
            .context("Failed to serialize platform config to YAML")?;

        fs::write(&self.platform_config_path, yaml_string).with_context(|| {
            format!("Failed to write platform config: {}", self.platform_config_path)
        })?;

        tracing::info!("Saved platform config to {}", self.platform_config_path);
        Ok(())
    }

    /// Load the driver settings from `driver.yaml` and the process environment.
    pub fn load_driver_settings(&self) -> Result<DriverSettings> {
        self.load_driver_settings_with_env(None)
    }

    /// Load the driver settings, reading environment overrides from `env`
    /// instead of the process environment when it is given.
    pub fn load_driver_settings_with_env(
        &self,
        env: Option<config::Map<String, String>>,
    ) -> Result<DriverSettings> {
        let settings = Config::builder()
            .add_source(
                File::from(self.driver_settings_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| {
                format!("Failed to load driver settings: {}", self.driver_settings_path)
            })?;

        let settings: DriverSettings = settings
            .try_deserialize()
            .context("Failed to parse driver settings")?;

        tracing::debug!("Driver settings: {:?}", settings);
        Ok(settings)
    }

    /// Defaults used when no platform file exists yet.
    pub fn default_base_configuration(&self) -> Configuration {
        Configuration {
            user_settings: UserSettings::default(),
            developer_settings: DeveloperSettings {
                workspace: self.config_dir.join("workspace"),
                extra: Default::default(),
            },
            session: None,
            extra: Default::default(),
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn platform_config_path(&self) -> &Utf8Path {
        &self.platform_config_path
    }

    pub fn driver_settings_path(&self) -> &Utf8Path {
        &self.driver_settings_path
    }
}
