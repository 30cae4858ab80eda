use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sections of the base file that the driver does not interpret.
///
/// They are carried through untouched (and in their original order) so the
/// pipeline sees exactly what the platform file contained.
pub type PassThrough = IndexMap<String, serde_yaml_ng::Value>;

/// Canonical configuration handed to the pipeline.
///
/// Built once by [`ConfigBuilder`](crate::services::ConfigBuilder) or loaded
/// from a session snapshot, and never mutated while a job is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(alias = "usersettings")]
    pub user_settings: UserSettings,

    pub developer_settings: DeveloperSettings,

    /// Resume markers; only present on configurations restored from a snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionMarkers>,

    #[serde(flatten)]
    pub extra: PassThrough,
}

/// Root key older platform files and snapshots nest the whole document under.
pub const LEGACY_ROOT_KEY: &str = "freddie";

impl Configuration {
    /// Parse a YAML document, unwrapping the legacy [`LEGACY_ROOT_KEY`] root
    /// when the sections are nested under it.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml_ng::Error> {
        let document: serde_yaml_ng::Value = serde_yaml_ng::from_str(contents)?;

        let nested = document.get("user_settings").is_none()
            && document.get("usersettings").is_none();
        match document.get(LEGACY_ROOT_KEY) {
            Some(inner) if nested => serde_yaml_ng::from_value(inner.clone()),
            _ => serde_yaml_ng::from_value(document),
        }
    }

    /// Workspace directory for intermediate frames.
    pub fn workspace(&self) -> &Utf8Path {
        &self.developer_settings.workspace
    }

    /// True when this configuration continues a suspended session.
    pub fn is_resume(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.resume_session)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub input_file: Utf8PathBuf,

    #[serde(default)]
    pub output_file: Utf8PathBuf,

    #[serde(default = "default_block_size")]
    pub block_size: u32,

    #[serde(default = "default_quality_minimum")]
    pub quality_minimum: u8,

    #[serde(default)]
    pub waifu2x_type: Waifu2xType,

    #[serde(default)]
    pub scale_factor: ScaleFactor,

    #[serde(default)]
    pub denoise_level: DenoiseLevel,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            input_file: Utf8PathBuf::new(),
            output_file: Utf8PathBuf::new(),
            block_size: default_block_size(),
            quality_minimum: default_quality_minimum(),
            waifu2x_type: Waifu2xType::default(),
            scale_factor: ScaleFactor::default(),
            denoise_level: DenoiseLevel::default(),
        }
    }
}

fn default_block_size() -> u32 {
    20
}

fn default_quality_minimum() -> u8 {
    85
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperSettings {
    pub workspace: Utf8PathBuf,

    #[serde(flatten)]
    pub extra: PassThrough,
}

/// Progress markers persisted alongside a suspended configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMarkers {
    #[serde(default)]
    pub resume_session: bool,

    #[serde(default)]
    pub frames_processed: u64,

    /// Pipeline-defined markers, opaque to the driver.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub markers: IndexMap<String, String>,
}

/// Raised when a user-facing option string or number is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionParseError {
    #[error("unknown waifu2x type: {0}")]
    Waifu2xType(String),

    #[error("scale factor must be 1, 2, 3 or 4, got {0}")]
    ScaleFactor(u8),

    #[error("denoise level must be 0, 1, 2 or 3, got {0}")]
    DenoiseLevel(u8),
}

/// Upscaler backend used by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waifu2xType {
    Caffe,
    #[default]
    Vulkan,
    VulkanLegacy,
    ConverterCpp,
}

impl Waifu2xType {
    pub const ALL: [Waifu2xType; 4] = [
        Waifu2xType::Caffe,
        Waifu2xType::Vulkan,
        Waifu2xType::VulkanLegacy,
        Waifu2xType::ConverterCpp,
    ];

    /// Config-file spelling of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Waifu2xType::Caffe => "caffe",
            Waifu2xType::Vulkan => "vulkan",
            Waifu2xType::VulkanLegacy => "vulkan_legacy",
            Waifu2xType::ConverterCpp => "converter_cpp",
        }
    }

    /// Scale factors the backend can produce.
    ///
    /// The Vulkan backend only supports doubling.
    pub fn allowed_scale_factors(&self) -> &'static [ScaleFactor] {
        match self {
            Waifu2xType::Vulkan => &[ScaleFactor::X2],
            _ => &ScaleFactor::ALL,
        }
    }

    pub fn supports(&self, scale: ScaleFactor) -> bool {
        self.allowed_scale_factors().contains(&scale)
    }
}

impl fmt::Display for Waifu2xType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Waifu2xType {
    type Err = OptionParseError;

    /// Accepts both the config spelling (`vulkan_legacy`) and the labels shown
    /// in the front end (`Waifu2x-Vulkan-Legacy`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let normalized = normalized.strip_prefix("waifu2x_").unwrap_or(&normalized);

        match normalized {
            "caffe" => Ok(Waifu2xType::Caffe),
            "vulkan" => Ok(Waifu2xType::Vulkan),
            "vulkan_legacy" => Ok(Waifu2xType::VulkanLegacy),
            "converter_cpp" => Ok(Waifu2xType::ConverterCpp),
            _ => Err(OptionParseError::Waifu2xType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ScaleFactor {
    X1,
    #[default]
    X2,
    X3,
    X4,
}

impl ScaleFactor {
    pub const ALL: [ScaleFactor; 4] = [
        ScaleFactor::X1,
        ScaleFactor::X2,
        ScaleFactor::X3,
        ScaleFactor::X4,
    ];

    pub fn value(&self) -> u8 {
        match self {
            ScaleFactor::X1 => 1,
            ScaleFactor::X2 => 2,
            ScaleFactor::X3 => 3,
            ScaleFactor::X4 => 4,
        }
    }
}

impl TryFrom<u8> for ScaleFactor {
    type Error = OptionParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ScaleFactor::X1),
            2 => Ok(ScaleFactor::X2),
            3 => Ok(ScaleFactor::X3),
            4 => Ok(ScaleFactor::X4),
            other => Err(OptionParseError::ScaleFactor(other)),
        }
    }
}

impl From<ScaleFactor> for u8 {
    fn from(scale: ScaleFactor) -> Self {
        scale.value()
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DenoiseLevel {
    L0,
    #[default]
    L1,
    L2,
    L3,
}

impl DenoiseLevel {
    pub const ALL: [DenoiseLevel; 4] = [
        DenoiseLevel::L0,
        DenoiseLevel::L1,
        DenoiseLevel::L2,
        DenoiseLevel::L3,
    ];

    pub fn value(&self) -> u8 {
        match self {
            DenoiseLevel::L0 => 0,
            DenoiseLevel::L1 => 1,
            DenoiseLevel::L2 => 2,
            DenoiseLevel::L3 => 3,
        }
    }
}

impl TryFrom<u8> for DenoiseLevel {
    type Error = OptionParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DenoiseLevel::L0),
            1 => Ok(DenoiseLevel::L1),
            2 => Ok(DenoiseLevel::L2),
            3 => Ok(DenoiseLevel::L3),
            other => Err(OptionParseError::DenoiseLevel(other)),
        }
    }
}

impl From<DenoiseLevel> for u8 {
    fn from(level: DenoiseLevel) -> Self {
        level.value()
    }
}

impl fmt::Display for DenoiseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
