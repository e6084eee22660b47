//! # Engine Configuration
//!
//! Settings for the renderer core, grouped by subsystem:
//!
//! - **Graphics**: frames in flight, validation layers, application name
//! - **Assets**: where shader binaries and textures are found
//! - **Logging**: `env_logger` filter and colouring
//!
//! Every section has serde defaults, so a config file only needs the values it
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::config::{Config, ConfigError};

/// Largest supported frames-in-flight count
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 3;

/// # Graphics Configuration
///
/// Vulkan instance and frame pipelining settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frames the host may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (None = debug builds only)
    pub enable_validation: Option<bool>,
}

impl GraphicsConfig {
    /// Create a new graphics configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            max_frames_in_flight: 2,
            enable_validation: None,
        }
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Resolved validation flag
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "Max frames in flight must be within 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.max_frames_in_flight
            )));
        }

        Ok(())
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self::new("Event Horizon")
    }
}

/// # Asset Configuration
///
/// Directory layout used to resolve shader and texture names into paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Root directory for all assets
    pub root_dir: PathBuf,
    /// Compiled SPIR-V directory, relative to `root_dir`
    pub shader_dir: PathBuf,
    /// Texture directory, relative to `root_dir`
    pub texture_dir: PathBuf,
}

impl AssetConfig {
    /// Set the asset root directory
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Full path of a shader binary
    pub fn shader_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.root_dir.join(&self.shader_dir).join(file)
    }

    /// Full path of a texture image
    pub fn texture_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.root_dir.join(&self.texture_dir).join(file)
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("assets"),
            shader_dir: PathBuf::from("shaders"),
            texture_dir: PathBuf::from("textures"),
        }
    }
}

/// ANSI colouring of log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogWriteStyle {
    /// Colour when writing to a terminal
    #[default]
    Auto,
    /// Always colour
    Always,
    /// Never colour
    Never,
}

impl From<LogWriteStyle> for env_logger::WriteStyle {
    fn from(style: LogWriteStyle) -> Self {
        match style {
            LogWriteStyle::Auto => Self::Auto,
            LogWriteStyle::Always => Self::Always,
            LogWriteStyle::Never => Self::Never,
        }
    }
}

/// # Logging Configuration
///
/// `filter` uses `env_logger` syntax, e.g. `"info,event_horizon::render=debug"`.
/// When unset, `RUST_LOG` is consulted, then `info` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directives
    pub filter: Option<String>,
    /// Colour handling
    pub write_style: LogWriteStyle,
}

/// # Complete Engine Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rendering configuration
    pub graphics: GraphicsConfig,
    /// Asset locations
    pub assets: AssetConfig,
    /// Logger settings
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Create a configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            graphics: GraphicsConfig::new(app_name),
            ..Self::default()
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.graphics.validate()
    }
}

impl Config for EngineConfig {}
