//! Coordinator configuration.
//!
//! Defaults mirror a typical phone setup: full-HD preview on both cameras,
//! full-HD JPEG stills on the back camera with continuous-picture
//! autofocus, and two still buffers.

use crate::device::Facing;
use crate::session::{AutofocusMode, ImageFormat, PreviewTarget, Resolution, StillTarget, SurfaceId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on how long `shutdown_all` waits for both controllers.
    pub shutdown_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5000,
        }
    }
}

impl CoordinatorConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Preview surface buffer size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Still capture target settings (back camera only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StillConfig {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// Buffers in the still target; also the limit on outstanding captures.
    pub max_images: usize,
    pub autofocus: AutofocusMode,
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            format: ImageFormat::Jpeg,
            max_images: 2,
            autofocus: AutofocusMode::ContinuousPicture,
        }
    }
}

/// Where captured images are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub directory: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("captures"),
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Simulated hardware settings used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Callback latency in milliseconds (0 delivers immediately).
    pub latency_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { latency_ms: 30 }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {0} dimensions")]
    InvalidDimensions(&'static str),
    #[error("shutdown timeout must be non-zero")]
    InvalidTimeout,
    #[error("still target needs at least one buffer")]
    InvalidStillBuffers,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub still: StillConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_size().is_empty() {
            return Err(ConfigError::InvalidDimensions("preview"));
        }
        if self.still_target().size.is_empty() {
            return Err(ConfigError::InvalidDimensions("still"));
        }
        if self.still.max_images == 0 {
            return Err(ConfigError::InvalidStillBuffers);
        }
        if self.coordinator.shutdown_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn preview_size(&self) -> Resolution {
        Resolution::new(self.preview.width, self.preview.height)
    }

    /// Default preview target for a controller, one surface per facing.
    pub fn preview_target(&self, facing: Facing) -> PreviewTarget {
        let surface = match facing {
            Facing::Back => SurfaceId::new(1),
            Facing::Front => SurfaceId::new(2),
        };
        PreviewTarget::new(surface, self.preview_size())
    }

    pub fn still_target(&self) -> StillTarget {
        StillTarget {
            size: Resolution::new(self.still.width, self.still.height),
            format: self.still.format,
            max_images: self.still.max_images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = FileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.still_target().max_images, 2);
        assert_eq!(config.coordinator.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = FileConfig::default();
        config.preview.width = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDimensions("preview"))
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = FileConfig::from_toml(
            r#"
            [still]
            width = 4032
            height = 3024
            format = "jpeg"
            max_images = 3
            autofocus = "auto"

            [coordinator]
            shutdown_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.still.width, 4032);
        assert_eq!(config.still.autofocus, AutofocusMode::Auto);
        assert_eq!(config.preview.width, 1920);
        assert_eq!(config.coordinator.shutdown_timeout_ms, 250);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            FileConfig::from_toml("[coordinator]\nshutdown_timeout_ms = 0\n"),
            Err(ConfigError::InvalidTimeout)
        ));
        assert!(matches!(
            FileConfig::from_toml("[still]\nwidth = \"wide\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_preview_surfaces_differ() {
        let config = FileConfig::default();
        assert_ne!(
            config.preview_target(Facing::Back).surface,
            config.preview_target(Facing::Front).surface
        );
    }
}
