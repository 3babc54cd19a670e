// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{HalBackendType, PixelFormat, Size, VirtualHalOptions};
use crate::constants::{picture, preview, virtual_camera};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory name under the user's configuration directory
const CONFIG_DIR_NAME: &str = "camera-control";

/// File name of the JSON configuration
const CONFIG_FILE_NAME: &str = "config.json";

/// Preview stream settings
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Requested preview width
    pub width: u32,
    /// Requested preview height
    pub height: u32,
    /// Requested frames per second
    pub framerate: u32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            width: preview::DEFAULT_WIDTH,
            height: preview::DEFAULT_HEIGHT,
            framerate: preview::DEFAULT_FRAMERATE,
        }
    }
}

/// Still capture settings
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureSettings {
    /// Picture width (0 = sensor default)
    pub width: u32,
    /// Picture height (0 = sensor default)
    pub height: u32,
    /// Output file format
    pub file_format: String,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for PictureSettings {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            file_format: picture::DEFAULT_FILE_FORMAT.to_string(),
            jpeg_quality: picture::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Behaviour of the simulated camera
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualCameraSettings {
    pub camera_count: u32,
    pub preview_sizes: Vec<Size>,
    pub picture_sizes: Vec<Size>,
    /// Layout of generated preview frames
    pub native_format: PixelFormat,
    pub frame_interval_ms: u64,
    pub focus_delay_ms: u64,
    pub capture_delay_ms: u64,
    pub max_focus_areas: u32,
    pub max_metering_areas: u32,
}

impl Default for VirtualCameraSettings {
    fn default() -> Self {
        let options = VirtualHalOptions::default();
        Self {
            camera_count: options.camera_count,
            preview_sizes: options.preview_sizes,
            picture_sizes: options.picture_sizes,
            native_format: options.native_format,
            frame_interval_ms: virtual_camera::FRAME_INTERVAL.as_millis() as u64,
            focus_delay_ms: virtual_camera::FOCUS_DELAY.as_millis() as u64,
            capture_delay_ms: virtual_camera::CAPTURE_DELAY.as_millis() as u64,
            max_focus_areas: options.max_focus_areas,
            max_metering_areas: options.max_metering_areas,
        }
    }
}

impl VirtualCameraSettings {
    /// Options for building the virtual HAL factory
    pub fn to_options(&self) -> VirtualHalOptions {
        VirtualHalOptions {
            camera_count: self.camera_count,
            preview_sizes: self.preview_sizes.clone(),
            picture_sizes: self.picture_sizes.clone(),
            native_format: self.native_format,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            focus_delay: Duration::from_millis(self.focus_delay_ms),
            capture_delay: Duration::from_millis(self.capture_delay_ms),
            focus_succeeds: true,
            max_focus_areas: self.max_focus_areas,
            max_metering_areas: self.max_metering_areas,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use
    pub backend: HalBackendType,
    /// Preview size and rate requested when a session opens
    pub preview: PreviewSettings,
    /// Frames the preview stream may hold before frames are dropped
    pub preview_buffer_frames: usize,
    /// Still capture defaults
    pub picture: PictureSettings,
    /// Simulated camera behaviour
    pub virtual_camera: VirtualCameraSettings,
    /// Tracing filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: HalBackendType::default(),
            preview: PreviewSettings::default(),
            preview_buffer_frames: preview::DEFAULT_BUFFER_FRAMES,
            picture: PictureSettings::default(),
            virtual_camera: VirtualCameraSettings::default(),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/camera-control/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }
}
