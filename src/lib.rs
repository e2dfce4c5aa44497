pub mod camera;
pub mod capture;
pub mod error;
pub mod interface;
pub mod pipeline;
pub mod utils;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use camera::DepthCamera;
pub use capture::{FramePair, PixelFormat, StreamProfile};
pub use error::CaptureError;
pub use interface::CameraInterface;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub acquisition: AcquisitionConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Applied on open when the device supports it
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
}

impl CameraConfig {
    pub fn profile(&self) -> StreamProfile {
        StreamProfile::new(self.width, self.height, self.fps)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            auto_exposure: true,
            auto_white_balance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Upper bound on a single device wait; also bounds how long close() takes
    pub poll_timeout_ms: u64,
    /// Pin the acquisition thread to this core
    pub cpu_core: Option<usize>,
    pub thread_name: String,
}

impl AcquisitionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            cpu_core: None,
            thread_name: "depth-acquisition".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Built-in test pattern generator
    Synthetic,
    /// First connected hardware device
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: Source,
    pub report_interval_ms: u64,
    /// Directory for a snapshot of the newest pair on shutdown
    pub snapshot_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: Source::Synthetic,
            report_interval_ms: 1000,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `depthcam.toml` (optional) and `DEPTHCAM__SECTION__KEY` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("depthcam")
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DEPTHCAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
