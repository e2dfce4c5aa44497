//! Device seam: the traits a depth camera backend implements

use std::sync::Arc;
use std::time::Duration;

use crate::error::CaptureError;

pub mod frame;
pub mod synthetic;

#[cfg(feature = "realsense")]
pub mod realsense;

pub use frame::{FramePair, PixelFormat, StreamProfile};
pub use synthetic::{SyntheticContext, SyntheticDevice, SyntheticFeed};

#[cfg(feature = "realsense")]
pub use realsense::RealsenseContext;

/// Boolean device controls the adapter passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOption {
    AutoExposure,
    AutoWhiteBalance,
}

/// Enumerates connected devices.
pub trait DeviceContext {
    fn query_devices(&mut self) -> Result<Vec<Box<dyn DepthDevice>>, CaptureError>;
}

/// A connected camera that has not started streaming yet.
pub trait DepthDevice: Send {
    fn name(&self) -> String;

    /// Option control surface, usable from any thread
    fn sensor(&self) -> Arc<dyn SensorControl>;

    /// Start color and depth streams. Called on the acquisition thread.
    fn start(self: Box<Self>, profile: &StreamProfile) -> Result<Box<dyn FrameStream>, CaptureError>;
}

/// A running color + depth stream.
pub trait FrameStream: Send {
    /// Block for the next synchronized frame pair.
    ///
    /// Returns `Ok(None)` when `timeout` elapses without a frame. Any `Err`
    /// is fatal to the stream.
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<FramePair>, CaptureError>;

    fn stop(&mut self);
}

/// Device option access. Values are device floats; booleans map to 1.0 / 0.0.
pub trait SensorControl: Send + Sync {
    fn supports(&self, option: DeviceOption) -> bool;

    fn get(&self, option: DeviceOption) -> Option<f32>;

    fn set(&self, option: DeviceOption, value: f32) -> Result<(), CaptureError>;
}
