//! Depth camera adapter: binds one device, owns the rings and the acquisition task

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::capture::{DeviceContext, DeviceOption, SensorControl, StreamProfile};
use crate::error::CaptureError;
use crate::interface::CameraInterface;
use crate::pipeline::{Acquisition, AcquisitionState, AcquisitionStats, ColorRing, DepthRing, FrameRings};
use crate::{AcquisitionConfig, CameraConfig};

/// Adapter over a single depth camera.
///
/// Construction never fails outright: when no device can be bound the
/// adapter stays inert, `ok()` is false and `error()` says why.
pub struct DepthCamera {
    profile: StreamProfile,
    error_text: String,
    sensor: Option<Arc<dyn SensorControl>>,
    rings: Option<Arc<FrameRings>>,
    acquisition: Option<Acquisition>,
}

impl DepthCamera {
    /// Open the first device of the compiled-in backend
    pub fn open(width: u32, height: u32, fps: u32) -> Self {
        #[cfg(feature = "realsense")]
        {
            match crate::capture::RealsenseContext::new() {
                Ok(context) => Self::open_with(context, width, height, fps),
                Err(e) => Self::failed(StreamProfile::new(width, height, fps), e),
            }
        }
        #[cfg(not(feature = "realsense"))]
        {
            Self::failed(StreamProfile::new(width, height, fps), CaptureError::Unsupported)
        }
    }

    /// Open the first device found in `context`
    pub fn open_with<C: DeviceContext>(context: C, width: u32, height: u32, fps: u32) -> Self {
        let camera = CameraConfig {
            width,
            height,
            fps,
            ..CameraConfig::default()
        };
        Self::with_config(context, &camera, &AcquisitionConfig::default())
    }

    #[instrument(skip(context))]
    pub fn with_config<C: DeviceContext>(
        mut context: C,
        camera: &CameraConfig,
        acquisition: &AcquisitionConfig,
    ) -> Self {
        let profile = camera.profile();
        match Self::bind(&mut context, profile, camera, acquisition) {
            Ok((sensor, rings, acquisition)) => {
                info!(
                    "Depth camera running: {}x{} @ {} fps",
                    profile.width, profile.height, profile.fps
                );
                Self {
                    profile,
                    error_text: String::new(),
                    sensor: Some(sensor),
                    rings: Some(rings),
                    acquisition: Some(acquisition),
                }
            }
            Err(e) => Self::failed(profile, e),
        }
    }

    fn failed(profile: StreamProfile, error: CaptureError) -> Self {
        warn!("Depth camera unavailable: {error}");
        Self {
            profile,
            error_text: error.to_string(),
            sensor: None,
            rings: None,
            acquisition: None,
        }
    }

    fn bind<C: DeviceContext>(
        context: &mut C,
        profile: StreamProfile,
        camera: &CameraConfig,
        config: &AcquisitionConfig,
    ) -> Result<(Arc<dyn SensorControl>, Arc<FrameRings>, Acquisition), CaptureError> {
        let device = context
            .query_devices()?
            .into_iter()
            .next()
            .ok_or(CaptureError::NoDevice)?;
        info!("Binding device: {}", device.name());

        let sensor = device.sensor();
        set_option(sensor.as_ref(), DeviceOption::AutoExposure, camera.auto_exposure);
        set_option(sensor.as_ref(), DeviceOption::AutoWhiteBalance, camera.auto_white_balance);

        let rings = Arc::new(FrameRings::new(&profile));
        let acquisition = Acquisition::spawn(device, profile, Arc::clone(&rings), config)?;
        Ok((sensor, rings, acquisition))
    }

    /// True while initialization has succeeded and the acquisition task is running
    pub fn ok(&self) -> bool {
        self.state() == AcquisitionState::Running
    }

    /// Initialization failure reason, empty when initialization succeeded
    pub fn error(&self) -> &str {
        &self.error_text
    }

    /// Reason the acquisition task stopped on its own, if it did
    pub fn fault(&self) -> Option<String> {
        self.acquisition.as_ref().and_then(Acquisition::fault)
    }

    pub fn state(&self) -> AcquisitionState {
        self.acquisition
            .as_ref()
            .map(Acquisition::state)
            .unwrap_or(AcquisitionState::NotStarted)
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.acquisition
            .as_ref()
            .map(Acquisition::stats)
            .unwrap_or_default()
    }

    pub fn profile(&self) -> StreamProfile {
        self.profile
    }

    /// Stop the acquisition task, wait for it, then release the rings.
    ///
    /// Safe to call more than once and on an adapter that failed to open.
    pub fn close(&mut self) {
        if let Some(acquisition) = self.acquisition.as_mut() {
            acquisition.stop();
        }
        if self.rings.take().is_some() {
            info!("Depth camera closed");
        }
        self.sensor = None;
    }

    /// Shared handle to both rings, for readers on other threads
    pub fn rings(&self) -> Option<Arc<FrameRings>> {
        self.rings.clone()
    }

    pub fn color_ring(&self) -> Option<&ColorRing> {
        self.rings.as_deref().map(|rings| &rings.color)
    }

    pub fn depth_ring(&self) -> Option<&DepthRing> {
        self.rings.as_deref().map(|rings| &rings.depth)
    }

    pub fn latest_color_index(&self) -> i64 {
        self.color_ring().map_or(-1, ColorRing::latest_index)
    }

    pub fn latest_depth_index(&self) -> i64 {
        self.depth_ring().map_or(-1, DepthRing::latest_index)
    }

    pub fn set_auto_exposure(&self, enabled: bool) {
        if let Some(sensor) = &self.sensor {
            set_option(sensor.as_ref(), DeviceOption::AutoExposure, enabled);
        }
    }

    pub fn set_auto_white_balance(&self, enabled: bool) {
        if let Some(sensor) = &self.sensor {
            set_option(sensor.as_ref(), DeviceOption::AutoWhiteBalance, enabled);
        }
    }

    pub fn auto_exposure(&self) -> bool {
        self.get_option(DeviceOption::AutoExposure)
    }

    pub fn auto_white_balance(&self) -> bool {
        self.get_option(DeviceOption::AutoWhiteBalance)
    }

    fn get_option(&self, option: DeviceOption) -> bool {
        self.sensor
            .as_ref()
            .filter(|sensor| sensor.supports(option))
            .and_then(|sensor| sensor.get(option))
            .is_some_and(|value| value != 0.0)
    }
}

fn set_option(sensor: &dyn SensorControl, option: DeviceOption, enabled: bool) {
    if !sensor.supports(option) {
        return;
    }
    if let Err(e) = sensor.set(option, if enabled { 1.0 } else { 0.0 }) {
        debug!("Setting {option:?} failed: {e}");
    }
}

impl CameraInterface for DepthCamera {
    fn ok(&self) -> bool {
        DepthCamera::ok(self)
    }

    fn error(&self) -> &str {
        DepthCamera::error(self)
    }

    fn set_auto_exposure(&self, enabled: bool) {
        DepthCamera::set_auto_exposure(self, enabled)
    }

    fn set_auto_white_balance(&self, enabled: bool) {
        DepthCamera::set_auto_white_balance(self, enabled)
    }

    fn latest_depth_index(&self) -> i64 {
        DepthCamera::latest_depth_index(self)
    }

    fn frame_buffers(&self) -> Option<&DepthRing> {
        self.depth_ring()
    }
}

impl Drop for DepthCamera {
    fn drop(&mut self) {
        self.close();
    }
}
