//! Intel RealSense backend over librealsense2

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use realsense_rust::config::Config as Rs2Config;
use realsense_rust::context::Context;
use realsense_rust::device::Device;
use realsense_rust::frame::{ColorFrame, DepthFrame, FrameEx};
use realsense_rust::kind::{Rs2CameraInfo, Rs2Format, Rs2Option, Rs2StreamKind};
use realsense_rust::pipeline::{ActivePipeline, FrameWaitError, InactivePipeline};
use realsense_rust::sensor::Sensor;
use tracing::{info, warn};

use super::{DepthDevice, DeviceContext, DeviceOption, FramePair, FrameStream, SensorControl, StreamProfile};
use crate::error::CaptureError;

/// Owns a librealsense handle so it can move to the acquisition thread.
struct Handle<T>(T);

// SAFETY: rs2_context is thread-safe in librealsense2; the context is shared
// through an Arc by the adapter and the acquisition thread.
unsafe impl Send for Handle<Context> {}
unsafe impl Sync for Handle<Context> {}

// SAFETY: the pipeline is created on the acquisition thread and only ever
// used from the stream that owns it.
unsafe impl Send for Handle<ActivePipeline> {}

// SAFETY: the sensor lives behind the Mutex in `RealsenseSensor`, so one
// thread at a time calls into it.
unsafe impl Send for Handle<Sensor> {}

fn map_option(option: DeviceOption) -> Rs2Option {
    match option {
        DeviceOption::AutoExposure => Rs2Option::EnableAutoExposure,
        DeviceOption::AutoWhiteBalance => Rs2Option::EnableAutoWhiteBalance,
    }
}

pub struct RealsenseContext {
    context: Arc<Handle<Context>>,
}

impl RealsenseContext {
    pub fn new() -> Result<Self, CaptureError> {
        let context = Context::new().map_err(|e| CaptureError::Init(e.to_string()))?;
        Ok(Self {
            context: Arc::new(Handle(context)),
        })
    }
}

impl DeviceContext for RealsenseContext {
    fn query_devices(&mut self) -> Result<Vec<Box<dyn DepthDevice>>, CaptureError> {
        let devices = self.context.0.query_devices(HashSet::new());
        info!("Found {} RealSense device(s)", devices.len());
        Ok(devices
            .into_iter()
            .map(|device| Box::new(RealsenseDevice::new(Arc::clone(&self.context), device)) as Box<dyn DepthDevice>)
            .collect())
    }
}

fn camera_info(device: &Device, info: Rs2CameraInfo) -> Option<CString> {
    device.info(info).map(CStr::to_owned)
}

pub struct RealsenseDevice {
    context: Arc<Handle<Context>>,
    name: String,
    serial: Option<CString>,
    sensor: Arc<RealsenseSensor>,
}

impl RealsenseDevice {
    fn new(context: Arc<Handle<Context>>, device: Device) -> Self {
        let name = camera_info(&device, Rs2CameraInfo::Name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "RealSense".into());
        let serial = camera_info(&device, Rs2CameraInfo::SerialNumber);

        // options go through the first sensor of the device
        let sensor = device.sensors().into_iter().next().map(Handle);

        Self {
            context,
            name,
            serial,
            sensor: Arc::new(RealsenseSensor {
                sensor: Mutex::new(sensor),
            }),
        }
    }
}

impl DepthDevice for RealsenseDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sensor(&self) -> Arc<dyn SensorControl> {
        self.sensor.clone()
    }

    fn start(self: Box<Self>, profile: &StreamProfile) -> Result<Box<dyn FrameStream>, CaptureError> {
        let pipeline = InactivePipeline::try_from(&self.context.0).map_err(|e| CaptureError::Init(e.to_string()))?;

        let (width, height, fps) = (profile.width as usize, profile.height as usize, profile.fps as usize);
        let mut config = Rs2Config::new();
        if let Some(serial) = &self.serial {
            config
                .enable_device_from_serial(serial)
                .map_err(|e| CaptureError::Init(e.to_string()))?;
        }
        config
            .enable_stream(Rs2StreamKind::Color, None, width, height, Rs2Format::Rgb8, fps)
            .map_err(|e| CaptureError::Init(e.to_string()))?
            .enable_stream(Rs2StreamKind::Depth, None, width, height, Rs2Format::Z16, fps)
            .map_err(|e| CaptureError::Init(e.to_string()))?;

        let active = pipeline
            .start(Some(config))
            .map_err(|e| CaptureError::Init(e.to_string()))?;
        info!("RealSense pipeline started on {}", self.name);

        Ok(Box::new(RealsenseStream {
            pipeline: Some(Handle(active)),
            _context: self.context,
        }))
    }
}

struct RealsenseSensor {
    sensor: Mutex<Option<Handle<Sensor>>>,
}

impl SensorControl for RealsenseSensor {
    fn supports(&self, option: DeviceOption) -> bool {
        let sensor = self.sensor.lock().unwrap_or_else(PoisonError::into_inner);
        sensor
            .as_ref()
            .is_some_and(|s| s.0.supports_option(map_option(option)))
    }

    fn get(&self, option: DeviceOption) -> Option<f32> {
        let sensor = self.sensor.lock().unwrap_or_else(PoisonError::into_inner);
        sensor.as_ref().and_then(|s| s.0.get_option(map_option(option)))
    }

    fn set(&self, option: DeviceOption, value: f32) -> Result<(), CaptureError> {
        let mut sensor = self.sensor.lock().unwrap_or_else(PoisonError::into_inner);
        let sensor = sensor
            .as_mut()
            .ok_or_else(|| CaptureError::Option("device has no sensors".into()))?;
        sensor
            .0
            .set_option(map_option(option), value)
            .map_err(|e| CaptureError::Option(e.to_string()))
    }
}

fn copy_payload<F: FrameEx>(frame: &F) -> Bytes {
    let len = frame.get_data_size();
    // SAFETY: librealsense guarantees `get_data_size` readable bytes behind
    // `get_data` for as long as the frame is alive
    let data = unsafe {
        let ptr = frame.get_data() as *const c_void as *const u8;
        std::slice::from_raw_parts(ptr, len)
    };
    Bytes::copy_from_slice(data)
}

struct RealsenseStream {
    pipeline: Option<Handle<ActivePipeline>>,
    _context: Arc<Handle<Context>>,
}

impl FrameStream for RealsenseStream {
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<FramePair>, CaptureError> {
        let pipeline = self.pipeline.as_mut().ok_or(CaptureError::Disconnected)?;
        let frames = match pipeline.0.wait(Some(timeout)) {
            Ok(frames) => frames,
            Err(FrameWaitError::DidTimeoutBeforeFrameArrival) => return Ok(None),
            Err(e) => return Err(CaptureError::Stream(e.to_string())),
        };

        let color = frames.frames_of_type::<ColorFrame>().first().map(copy_payload);
        let depth = frames.frames_of_type::<DepthFrame>().first().map(copy_payload);
        if color.is_none() && depth.is_none() {
            warn!("Composite frame carried neither color nor depth");
        }
        Ok(Some(FramePair { color, depth }))
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _inactive = pipeline.0.stop();
            info!("RealSense pipeline stopped");
        }
    }
}
