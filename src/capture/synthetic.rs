//! Software depth camera for tests and for running the pipeline without hardware

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use super::{DepthDevice, DeviceContext, DeviceOption, FramePair, FrameStream, SensorControl, StreamProfile};
use crate::error::CaptureError;

/// Context holding zero or more synthetic devices.
///
/// Devices are handed out once; a second query finds nothing.
#[derive(Default)]
pub struct SyntheticContext {
    devices: Vec<SyntheticDevice>,
}

impl SyntheticContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_device(device: SyntheticDevice) -> Self {
        Self {
            devices: vec![device],
        }
    }
}

impl DeviceContext for SyntheticContext {
    fn query_devices(&mut self) -> Result<Vec<Box<dyn DepthDevice>>, CaptureError> {
        Ok(self
            .devices
            .drain(..)
            .map(|d| Box::new(d) as Box<dyn DepthDevice>)
            .collect())
    }
}

/// Option store with a fixed set of supported options
pub struct SyntheticSensor {
    supported: HashSet<DeviceOption>,
    values: Mutex<HashMap<DeviceOption, f32>>,
}

impl SyntheticSensor {
    fn new(supported: &[DeviceOption]) -> Self {
        Self {
            supported: supported.iter().copied().collect(),
            values: Mutex::new(HashMap::new()),
        }
    }
}

impl SensorControl for SyntheticSensor {
    fn supports(&self, option: DeviceOption) -> bool {
        self.supported.contains(&option)
    }

    fn get(&self, option: DeviceOption) -> Option<f32> {
        if !self.supports(option) {
            return None;
        }
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Some(values.get(&option).copied().unwrap_or(0.0))
    }

    fn set(&self, option: DeviceOption, value: f32) -> Result<(), CaptureError> {
        if !self.supports(option) {
            return Err(CaptureError::Option(format!("{option:?} not supported")));
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(option, value);
        Ok(())
    }
}

enum FeedEvent {
    Frame(FramePair),
    Fault(String),
}

enum Mode {
    Fed(Receiver<FeedEvent>),
    Pattern,
}

/// Synthetic device, either fed by a [`SyntheticFeed`] or generating a test pattern.
pub struct SyntheticDevice {
    name: String,
    sensor: Arc<SyntheticSensor>,
    mode: Mode,
    started: Arc<ArcSwapOption<StreamProfile>>,
}

impl SyntheticDevice {
    /// Device whose frames are pushed through the returned feed.
    ///
    /// Dropping the feed disconnects the device.
    pub fn fed(name: impl Into<String>) -> (Self, SyntheticFeed) {
        let (tx, rx) = flume::unbounded();
        let started = Arc::new(ArcSwapOption::empty());
        let device = Self {
            name: name.into(),
            sensor: Arc::new(SyntheticSensor::new(&[])),
            mode: Mode::Fed(rx),
            started: Arc::clone(&started),
        };
        (device, SyntheticFeed { tx, started })
    }

    /// Self-paced device producing a moving gradient and a depth ramp at the requested fps
    pub fn pattern(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sensor: Arc::new(SyntheticSensor::new(&[
                DeviceOption::AutoExposure,
                DeviceOption::AutoWhiteBalance,
            ])),
            mode: Mode::Pattern,
            started: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Replace the set of options the device claims to support
    pub fn with_options(mut self, options: &[DeviceOption]) -> Self {
        self.sensor = Arc::new(SyntheticSensor::new(options));
        self
    }
}

impl DepthDevice for SyntheticDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sensor(&self) -> Arc<dyn SensorControl> {
        self.sensor.clone()
    }

    fn start(self: Box<Self>, profile: &StreamProfile) -> Result<Box<dyn FrameStream>, CaptureError> {
        info!(
            "Starting synthetic device {}: {}x{} @ {} fps",
            self.name, profile.width, profile.height, profile.fps
        );
        self.started.store(Some(Arc::new(*profile)));

        Ok(match self.mode {
            Mode::Fed(rx) => Box::new(FedStream { rx }),
            Mode::Pattern => Box::new(PatternStream::new(*profile)),
        })
    }
}

/// Test handle for pushing frames into a fed [`SyntheticDevice`]
pub struct SyntheticFeed {
    tx: Sender<FeedEvent>,
    started: Arc<ArcSwapOption<StreamProfile>>,
}

impl SyntheticFeed {
    /// Queue a frame pair. Returns false once the stream is gone.
    pub fn send(&self, pair: FramePair) -> bool {
        self.tx.send(FeedEvent::Frame(pair)).is_ok()
    }

    /// Make the next wait fail with a driver-level error
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(FeedEvent::Fault(reason.into())).is_ok()
    }

    /// Profile the device was started with, if it has been started
    pub fn started_profile(&self) -> Option<StreamProfile> {
        self.started.load_full().map(|p| *p)
    }

    /// Frames queued but not yet taken by the stream
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

struct FedStream {
    rx: Receiver<FeedEvent>,
}

impl FrameStream for FedStream {
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<FramePair>, CaptureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(FeedEvent::Frame(pair)) => Ok(Some(pair)),
            Ok(FeedEvent::Fault(reason)) => Err(CaptureError::Stream(reason)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected),
        }
    }

    fn stop(&mut self) {
        debug!("Synthetic fed stream stopped");
    }
}

struct PatternStream {
    profile: StreamProfile,
    interval: Duration,
    next_frame: Instant,
    tick: u64,
}

impl PatternStream {
    fn new(profile: StreamProfile) -> Self {
        let interval = Duration::from_secs(1) / profile.fps.max(1);
        Self {
            profile,
            interval,
            next_frame: Instant::now() + interval,
            tick: 0,
        }
    }

    fn render(&self) -> FramePair {
        let (width, height) = (self.profile.width as usize, self.profile.height as usize);
        let shift = self.tick as usize;

        let mut color = Vec::with_capacity(self.profile.color_bytes());
        let mut depth = Vec::with_capacity(self.profile.depth_bytes());
        for y in 0..height {
            for x in 0..width {
                color.extend_from_slice(&[((x + shift) % 256) as u8, (y % 256) as u8, 128]);
                let millimeters = 500 + ((x + y + shift) % 1000) as u16;
                depth.extend_from_slice(&millimeters.to_le_bytes());
            }
        }

        FramePair::new(Bytes::from(color), Bytes::from(depth))
    }
}

impl FrameStream for PatternStream {
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<FramePair>, CaptureError> {
        let now = Instant::now();
        let wait = self.next_frame.saturating_duration_since(now);
        if wait > timeout {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        std::thread::sleep(wait);

        let pair = self.render();
        self.tick += 1;
        self.next_frame += self.interval;
        Ok(Some(pair))
    }

    fn stop(&mut self) {
        debug!("Synthetic pattern stream stopped after {} frames", self.tick);
    }
}
