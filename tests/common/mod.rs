#![allow(dead_code)]

use std::time::{Duration, Instant};

use depthcam::capture::{DeviceOption, SyntheticContext, SyntheticDevice, SyntheticFeed};
use depthcam::{DepthCamera, FramePair, StreamProfile};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 4;
pub const FPS: u32 = 30;

pub fn profile() -> StreamProfile {
    StreamProfile::new(WIDTH, HEIGHT, FPS)
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Camera bound to a fed synthetic device supporting `options`
pub fn fed_camera(options: &[DeviceOption]) -> (DepthCamera, SyntheticFeed) {
    let (device, feed) = SyntheticDevice::fed("fed");
    let device = device.with_options(options);
    let camera = DepthCamera::open_with(SyntheticContext::with_device(device), WIDTH, HEIGHT, FPS);
    (camera, feed)
}

/// Pair whose color and depth bytes are all `marker`
pub fn marked_pair(marker: u8) -> FramePair {
    let profile = profile();
    FramePair::new(vec![marker; profile.color_bytes()], vec![marker; profile.depth_bytes()])
}
