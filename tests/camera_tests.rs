mod common;

use std::time::{Duration, Instant};

use common::{fed_camera, marked_pair, profile, wait_until, FPS, HEIGHT, WIDTH};
use depthcam::capture::{DeviceOption, SyntheticContext, SyntheticDevice};
use depthcam::pipeline::{AcquisitionState, AcquisitionStats, RING_DEPTH};
use depthcam::{CameraInterface, DepthCamera, FramePair};

const BOTH: &[DeviceOption] = &[DeviceOption::AutoExposure, DeviceOption::AutoWhiteBalance];

#[test]
fn test_no_device_leaves_camera_inert() {
    let camera = DepthCamera::open_with(SyntheticContext::empty(), WIDTH, HEIGHT, FPS);

    assert!(!camera.ok());
    assert_eq!(camera.error(), "No device connected.");
    assert_eq!(camera.state(), AcquisitionState::NotStarted);
    assert!(camera.rings().is_none());
    assert_eq!(camera.latest_depth_index(), -1);
    assert!(!camera.auto_exposure());
}

#[cfg(not(feature = "realsense"))]
#[test]
fn test_build_without_device_support() {
    let mut camera = DepthCamera::open(640, 480, 30);

    assert!(!camera.ok());
    assert_eq!(camera.error(), "compiled without device support");
    assert!(camera.frame_buffers().is_none());
    assert_eq!(camera.latest_color_index(), -1);
    assert_eq!(camera.stats(), AcquisitionStats::default());

    camera.set_auto_exposure(true);
    assert!(!camera.auto_exposure());
    camera.close();
}

#[test]
fn test_open_starts_streams_with_requested_profile() {
    let (camera, feed) = fed_camera(BOTH);

    assert!(camera.ok(), "{}", camera.error());
    assert_eq!(camera.error(), "");
    assert_eq!(feed.started_profile(), Some(profile()));
    assert_eq!(camera.latest_depth_index(), -1);
    assert_eq!(camera.latest_color_index(), -1);
}

#[test]
fn test_open_enables_auto_controls() {
    let (camera, _feed) = fed_camera(BOTH);

    assert!(camera.auto_exposure());
    assert!(camera.auto_white_balance());
}

#[test]
fn test_option_passthrough_when_supported() {
    let (camera, _feed) = fed_camera(BOTH);

    camera.set_auto_exposure(false);
    assert!(!camera.auto_exposure());
    camera.set_auto_exposure(true);
    assert!(camera.auto_exposure());

    camera.set_auto_white_balance(false);
    assert!(!camera.auto_white_balance());
}

#[test]
fn test_option_passthrough_when_unsupported() {
    let (camera, _feed) = fed_camera(&[DeviceOption::AutoWhiteBalance]);

    camera.set_auto_exposure(true);
    assert!(!camera.auto_exposure());
    assert!(camera.auto_white_balance());
}

#[test]
fn test_markers_survive_wraparound() {
    let (camera, feed) = fed_camera(BOTH);
    let cycles = RING_DEPTH as i64 + 2;

    for cycle in 0..cycles {
        assert!(feed.send(marked_pair(cycle as u8 + 1)));
    }
    assert!(wait_until(|| camera.latest_depth_index() == cycles - 1));
    assert_eq!(camera.latest_color_index(), cycles - 1);

    let ring = camera.depth_ring().unwrap();
    let oldest = cycles - RING_DEPTH as i64;
    let mut last_timestamp = 0;
    for index in oldest..cycles {
        let slot = ring.slot_at(index).unwrap();
        let marker = index as u8 + 1;
        assert!(slot.depth.iter().all(|&b| b == marker), "depth slot {index}");
        assert!(slot.color.iter().all(|&b| b == marker), "paired color slot {index}");
        assert!(slot.timestamp >= last_timestamp);
        assert_ne!(slot.timestamp, 0);
        last_timestamp = slot.timestamp;
    }

    let (_, color) = camera.color_ring().unwrap().latest().unwrap();
    assert!(color.pixels.iter().all(|&b| b == cycles as u8));
}

#[test]
fn test_held_view_does_not_stall_publication() {
    let (camera, feed) = fed_camera(BOTH);
    let ring = camera.depth_ring().unwrap();

    feed.send(marked_pair(1));
    assert!(wait_until(|| camera.latest_depth_index() == 0));
    let held = ring.slot_at(0).unwrap();

    let cycles = 3 * RING_DEPTH as i64;
    for cycle in 0..cycles {
        assert!(feed.send(marked_pair(cycle as u8 + 2)));
    }
    assert!(wait_until(|| camera.stats().depth_published == cycles as u64 + 1));

    assert!(camera.latest_depth_index() > cycles);
    assert_eq!(camera.stats().ring_contended, 0);
    assert!(held.depth.iter().all(|&b| b == 1));
    drop(held);

    let (_, newest) = ring.latest().unwrap();
    assert!(newest.depth.iter().all(|&b| b == cycles as u8 + 1));
}

#[test]
fn test_depth_skipped_until_color_published() {
    let (camera, feed) = fed_camera(BOTH);

    feed.send(FramePair::depth_only(vec![5u8; profile().depth_bytes()]));
    assert!(wait_until(|| camera.stats().depth_skipped == 1));
    assert_eq!(camera.latest_depth_index(), -1);

    feed.send(marked_pair(7));
    assert!(wait_until(|| camera.latest_depth_index() == 0));
    let (_, slot) = camera.depth_ring().unwrap().latest().unwrap();
    assert!(slot.depth.iter().all(|&b| b == 7));
}

#[test]
fn test_depth_pairs_with_newest_color() {
    let (camera, feed) = fed_camera(BOTH);
    let profile = profile();

    feed.send(FramePair::color_only(vec![3u8; profile.color_bytes()]));
    feed.send(FramePair::depth_only(vec![9u8; profile.depth_bytes()]));
    assert!(wait_until(|| camera.latest_depth_index() == 0));

    let (_, slot) = camera.depth_ring().unwrap().latest().unwrap();
    assert!(slot.color.iter().all(|&b| b == 3));
    assert!(slot.depth.iter().all(|&b| b == 9));
}

#[test]
fn test_wrong_sized_payload_is_dropped() {
    let (camera, feed) = fed_camera(BOTH);

    feed.send(FramePair::new(vec![1u8; 3], vec![1u8; 3]));
    assert!(wait_until(|| camera.stats().payload_rejected == 2));
    assert_eq!(camera.latest_color_index(), -1);
    assert!(camera.ok());
}

#[test]
fn test_driver_error_faults_acquisition() {
    let (camera, feed) = fed_camera(BOTH);

    feed.send(marked_pair(1));
    feed.fail("usb transfer failed");
    assert!(wait_until(|| camera.state() == AcquisitionState::Faulted));

    assert!(!camera.ok());
    assert!(camera.fault().unwrap().contains("usb transfer failed"));
    assert_eq!(camera.error(), "");
    // frames published before the fault stay readable
    assert_eq!(camera.latest_depth_index(), 0);
    assert!(camera.depth_ring().unwrap().latest().is_some());
}

#[test]
fn test_disconnect_faults_acquisition() {
    let (camera, feed) = fed_camera(BOTH);

    drop(feed);
    assert!(wait_until(|| camera.state() == AcquisitionState::Faulted));
    assert_eq!(camera.fault().as_deref(), Some("device disconnected"));
}

#[test]
fn test_close_is_idempotent_and_prompt() {
    let (mut camera, feed) = fed_camera(BOTH);
    feed.send(marked_pair(1));
    assert!(wait_until(|| camera.latest_depth_index() == 0));

    let started = Instant::now();
    camera.close();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(!camera.ok());
    assert_eq!(camera.state(), AcquisitionState::Stopped);
    assert!(camera.fault().is_none());
    assert!(camera.rings().is_none());
    assert_eq!(camera.latest_depth_index(), -1);

    camera.close();
    assert_eq!(camera.state(), AcquisitionState::Stopped);
}

#[test]
fn test_no_publish_after_close() {
    let (mut camera, feed) = fed_camera(BOTH);
    let rings = camera.rings().unwrap();

    feed.send(marked_pair(1));
    assert!(wait_until(|| rings.depth.latest_index() == 0));
    camera.close();

    // the stream went away with the acquisition thread
    assert!(!feed.send(marked_pair(2)));
    assert_eq!(rings.depth.latest_index(), 0);
    assert!(rings.depth.latest().is_some());
}

#[test]
fn test_device_gone_before_first_frame() {
    let (device, feed) = SyntheticDevice::fed("short-lived");
    drop(feed);
    let camera = DepthCamera::open_with(SyntheticContext::with_device(device), WIDTH, HEIGHT, FPS);

    assert_eq!(camera.error(), "");
    assert!(wait_until(|| camera.state() == AcquisitionState::Faulted));
}

#[test]
fn test_camera_interface_object() {
    fn newest(camera: &dyn CameraInterface) -> Option<i64> {
        let ring = camera.frame_buffers()?;
        let index = camera.latest_depth_index();
        ring.slot_at(index).map(|_| index)
    }

    let (camera, feed) = fed_camera(BOTH);
    assert_eq!(newest(&camera), None);

    feed.send(marked_pair(4));
    assert!(wait_until(|| newest(&camera) == Some(0)));
    assert!(CameraInterface::ok(&camera));
}
