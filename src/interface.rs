use crate::pipeline::DepthRing;

/// Generic camera surface consumed by the downstream visual pipeline.
///
/// Consumers find the newest depth+color pair through
/// [`latest_depth_index`](CameraInterface::latest_depth_index) and read it
/// from [`frame_buffers`](CameraInterface::frame_buffers).
pub trait CameraInterface {
    fn ok(&self) -> bool;

    fn error(&self) -> &str;

    fn set_auto_exposure(&self, enabled: bool);

    fn set_auto_white_balance(&self, enabled: bool);

    /// -1 until the first pair is published
    fn latest_depth_index(&self) -> i64;

    fn frame_buffers(&self) -> Option<&DepthRing>;
}
