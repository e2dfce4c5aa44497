pub mod acquisition;
pub mod ringbuf;

pub use acquisition::{Acquisition, AcquisitionState, AcquisitionStats, CycleOutcome};
pub use ringbuf::{ColorRing, ColorSlot, DepthRing, DepthSlot, FrameRing, FrameRings, RingStats, SlotRef, RING_DEPTH};
