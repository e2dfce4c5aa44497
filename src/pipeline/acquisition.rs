//! Background acquisition task: device → color ring → depth ring

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, warn};

use super::ringbuf::FrameRings;
use crate::capture::{DepthDevice, FramePair, FrameStream, StreamProfile};
use crate::error::CaptureError;
use crate::utils::now_millis;
use crate::AcquisitionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
    /// The device wait failed; no further frames will publish
    Faulted = 3,
}

impl AcquisitionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::Faulted,
            _ => Self::NotStarted,
        }
    }
}

/// Counters since the session started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub color_published: u64,
    pub depth_published: u64,
    /// Depth frames dropped because no color frame was published yet
    pub depth_skipped: u64,
    /// Payloads dropped for having the wrong byte length
    pub payload_rejected: u64,
    /// Publishes dropped because readers held every slot of the ring
    pub ring_contended: u64,
}

#[derive(Default)]
struct Counters {
    color_published: AtomicU64,
    depth_published: AtomicU64,
    depth_skipped: AtomicU64,
    payload_rejected: AtomicU64,
    ring_contended: AtomicU64,
}

/// State visible to both the acquisition thread and the adapter
pub(crate) struct Shared {
    state: AtomicU8,
    fault: ArcSwapOption<String>,
    counters: CachePadded<Counters>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(AcquisitionState::NotStarted as u8),
            fault: ArcSwapOption::empty(),
            counters: CachePadded::new(Counters::default()),
        }
    }

    fn set_state(&self, state: AcquisitionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn record_fault(&self, reason: String) {
        self.fault.store(Some(Arc::new(reason)));
        self.set_state(AcquisitionState::Faulted);
    }

    fn stats(&self) -> AcquisitionStats {
        let c = &self.counters;
        AcquisitionStats {
            color_published: c.color_published.load(Ordering::Relaxed),
            depth_published: c.depth_published.load(Ordering::Relaxed),
            depth_skipped: c.depth_skipped.load(Ordering::Relaxed),
            payload_rejected: c.payload_rejected.load(Ordering::Relaxed),
            ring_contended: c.ring_contended.load(Ordering::Relaxed),
        }
    }
}

/// What one cycle published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// New color cursor, if a color frame was published
    pub color: Option<i64>,
    /// New depth cursor, if a depth frame was published
    pub depth: Option<i64>,
    pub depth_skipped: bool,
}

/// Writes one frame pair into the rings (loop steps 2-5).
///
/// Only one publisher may exist per `FrameRings`.
pub(crate) struct Publisher {
    rings: Arc<FrameRings>,
    profile: StreamProfile,
    shared: Arc<Shared>,
}

impl Publisher {
    pub(crate) fn new(rings: Arc<FrameRings>, profile: StreamProfile, shared: Arc<Shared>) -> Self {
        Self {
            rings,
            profile,
            shared,
        }
    }

    fn reject(&self, kind: &str, expected: usize, actual: usize) {
        warn!("Rejected {kind} payload: expected {expected} bytes, got {actual}");
        self.shared.counters.payload_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depthcam_payload_rejected_total").increment(1);
    }

    fn contended(&self, kind: &str) {
        warn!("Dropped {kind} frame: readers hold every slot");
        self.shared.counters.ring_contended.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depthcam_ring_contended_total").increment(1);
    }

    pub(crate) fn publish(&self, pair: &FramePair) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        let counters = &self.shared.counters;

        if let Some(color) = &pair.color {
            let expected = self.profile.color_bytes();
            if color.len() != expected {
                self.reject("color", expected, color.len());
            } else {
                let timestamp = now_millis();
                outcome.color = self.rings.color.write_next(|slot| {
                    slot.pixels.copy_from_slice(color);
                    slot.timestamp = timestamp;
                });
                match outcome.color {
                    Some(_) => {
                        counters.color_published.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("depthcam_color_frames_total").increment(1);
                    }
                    None => self.contended("color"),
                }
            }
        }

        if let Some(depth) = &pair.depth {
            let expected = self.profile.depth_bytes();
            if depth.len() != expected {
                self.reject("depth", expected, depth.len());
                return outcome;
            }

            // every depth slot carries the newest color frame
            let Some((_, color)) = self.rings.color.latest() else {
                debug!("No color frame published yet, skipping depth");
                outcome.depth_skipped = true;
                counters.depth_skipped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("depthcam_depth_skipped_total").increment(1);
                return outcome;
            };

            let timestamp = now_millis();
            outcome.depth = self.rings.depth.write_next(|slot| {
                slot.depth.copy_from_slice(depth);
                slot.color.copy_from_slice(&color.pixels);
                slot.timestamp = timestamp;
            });
            match outcome.depth {
                Some(_) => {
                    counters.depth_published.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("depthcam_depth_frames_total").increment(1);
                }
                None => self.contended("depth"),
            }
        }

        outcome
    }
}

fn pin_to_core(index: usize) {
    let core = core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|c| c.id == index));
    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            info!("Acquisition thread pinned to core {index}")
        }
        _ => warn!("Could not pin acquisition thread to core {index}"),
    }
}

fn run_loop(stream: &mut dyn FrameStream, publisher: &Publisher, cancel: &AtomicBool, timeout: Duration) {
    info!("Acquisition loop running");
    while !cancel.load(Ordering::Acquire) {
        match stream.wait_for_frames(timeout) {
            Ok(Some(pair)) => {
                let outcome = publisher.publish(&pair);
                debug!(?outcome, "Cycle complete");
            }
            Ok(None) => continue,
            Err(e) => {
                error!("Acquisition fault: {e}");
                publisher.shared.record_fault(e.to_string());
                return;
            }
        }
    }
    info!("Acquisition loop cancelled");
}

/// Handle to the running acquisition thread.
///
/// `stop` (or drop) signals the thread and joins it; the rings outlive it.
pub struct Acquisition {
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Start the device stream on a dedicated thread and begin publishing.
    ///
    /// Returns once the device stream has started (or failed to).
    #[instrument(skip_all, fields(device = %device.name()))]
    pub fn spawn(
        device: Box<dyn DepthDevice>,
        profile: StreamProfile,
        rings: Arc<FrameRings>,
        config: &AcquisitionConfig,
    ) -> Result<Self, CaptureError> {
        let shared = Arc::new(Shared::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = Publisher::new(rings, profile, Arc::clone(&shared));
        let timeout = config.poll_timeout();
        let cpu_core = config.cpu_core;

        let (init_tx, init_rx) = flume::bounded::<Result<(), CaptureError>>(1);

        let handle = thread::Builder::new().name(config.thread_name.clone()).spawn({
            let cancel = Arc::clone(&cancel);
            move || {
                if let Some(core) = cpu_core {
                    pin_to_core(core);
                }

                // the stream is started on this thread; some drivers tie it to the starting thread
                let mut stream = match device.start(&profile) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                publisher.shared.set_state(AcquisitionState::Running);
                let _ = init_tx.send(Ok(()));

                run_loop(stream.as_mut(), &publisher, &cancel, timeout);
                stream.stop();

                if publisher.shared.state() == AcquisitionState::Running {
                    publisher.shared.set_state(AcquisitionState::Stopped);
                }
            }
        })?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                cancel,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Init("acquisition thread exited during start".into()))
            }
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state()
    }

    pub fn fault(&self) -> Option<String> {
        self.shared.fault.load_full().map(|reason| reason.as_ref().clone())
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.shared.stats()
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.store(true, Ordering::Release);
        if handle.join().is_err() {
            self.shared.record_fault("acquisition thread panicked".into());
        }
        if self.shared.state() == AcquisitionState::Running {
            self.shared.set_state(AcquisitionState::Stopped);
        }
        info!("Acquisition stopped in state {:?}", self.shared.state());
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}
