//! Fixed-depth frame rings with an atomic "latest" cursor

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, TryLockError};

use crossbeam::utils::CachePadded;

use crate::capture::StreamProfile;

/// Number of slots in each ring
pub const RING_DEPTH: usize = 10;

/// One color frame: width×height×3 bytes of RGB8
#[derive(Debug, Clone)]
pub struct ColorSlot {
    pub pixels: Box<[u8]>,
    /// Capture time in milliseconds since the UNIX epoch
    pub timestamp: i64,
}

impl ColorSlot {
    pub fn zeroed(bytes: usize) -> Self {
        Self {
            pixels: vec![0u8; bytes].into_boxed_slice(),
            timestamp: 0,
        }
    }
}

/// One depth frame (width×height×2 bytes of Z16) with the color frame that
/// was newest when the depth arrived
#[derive(Debug, Clone)]
pub struct DepthSlot {
    pub depth: Box<[u8]>,
    pub color: Box<[u8]>,
    /// Capture time in milliseconds since the UNIX epoch
    pub timestamp: i64,
}

impl DepthSlot {
    pub fn zeroed(depth_bytes: usize, color_bytes: usize) -> Self {
        Self {
            depth: vec![0u8; depth_bytes].into_boxed_slice(),
            color: vec![0u8; color_bytes].into_boxed_slice(),
            timestamp: 0,
        }
    }

    /// Depth samples decoded from the little-endian byte buffer
    pub fn depth_values(&self) -> impl Iterator<Item = u16> + '_ {
        self.depth
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }
}

pub type SlotRef<'a, T> = RwLockReadGuard<'a, T>;

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

/// Publication counters of one ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub published: u64,
    /// Slots passed over because a reader still held them
    pub skipped: u64,
    /// Writes dropped because a reader held every slot
    pub dropped: u64,
}

/// Single-writer ring of preallocated slots.
///
/// The cursor starts at -1 and is advanced only after a slot is fully
/// written, so `cursor mod depth` always names the newest complete slot.
/// A slot still held by a reader is passed over and the cursor jumps past
/// it, so `latest_index() + 1 == published + skipped`.
pub struct FrameRing<T> {
    slots: Box<[RwLock<T>]>,
    cursor: CachePadded<AtomicI64>,
    stats: CachePadded<Stats>,
}

impl<T> FrameRing<T> {
    /// Ring of `depth` slots built by `make`; a depth of zero is raised to one.
    pub fn from_fn(depth: usize, mut make: impl FnMut() -> T) -> Self {
        let depth = depth.max(1);
        Self {
            slots: (0..depth).map(|_| RwLock::new(make())).collect(),
            cursor: CachePadded::new(AtomicI64::new(-1)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Cursor of the newest published slot, -1 if nothing was published yet
    pub fn latest_index(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    fn position(&self, index: i64) -> usize {
        index.rem_euclid(self.slots.len() as i64) as usize
    }

    /// Read-only view of the slot at `index mod depth`.
    ///
    /// Never blocks. Returns `None` for a negative index or when the writer
    /// is rewriting that slot, which only happens to a reader more than
    /// `depth - 1` publishes behind. Copy the contents out instead of holding
    /// the view: while it is held the writer passes over this slot, and the
    /// index it would have received is never published.
    pub fn slot_at(&self, index: i64) -> Option<SlotRef<'_, T>> {
        if index < 0 {
            return None;
        }
        match self.slots[self.position(index)].try_read() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Newest published slot together with its cursor value
    pub fn latest(&self) -> Option<(i64, SlotRef<'_, T>)> {
        let index = self.latest_index();
        self.slot_at(index).map(|slot| (index, slot))
    }

    /// Fill the first free slot after the cursor and publish it.
    ///
    /// Slots held by readers are passed over. Returns the new cursor, or
    /// `None` when readers hold every slot. Must only be called from the
    /// single writer.
    pub(crate) fn write_next(&self, fill: impl FnOnce(&mut T)) -> Option<i64> {
        let cursor = self.cursor.load(Ordering::Relaxed);
        for offset in 1..=self.slots.len() as i64 {
            let next = cursor + offset;
            let mut guard = match self.slots[self.position(next)].try_write() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            fill(&mut *guard);
            drop(guard);

            self.cursor.store(next, Ordering::Release);
            self.stats.published.fetch_add(1, Ordering::Relaxed);
            self.stats.skipped.fetch_add((offset - 1) as u64, Ordering::Relaxed);
            return Some(next);
        }

        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            published: self.stats.published.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

pub type ColorRing = FrameRing<ColorSlot>;
pub type DepthRing = FrameRing<DepthSlot>;

/// Both rings of a session, allocated once for a stream profile
pub struct FrameRings {
    pub color: ColorRing,
    pub depth: DepthRing,
}

impl FrameRings {
    pub fn new(profile: &StreamProfile) -> Self {
        Self::with_depth(profile, RING_DEPTH)
    }

    pub fn with_depth(profile: &StreamProfile, depth: usize) -> Self {
        let color_bytes = profile.color_bytes();
        let depth_bytes = profile.depth_bytes();
        Self {
            color: FrameRing::from_fn(depth, || ColorSlot::zeroed(color_bytes)),
            depth: FrameRing::from_fn(depth, || DepthSlot::zeroed(depth_bytes, color_bytes)),
        }
    }

    /// Copy of the newest depth+color pair
    pub fn snapshot_depth(&self) -> Option<(i64, DepthSlot)> {
        self.depth.latest().map(|(index, slot)| (index, DepthSlot::clone(&slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> FrameRing<ColorSlot> {
        FrameRing::from_fn(RING_DEPTH, || ColorSlot::zeroed(4))
    }

    #[test]
    fn starts_unpublished() {
        let ring = ring();
        assert_eq!(ring.latest_index(), -1);
        assert!(ring.latest().is_none());
        assert!(ring.slot_at(-1).is_none());
    }

    #[test]
    fn cursor_advances_once_per_publish() {
        let ring = ring();
        for round in 0..3 {
            let before = ring.latest_index();
            for _ in 0..RING_DEPTH {
                ring.write_next(|slot| slot.timestamp = 1).unwrap();
            }
            assert_eq!(ring.latest_index(), before + RING_DEPTH as i64, "round {round}");
        }
        assert_eq!(
            ring.stats(),
            RingStats {
                published: 3 * RING_DEPTH as u64,
                ..RingStats::default()
            }
        );
    }

    #[test]
    fn index_wraps_at_ring_depth() {
        let ring = ring();
        for i in 0..(RING_DEPTH as i64 + 3) {
            ring.write_next(|slot| {
                slot.pixels[0] = i as u8;
                slot.timestamp = 100 + i;
            });
        }
        let (index, slot) = ring.latest().unwrap();
        assert_eq!(index, RING_DEPTH as i64 + 2);
        assert_eq!(slot.pixels[0], index as u8);
        drop(slot);

        // index 12 and index 2 name the same slot
        assert_eq!(ring.slot_at(2).unwrap().timestamp, 100 + index);
    }

    #[test]
    fn held_slot_does_not_stall_writer() {
        let ring = ring();
        for _ in 0..RING_DEPTH {
            ring.write_next(|slot| slot.timestamp = 7);
        }
        // cursor is 9, position 0 stays held for many laps
        let held = ring.slot_at(0).unwrap();
        let mut last = ring.latest_index();
        for _ in 0..50 {
            let index = ring.write_next(|slot| slot.timestamp = 8).unwrap();
            assert!(index > last);
            assert_ne!(index.rem_euclid(RING_DEPTH as i64), 0);
            last = index;
        }
        assert_eq!(held.timestamp, 7);

        let stats = ring.stats();
        assert_eq!(stats.published, RING_DEPTH as u64 + 50);
        assert_eq!(stats.dropped, 0);
        assert!(stats.skipped >= 5);
        assert_eq!(ring.latest_index() + 1, (stats.published + stats.skipped) as i64);
        drop(held);

        let next = ring.write_next(|slot| slot.timestamp = 9).unwrap();
        assert_eq!(next, last + 1);
    }

    #[test]
    fn write_dropped_when_every_slot_is_held() {
        let ring = FrameRing::from_fn(2, || ColorSlot::zeroed(4));
        ring.write_next(|slot| slot.timestamp = 1);
        ring.write_next(|slot| slot.timestamp = 2);

        let first = ring.slot_at(0).unwrap();
        let second = ring.slot_at(1).unwrap();
        assert!(ring.write_next(|slot| slot.timestamp = 3).is_none());
        assert_eq!(ring.latest_index(), 1);
        assert_eq!(ring.stats().dropped, 1);
        assert_eq!(ring.stats().skipped, 0);
        drop((first, second));

        assert_eq!(ring.write_next(|slot| slot.timestamp = 3), Some(2));
    }

    #[test]
    fn zero_depth_is_raised_to_one() {
        let ring = FrameRing::from_fn(0, || ColorSlot::zeroed(4));
        assert_eq!(ring.depth(), 1);
        assert_eq!(ring.write_next(|slot| slot.timestamp = 1), Some(0));
        assert_eq!(ring.write_next(|slot| slot.timestamp = 2), Some(1));
        assert_eq!(ring.latest().unwrap().1.timestamp, 2);
    }

    #[test]
    fn depth_values_decode_little_endian() {
        let mut slot = DepthSlot::zeroed(4, 6);
        slot.depth.copy_from_slice(&[0x34, 0x12, 0xff, 0x00]);
        assert_eq!(slot.depth_values().collect::<Vec<_>>(), vec![0x1234, 0x00ff]);
    }

    #[test]
    fn rings_are_sized_from_profile() {
        let rings = FrameRings::new(&StreamProfile::new(4, 2, 30));
        assert_eq!(rings.color.depth(), RING_DEPTH);
        assert_eq!(rings.color.slot_at(0).unwrap().pixels.len(), 24);
        let depth = rings.depth.slot_at(0).unwrap();
        assert_eq!(depth.depth.len(), 16);
        assert_eq!(depth.color.len(), 24);
    }
}
