// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides a frame pool that allocates and releases contiguous runs
//! of physical memory frames, tracked with a two-bit state map.

use crate::registry::FramePoolRegistry;
use crate::{needed_info_frames, MAX_POOL_FRAMES};
use alloc::sync::Arc;
use core::slice;
use memory::{
    PhysFrame, PhysFrameAllocator, PhysFrameDeallocator, PhysFrameRange, PhysMapper,
};
use spin::Mutex;

/// The allocation state of a single frame in a pool.
///
/// A sequence of allocated frames is recorded as a head followed by
/// zero or more used frames, terminated by a free frame, another
/// head, or the end of the pool. Recording the head is what lets a
/// sequence be released knowing only its first frame.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameState {
    /// The frame is available for allocation.
    Free,

    /// The frame is allocated, as part of the sequence begun by the
    /// nearest preceding head frame.
    Used,

    /// The frame is allocated and is the first frame of a sequence.
    HeadOfSequence,
}

impl FrameState {
    /// Returns the two-bit cell value encoding this state.
    ///
    const fn to_cell(self) -> u8 {
        match self {
            FrameState::Free => 0b00,
            FrameState::Used => 0b11,
            FrameState::HeadOfSequence => 0b10,
        }
    }

    /// Returns the state encoded by a two-bit cell value.
    ///
    fn from_cell(cell: u8) -> Self {
        match cell {
            0b00 => FrameState::Free,
            0b11 => FrameState::Used,
            0b10 => FrameState::HeadOfSequence,
            _ => panic!("corrupt frame state map: cell value {:#04b}", cell),
        }
    }
}

/// Where a pool's two-bit state map is stored.
///
#[derive(Clone, Copy)]
pub enum MapPlacement {
    /// The map occupies the first frame(s) of the pool itself, which
    /// are marked as an allocated sequence at construction and never
    /// handed out.
    InBand,

    /// The map occupies the given frame, which must lie outside the
    /// pool. The caller keeps that frame alive for the pool's
    /// lifetime.
    Frame(PhysFrame),
}

/// A pool of contiguous physical memory frames.
///
/// The pool allocates runs of consecutive frames with a first-fit
/// search and releases them given only the first frame of a run. Its
/// state map lives in physical memory (see [`MapPlacement`]) and is
/// reached through the pool's [`PhysMapper`].
///
pub struct FramePool {
    // The frames managed by this pool.
    frames: PhysFrameRange,

    // The number of frames currently free. There is no guarantee
    // that the free frames are consecutive.
    free_frames: usize,

    // The two-bit state map, one cell per frame, indexed relative
    // to the start of the pool.
    map: *mut u8,
    map_bytes: usize,

    // Keeps the translation backing `map` alive.
    _mapper: Arc<dyn PhysMapper>,
}

// The map pointer refers to frames this pool exclusively owns.
unsafe impl Send for FramePool {}

impl FramePool {
    /// Creates a pool managing the `count` frames starting at `base`
    /// and registers it with `registry`.
    ///
    /// All frames start out free, except that with
    /// [`MapPlacement::InBand`] the frames holding the state map are
    /// marked as an allocated sequence so they are never handed out.
    ///
    /// # Panics
    ///
    /// `new` will panic if `count` is zero or exceeds
    /// [`MAX_POOL_FRAMES`], or if an external map frame lies inside
    /// the pool.
    ///
    pub fn new(
        base: PhysFrame,
        count: usize,
        placement: MapPlacement,
        mapper: Arc<dyn PhysMapper>,
        registry: &FramePoolRegistry,
    ) -> Arc<Mutex<FramePool>> {
        if count == 0 {
            panic!("cannot create an empty frame pool");
        }
        if count > MAX_POOL_FRAMES {
            panic!(
                "cannot create a pool of {} frames: the state map must fit in one frame ({} frames)",
                count, MAX_POOL_FRAMES
            );
        }

        let frames = base.range(count);
        let map_frame = match placement {
            MapPlacement::InBand => base,
            MapPlacement::Frame(frame) => {
                if frames.contains(frame) {
                    panic!(
                        "external map frame {:?} lies inside the pool {:?}",
                        frame, frames
                    );
                }

                frame
            }
        };

        let map_bytes = dibits::bytes_for(count);
        let map = mapper.phys_to_virt(map_frame.start_address(), map_bytes);

        // All cells to Free.
        unsafe { map.write_bytes(0, map_bytes) };

        let mut pool = FramePool {
            frames,
            free_frames: count,
            map,
            map_bytes,
            _mapper: mapper,
        };

        if let MapPlacement::InBand = placement {
            // The map frames are part of the pool; reserve them as an
            // ordinary allocated sequence.
            pool.mark_inaccessible(base, needed_info_frames(count));
        }

        log::debug!(
            "initialised frame pool over {:?} with {} free frames",
            pool.frames,
            pool.free_frames
        );

        let pool = Arc::new(Mutex::new(pool));
        registry.register(pool.clone());

        pool
    }

    /// Returns the first frame managed by the pool.
    ///
    pub fn base(&self) -> PhysFrame {
        self.frames.start()
    }

    /// Returns the number of frames managed by the pool.
    ///
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames currently free.
    ///
    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    /// Returns whether the pool manages the given frame.
    ///
    pub fn contains(&self, frame: PhysFrame) -> bool {
        self.frames.contains(frame)
    }

    /// Returns the recorded state of the given frame.
    ///
    /// # Panics
    ///
    /// `frame_state` will panic if the frame is not managed by this
    /// pool.
    ///
    pub fn frame_state(&self, frame: PhysFrame) -> FrameState {
        self.state(self.index_of(frame))
    }

    /// Allocates a run of `count` consecutive frames, returning the
    /// first frame of the run, or `None` if no run of free frames is
    /// long enough.
    ///
    /// The search is first-fit: the lowest-numbered qualifying run
    /// wins. The first frame of the run is marked as the head of the
    /// sequence and the remainder as used.
    ///
    pub fn get_frames(&mut self, count: usize) -> Option<PhysFrame> {
        if count == 0 || count > self.free_frames {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..self.num_frames() {
            if self.state(index) == FrameState::Free {
                if run_len == 0 {
                    run_start = index;
                }

                run_len += 1;
                if run_len == count {
                    self.mark_run(run_start, count);
                    return Some(PhysFrame::from_number(
                        self.base().number() + run_start as u32,
                    ));
                }
            } else {
                run_len = 0;
            }
        }

        None
    }

    /// Marks the `count` frames starting at `first` as an allocated
    /// sequence, without searching. This is used during boot to
    /// reserve regions that must never be handed out, such as the
    /// memory holding the kernel image.
    ///
    /// # Panics
    ///
    /// `mark_inaccessible` will panic if any of the frames lies
    /// outside the pool or is not currently free.
    ///
    pub fn mark_inaccessible(&mut self, first: PhysFrame, count: usize) {
        let start = self.index_of(first);
        if start + count > self.num_frames() {
            panic!(
                "cannot reserve {} frames at {:?}: range leaves the pool {:?}",
                count, first, self.frames
            );
        }

        for index in start..start + count {
            if self.state(index) != FrameState::Free {
                panic!(
                    "cannot reserve frame {}: frame is already allocated",
                    self.base().number() + index as u32
                );
            }
        }

        self.mark_run(start, count);
    }

    /// Releases the sequence of frames beginning at `first`, marking
    /// each frame free, and returns the number of frames released.
    ///
    /// The sequence ends at the first frame that is free, is the head
    /// of another sequence, or lies past the end of the pool.
    ///
    /// Releases are usually performed through
    /// [`FramePoolRegistry::release`], which locates the owning pool
    /// first.
    ///
    /// # Panics
    ///
    /// `release` will panic if `first` is not managed by this pool or
    /// is not the head of a sequence: releasing an arbitrary frame is
    /// a programming error that would corrupt the map.
    ///
    pub fn release(&mut self, first: PhysFrame) -> usize {
        let start = self.index_of(first);
        if self.state(start) != FrameState::HeadOfSequence {
            panic!(
                "cannot release frame {:?}: frame is not the head of a sequence",
                first
            );
        }

        self.set_state(start, FrameState::Free);
        self.free_frames += 1;

        let mut released = 1;
        let mut index = start + 1;
        while index < self.num_frames() && self.state(index) == FrameState::Used {
            self.set_state(index, FrameState::Free);
            self.free_frames += 1;
            released += 1;
            index += 1;
        }

        released
    }

    /// Logs the pool's occupancy.
    ///
    pub fn debug(&self) {
        log::debug!(
            "frame pool {:?}: {}/{} frames free",
            self.frames,
            self.free_frames,
            self.num_frames()
        );
    }

    /// Returns the pool-relative index of the given frame.
    ///
    fn index_of(&self, frame: PhysFrame) -> usize {
        if !self.contains(frame) {
            panic!("{:?} is not managed by the pool {:?}", frame, self.frames);
        }

        (frame.number() - self.base().number()) as usize
    }

    /// Marks the run at pool-relative index `start` as an allocated
    /// sequence and debits `free_frames`.
    ///
    fn mark_run(&mut self, start: usize, count: usize) {
        self.set_state(start, FrameState::HeadOfSequence);
        for index in start + 1..start + count {
            self.set_state(index, FrameState::Used);
        }

        self.free_frames -= count;
    }

    fn state(&self, index: usize) -> FrameState {
        let map = unsafe { slice::from_raw_parts(self.map, self.map_bytes) };
        FrameState::from_cell(dibits::get(map, index))
    }

    fn set_state(&mut self, index: usize, state: FrameState) {
        let map = unsafe { slice::from_raw_parts_mut(self.map, self.map_bytes) };
        dibits::set(map, index, state.to_cell());
    }
}

unsafe impl PhysFrameAllocator for FramePool {
    /// Returns the next free frame as a single-frame sequence, or
    /// `None`.
    ///
    fn allocate_phys_frame(&mut self) -> Option<PhysFrame> {
        self.get_frames(1)
    }
}

impl PhysFrameDeallocator for FramePool {
    /// Releases the sequence beginning at `frame`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the sequence is unused.
    ///
    unsafe fn deallocate_phys_frame(&mut self, frame: PhysFrame) {
        self.release(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::PhysArena;

    // A 16-frame pool over frames 0..16 with its map in frame 16,
    // so that all 16 frames start out free.
    fn test_pool() -> (FramePoolRegistry, Arc<Mutex<FramePool>>) {
        let mapper = Arc::new(PhysArena::new(17));
        let registry = FramePoolRegistry::new();
        let pool = FramePool::new(
            PhysFrame::from_number(0),
            16,
            MapPlacement::Frame(PhysFrame::from_number(16)),
            mapper,
            &registry,
        );

        (registry, pool)
    }

    fn frame(number: u32) -> PhysFrame {
        PhysFrame::from_number(number)
    }

    #[test]
    fn sequence_marking() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();
        assert_eq!(pool.free_frames(), 16);

        // An allocation of n frames marks a head followed by
        // n-1 used frames and debits the free count by n.
        assert_eq!(pool.get_frames(3), Some(frame(0)));
        assert_eq!(pool.frame_state(frame(0)), FrameState::HeadOfSequence);
        assert_eq!(pool.frame_state(frame(1)), FrameState::Used);
        assert_eq!(pool.frame_state(frame(2)), FrameState::Used);
        assert_eq!(pool.frame_state(frame(3)), FrameState::Free);
        assert_eq!(pool.free_frames(), 13);
    }

    #[test]
    fn allocations_are_disjoint() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        let first = pool.get_frames(3).unwrap();
        let second = pool.get_frames(2).unwrap();
        assert_eq!(first, frame(0));
        assert_eq!(second, frame(3));
        assert_eq!(pool.free_frames(), 11);
    }

    #[test]
    fn release_restores_free_frames() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        let run = pool.get_frames(5).unwrap();
        assert_eq!(pool.free_frames(), 11);

        assert_eq!(pool.release(run), 5);
        assert_eq!(pool.free_frames(), 16);
        for number in 0..16 {
            assert_eq!(pool.frame_state(frame(number)), FrameState::Free);
        }
    }

    #[test]
    fn allocation_after_fragmentation() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        // Fragment the pool, then check that a released hole is
        // refilled first-fit.
        assert_eq!(pool.get_frames(3), Some(frame(0)));
        assert_eq!(pool.get_frames(2), Some(frame(3)));
        assert_eq!(pool.release(frame(0)), 3);
        for number in 0..3 {
            assert_eq!(pool.frame_state(frame(number)), FrameState::Free);
        }

        // The released hole only holds 3 frames, so a request for 4
        // must skip past the live sequence at 3..5.
        assert_eq!(pool.get_frames(4), Some(frame(5)));

        // A request for 3 fits the hole exactly.
        assert_eq!(pool.get_frames(3), Some(frame(0)));
    }

    #[test]
    fn release_stops_at_next_head() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        // Two adjacent sequences: releasing the first must not
        // leak into the second.
        let first = pool.get_frames(2).unwrap();
        let second = pool.get_frames(2).unwrap();
        assert_eq!(pool.release(first), 2);
        assert_eq!(pool.frame_state(second), FrameState::HeadOfSequence);
        assert_eq!(pool.frame_state(frame(3)), FrameState::Used);
        assert_eq!(pool.free_frames(), 14);
    }

    #[test]
    #[should_panic]
    fn release_of_non_head_frame() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        pool.get_frames(3).unwrap();
        pool.get_frames(2).unwrap();

        // Frame 4 is in the middle of the second sequence.
        pool.release(frame(4));
    }

    #[test]
    fn exhaustion() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        assert_eq!(pool.get_frames(16), Some(frame(0)));
        assert_eq!(pool.free_frames(), 0);
        assert_eq!(pool.get_frames(1), None);

        // No run of 17 can ever exist.
        assert_eq!(pool.release(frame(0)), 16);
        assert_eq!(pool.get_frames(17), None);

        // Nor a run longer than any hole.
        assert_eq!(pool.get_frames(1), Some(frame(0)));
        assert_eq!(pool.get_frames(14), Some(frame(1)));
        assert_eq!(pool.release(frame(0)), 1);
        assert_eq!(pool.get_frames(2), None);
        assert_eq!(pool.get_frames(0), None);
    }

    #[test]
    fn in_band_map_reserves_first_frame() {
        let mapper = Arc::new(PhysArena::new(16));
        let registry = FramePoolRegistry::new();
        let pool = FramePool::new(
            PhysFrame::from_number(0),
            16,
            MapPlacement::InBand,
            mapper,
            &registry,
        );
        let mut pool = pool.lock();

        // The map fits in one frame, which is pre-allocated.
        assert_eq!(pool.free_frames(), 15);
        assert_eq!(pool.frame_state(frame(0)), FrameState::HeadOfSequence);
        assert_eq!(pool.frame_state(frame(1)), FrameState::Free);

        // Allocation starts after the map frame.
        assert_eq!(pool.get_frames(2), Some(frame(1)));
    }

    #[test]
    fn mark_inaccessible_reserves_range() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        pool.mark_inaccessible(frame(4), 3);
        assert_eq!(pool.free_frames(), 13);
        assert_eq!(pool.frame_state(frame(4)), FrameState::HeadOfSequence);
        assert_eq!(pool.frame_state(frame(6)), FrameState::Used);

        // The reserved range is skipped by allocation.
        assert_eq!(pool.get_frames(5), Some(frame(7)));
    }

    #[test]
    #[should_panic]
    fn mark_inaccessible_of_allocated_frame() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        pool.get_frames(4).unwrap();
        pool.mark_inaccessible(frame(2), 2);
    }

    #[test]
    fn states_round_trip() {
        let (_registry, pool) = test_pool();
        let mut pool = pool.lock();

        // Drive one frame through every state and check that its
        // neighbours never change.
        pool.mark_inaccessible(frame(2), 1);
        for state in [
            FrameState::Free,
            FrameState::Used,
            FrameState::HeadOfSequence,
            FrameState::Free,
        ] {
            pool.set_state(5, state);
            assert_eq!(pool.frame_state(frame(5)), state);
            assert_eq!(pool.frame_state(frame(4)), FrameState::Free);
            assert_eq!(pool.frame_state(frame(6)), FrameState::Free);
            assert_eq!(pool.frame_state(frame(2)), FrameState::HeadOfSequence);
        }
    }
}
