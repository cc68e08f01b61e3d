// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the process-wide registry of frame pools, which performs
//! pool-agnostic releases.

use crate::pool::FramePool;
use alloc::sync::Arc;
use alloc::vec::Vec;
use memory::PhysFrame;
use spin::Mutex;

/// An append-only list of every live [`FramePool`].
///
/// At the time a sequence of frames is released, the caller knows
/// only the sequence's first frame number, not which pool the frames
/// came from. The registry scans its pools for the one covering the
/// frame and forwards the release to it.
///
/// Pools register themselves during construction (see
/// [`FramePool::new`]); pools are never unregistered.
///
pub struct FramePoolRegistry {
    pools: Mutex<Vec<Arc<Mutex<FramePool>>>>,
}

impl FramePoolRegistry {
    /// Returns an empty registry.
    ///
    pub const fn new() -> Self {
        FramePoolRegistry {
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Adds a pool to the registry.
    ///
    pub fn register(&self, pool: Arc<Mutex<FramePool>>) {
        self.pools.lock().push(pool);
    }

    /// Releases the sequence of frames beginning at `first`, whichever
    /// pool it belongs to, and returns the number of frames released.
    ///
    /// # Panics
    ///
    /// `release` will panic if no registered pool manages `first`, or
    /// if `first` is not the head of an allocated sequence. Both are
    /// programming errors: the frame number was not one returned by
    /// [`FramePool::get_frames`].
    ///
    pub fn release(&self, first: PhysFrame) -> usize {
        let pools = self.pools.lock();
        for pool in pools.iter() {
            let mut pool = pool.lock();
            if pool.contains(first) {
                return pool.release(first);
            }
        }

        panic!("cannot release {:?}: frame not tracked by any pool", first);
    }

    /// Logs the occupancy of every registered pool.
    ///
    pub fn debug(&self) {
        let pools = self.pools.lock();
        log::debug!("{} frame pools registered", pools.len());
        for pool in pools.iter() {
            pool.lock().debug();
        }
    }
}

impl Default for FramePoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FrameState, MapPlacement};
    use memory::PhysArena;

    #[test]
    fn release_finds_the_owning_pool() {
        // Two pools over disjoint ranges of the same arena, with
        // their maps in frames 48 and 49.
        let mapper: Arc<PhysArena> = Arc::new(PhysArena::new(50));
        let registry = FramePoolRegistry::new();
        let low = FramePool::new(
            PhysFrame::from_number(0),
            16,
            MapPlacement::Frame(PhysFrame::from_number(48)),
            mapper.clone(),
            &registry,
        );
        let high = FramePool::new(
            PhysFrame::from_number(16),
            32,
            MapPlacement::Frame(PhysFrame::from_number(49)),
            mapper,
            &registry,
        );

        let a = low.lock().get_frames(2).unwrap();
        let b = high.lock().get_frames(3).unwrap();
        assert_eq!(a, PhysFrame::from_number(0));
        assert_eq!(b, PhysFrame::from_number(16));

        // Release through the registry, with no pool in hand.
        assert_eq!(registry.release(b), 3);
        assert_eq!(registry.release(a), 2);
        assert_eq!(low.lock().free_frames(), 16);
        assert_eq!(high.lock().free_frames(), 32);
        assert_eq!(high.lock().frame_state(b), FrameState::Free);
    }

    #[test]
    #[should_panic]
    fn release_of_untracked_frame() {
        let mapper = Arc::new(PhysArena::new(17));
        let registry = FramePoolRegistry::new();
        let _pool = FramePool::new(
            PhysFrame::from_number(0),
            16,
            MapPlacement::Frame(PhysFrame::from_number(16)),
            mapper,
            &registry,
        );

        // Frame 40 is past the end of every pool.
        registry.release(PhysFrame::from_number(40));
    }
}
