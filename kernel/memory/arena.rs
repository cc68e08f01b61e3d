// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A heap-backed stand-in for physical memory.
//!
//! On the running kernel, physical memory is reached through a fixed
//! window in the virtual address space. On a host there is no physical
//! address space to window, so `PhysArena` allocates a buffer on the
//! heap and treats offsets into it as physical addresses. Everything
//! above the [`PhysMapper`](crate::PhysMapper) seam behaves identically
//! in both environments, which is what lets the memory managers be
//! exercised by an ordinary test harness.

use crate::{PhysAddr, PhysMapper, FRAME_SIZE};
use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

/// A contiguous span of fake physical memory, starting at physical
/// address zero.
///
pub struct PhysArena {
    bytes: UnsafeCell<Box<[u8]>>,
}

// The arena hands out raw pointers into a buffer it owns for its
// whole lifetime; aliasing discipline is the caller's obligation,
// exactly as with real physical memory.
unsafe impl Send for PhysArena {}
unsafe impl Sync for PhysArena {}

impl PhysArena {
    /// Returns an arena of `frames` zeroed frames.
    ///
    pub fn new(frames: usize) -> Self {
        PhysArena {
            bytes: UnsafeCell::new(vec![0u8; frames * FRAME_SIZE].into_boxed_slice()),
        }
    }

    /// Returns the arena's size in bytes.
    ///
    pub fn size(&self) -> usize {
        unsafe { (&*self.bytes.get()).len() }
    }
}

unsafe impl PhysMapper for PhysArena {
    /// Returns a pointer to the arena bytes backing `phys`.
    ///
    /// # Panics
    ///
    /// `phys_to_virt` will panic if the `len` bytes at `phys` do
    /// not fit in the arena, as an access through the returned
    /// pointer would be to memory the machine does not have.
    ///
    fn phys_to_virt(&self, phys: PhysAddr, len: usize) -> *mut u8 {
        let start = phys.as_usize();
        let size = self.size();
        if start + len > size {
            panic!(
                "physical access of {} bytes at {:?} exceeds the {}-byte arena",
                len, phys, size
            );
        }

        unsafe { (*self.bytes.get()).as_mut_ptr().add(start) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_access() {
        let arena = PhysArena::new(2);
        assert_eq!(arena.size(), 2 * FRAME_SIZE);

        // Writes through one translation are visible through another.
        let a = arena.phys_to_virt(PhysAddr::new(0x10), 4);
        unsafe { a.write(0xab) };
        let b = arena.phys_to_virt(PhysAddr::new(0x10), 1);
        assert_eq!(unsafe { b.read() }, 0xab);

        // The last byte is reachable.
        let _ = arena.phys_to_virt(PhysAddr::new(2 * FRAME_SIZE as u32 - 1), 1);
    }

    #[test]
    #[should_panic]
    fn arena_out_of_range() {
        let arena = PhysArena::new(1);
        arena.phys_to_virt(PhysAddr::new(FRAME_SIZE as u32), 1);
    }
}
