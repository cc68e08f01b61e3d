// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides virtual memory pools: logical allocation within one
//! virtual address range.

use crate::address_space::AddressSpace;
use alloc::sync::Arc;
use memory::{VirtAddr, VirtPage, PAGE_SIZE};
use spin::Mutex;

/// The maximum number of regions a pool can track, including the
/// reserved region that describes the pool's own first page.
///
pub const MAX_REGIONS: usize = 256;

/// An error encountered while allocating from or releasing to a
/// virtual memory pool.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolError {
    /// An allocation of zero bytes was requested.
    EmptyAllocation,

    /// The pool's region table is full.
    RegionsExhausted,

    /// The pool's address range has no room for the requested
    /// region.
    OutOfSpace,

    /// The released address is not the start of any allocated
    /// region.
    UnmappedRelease,
}

/// One allocated region within a pool.
///
#[derive(Clone, Copy)]
struct Region {
    start: VirtAddr,
    size: u32,
}

/// A pool of virtual memory.
///
/// A pool covers a contiguous virtual address range and hands out
/// page-multiple regions from it. Regions are packed: each new
/// region starts where the previous one ends, and the pool's first
/// page is reserved for the pool's own bookkeeping, so the first
/// allocation starts one page past the pool's base. No memory is
/// mapped by allocation: pages materialise on first touch, when the
/// page fault handler finds the address legitimate because it lies
/// inside this pool.
///
pub struct VmPool {
    base: VirtAddr,
    size: u32,

    // The allocated regions, in address order. regions[0] is the
    // reserved first page and count is always at least 1.
    regions: [Region; MAX_REGIONS],
    count: usize,
}

impl VmPool {
    /// Creates a pool covering `size` bytes starting at `base` and
    /// registers it with the address space, which consults the pool
    /// when judging page faults.
    ///
    /// The pool's first page is recorded as allocated; it holds the
    /// pool's bookkeeping and is never handed out.
    ///
    /// # Panics
    ///
    /// `new` will panic if `base` is not page-aligned, or if `size`
    /// is not a positive multiple of the page size.
    ///
    pub fn new(base: VirtAddr, size: u32, space: &mut AddressSpace) -> Arc<Mutex<VmPool>> {
        if !base.is_aligned(PAGE_SIZE as u32) {
            panic!("pool base {:?} is not page-aligned", base);
        }
        if size == 0 || size % PAGE_SIZE as u32 != 0 {
            panic!("pool size {:#x} is not a positive multiple of the page size", size);
        }

        let reserved = Region {
            start: base,
            size: PAGE_SIZE as u32,
        };
        let pool = VmPool {
            base,
            size,
            regions: [reserved; MAX_REGIONS],
            count: 1,
        };

        log::debug!("constructed virtual memory pool at {:?}, {:#x} bytes", base, size);

        let pool = Arc::new(Mutex::new(pool));
        space.register_pool(pool.clone());

        pool
    }

    /// Returns the pool's base address.
    ///
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    /// Returns the pool's size in bytes.
    ///
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Allocates a region of `bytes` bytes, rounded up to whole
    /// pages, and returns its start address.
    ///
    /// The new region starts where the previous region ends. The
    /// returned memory is not yet mapped; it becomes real on first
    /// touch via the page fault handler.
    ///
    pub fn allocate(&mut self, bytes: u32) -> Result<VirtAddr, PoolError> {
        if bytes == 0 {
            return Err(PoolError::EmptyAllocation);
        }
        if self.count == MAX_REGIONS {
            return Err(PoolError::RegionsExhausted);
        }

        // Round up to whole pages, and place the region where the
        // previous one ends. Sizes and bounds are computed in 64 bits
        // so a pool ending at the top of the address space cannot
        // overflow.
        let page = PAGE_SIZE as u64;
        let size = (bytes as u64 + page - 1) / page * page;
        let last = self.regions[self.count - 1];
        let start = last.start.as_u32() as u64 + last.size as u64;
        if start + size > self.base.as_u32() as u64 + self.size as u64 {
            return Err(PoolError::OutOfSpace);
        }

        let start = VirtAddr::new(start as u32);
        self.regions[self.count] = Region {
            start,
            size: size as u32,
        };
        self.count += 1;

        Ok(start)
    }

    /// Releases the region starting at exactly `start`, unmapping
    /// each of its pages from the address space and reloading it to
    /// flush stale translations.
    ///
    pub fn release(&mut self, start: VirtAddr, space: &mut AddressSpace) -> Result<(), PoolError> {
        // Region 0 is the pool's own bookkeeping page and is not
        // releasable.
        let index = match self.regions[1..self.count]
            .iter()
            .position(|region| region.start == start)
        {
            Some(found) => found + 1,
            None => return Err(PoolError::UnmappedRelease),
        };

        let region = self.regions[index];
        let pages = region.size as usize / PAGE_SIZE;
        let first = VirtPage::from_start_address(region.start);
        for page in 0..pages {
            space.free_page(VirtPage::from_number(first.number() + page as u32));
        }

        // Close the gap in the region table.
        for shift in index..self.count - 1 {
            self.regions[shift] = self.regions[shift + 1];
        }

        self.count -= 1;

        // Reload the address space to flush the released pages.
        space.load();

        Ok(())
    }

    /// Returns whether `addr` lies inside the pool's range.
    ///
    /// This is the pool's answer to the page fault handler: any
    /// address in range is treated as legitimate, which is a
    /// deliberately coarse test.
    ///
    pub fn is_legitimate(&self, addr: VirtAddr) -> bool {
        let addr = addr.as_u32() as u64;
        let base = self.base.as_u32() as u64;

        base <= addr && addr < base + self.size as u64
    }
}
