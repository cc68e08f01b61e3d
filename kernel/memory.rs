// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Assembles the physical and virtual memory managers.
//!
//! [`init`] turns a [`MachineLayout`], the machine-specific facts
//! the bootstrap code gathered, into a working memory system: a
//! kernel frame pool over the shared region, a process frame pool
//! over the rest of memory, reserved regions marked inaccessible,
//! and the first address space constructed, loaded, and with paging
//! enabled.
//!
//! The "current address space" lives here too, as [`CurrentSpace`]:
//! the exception dispatcher forwards page faults to whichever space
//! was switched in last.

use ::memory::{PhysFrameRange, PhysMapper, PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use physmem::{needed_info_frames, FramePool, FramePoolRegistry, MapPlacement};
use spin::Mutex;
use virtmem::{AddressSpace, FaultOutcome, MapError, Mmu, PageFault, PagingContext};

/// Describes the machine's physical memory, as discovered by the
/// bootstrap code.
///
pub struct MachineLayout {
    /// The frames of the shared kernel region. The kernel frame
    /// pool manages these, with its state map held in band.
    pub kernel_frames: PhysFrameRange,

    /// The frames handed to the process frame pool, which backs
    /// page directories, page tables, and demand-paged memory.
    pub process_frames: PhysFrameRange,

    /// Regions that must never be allocated, such as the memory
    /// hole below 1 MiB devices map into. Each must lie within one
    /// of the pools above.
    pub reserved: Vec<PhysFrameRange>,
}

/// The assembled memory managers.
///
pub struct MemorySystem {
    /// The context every address space in the system shares.
    pub context: PagingContext,

    /// The kernel's own address space, constructed and loaded by
    /// [`init`].
    pub kernel_space: Arc<Mutex<AddressSpace>>,

    /// The space page faults are resolved against.
    pub current: CurrentSpace,
}

/// Builds the memory system over the given machine layout.
///
/// The kernel pool keeps its state map in its own first frame; the
/// process pool's map is allocated from the kernel pool, matching
/// the usual arrangement in which the process pool's frames all
/// remain available for paging structures. The shared region (the
/// extent of the kernel frames) is identity-mapped in every address
/// space.
///
/// # Panics
///
/// `init` will panic if a reserved region lies in neither pool.
///
pub fn init(
    layout: &MachineLayout,
    mapper: Arc<dyn PhysMapper>,
    mmu: Arc<dyn Mmu>,
) -> Result<MemorySystem, MapError> {
    let registry = Arc::new(FramePoolRegistry::new());

    let kernel_pool = FramePool::new(
        layout.kernel_frames.start(),
        layout.kernel_frames.len(),
        MapPlacement::InBand,
        mapper.clone(),
        &registry,
    );

    // The process pool's state map lives in frames taken from the
    // kernel pool.
    let info = kernel_pool
        .lock()
        .get_frames(needed_info_frames(layout.process_frames.len()))
        .ok_or(MapError::OutOfFrames)?;
    let process_pool = FramePool::new(
        layout.process_frames.start(),
        layout.process_frames.len(),
        MapPlacement::Frame(info),
        mapper.clone(),
        &registry,
    );

    for region in layout.reserved.iter() {
        let pool = if layout.kernel_frames.contains(region.start()) {
            &kernel_pool
        } else if layout.process_frames.contains(region.start()) {
            &process_pool
        } else {
            panic!("reserved region {:?} lies in neither frame pool", region);
        };
        pool.lock().mark_inaccessible(region.start(), region.len());
    }

    let context = PagingContext {
        kernel_pool,
        process_pool,
        registry,
        shared_size: (layout.kernel_frames.len() * PAGE_SIZE) as u32,
        mapper,
        mmu,
    };

    let kernel_space = Arc::new(Mutex::new(AddressSpace::new(context.clone())?));
    let current = CurrentSpace::new();
    current.switch_to(kernel_space.clone());
    kernel_space.lock().enable_paging();

    log::info!("memory system initialised");

    Ok(MemorySystem {
        context,
        kernel_space,
        current,
    })
}

/// Tracks the address space page faults are resolved against.
///
/// This replaces a global "current page table" pointer: switching
/// spaces goes through [`switch_to`](Self::switch_to), which loads
/// the new space and hands back the old one, so a caller can switch
/// temporarily and restore its predecessor.
///
pub struct CurrentSpace {
    inner: Mutex<Option<Arc<Mutex<AddressSpace>>>>,
}

impl CurrentSpace {
    /// Returns a tracker with no space switched in.
    ///
    pub const fn new() -> Self {
        CurrentSpace {
            inner: Mutex::new(None),
        }
    }

    /// Loads `space` and records it as current, returning the
    /// previously current space.
    ///
    pub fn switch_to(&self, space: Arc<Mutex<AddressSpace>>) -> Option<Arc<Mutex<AddressSpace>>> {
        space.lock().load();

        self.inner.lock().replace(space)
    }

    /// Returns the current space.
    ///
    pub fn current(&self) -> Option<Arc<Mutex<AddressSpace>>> {
        self.inner.lock().clone()
    }

    /// Resolves a page fault against the current space. This is the
    /// entry point the exception dispatcher calls.
    ///
    /// # Panics
    ///
    /// `handle_fault` will panic if no space has been switched in: a
    /// page fault cannot predate paging.
    ///
    pub fn handle_fault(&self, fault: &PageFault) -> Result<FaultOutcome, MapError> {
        let space = self
            .current()
            .expect("page fault delivered before any address space was loaded");

        let result = space.lock().handle_fault(fault);
        result
    }
}

impl Default for CurrentSpace {
    fn default() -> Self {
        Self::new()
    }
}
