// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Virtual memory management: per-address-space page tables, demand
//! paging, and virtual memory pools.
//!
//! Each [`AddressSpace`] owns a 32-bit two-level paging hierarchy: a
//! page directory whose entries reference page tables, whose entries in
//! turn reference physical frames. A fresh address space identity-maps
//! the shared kernel region, leaves the rest of the directory empty,
//! and installs the recursive self-map: the last directory entry
//! references the directory itself, which pins the whole hierarchy at
//! well-known virtual addresses (see [`recursive`]).
//!
//! Memory outside the shared region is demand-paged. Nothing is mapped
//! up front; the first touch of a page raises a page fault, and
//! [`AddressSpace::handle_fault`] decides whether the fault is
//! legitimate by consulting the registered [`VmPool`]s. A legitimate
//! not-present fault is serviced by allocating frames from the process
//! frame pool for the missing page table and page. Protection
//! violations are classified and logged, never serviced.
//!
//! A [`VmPool`] manages logical allocations within one virtual address
//! range: handing out page-multiple regions, answering the fault
//! handler's legitimacy queries, and releasing regions by their start
//! address.
//!
//! All access to the paging structures goes through the
//! [`PhysMapper`](memory::PhysMapper) in the [`PagingContext`], and all
//! control register access goes through the [`Mmu`] trait, so the whole
//! subsystem runs unchanged against a test arena on a host.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![allow(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

extern crate alloc;

mod address_space;
mod pool;
pub mod recursive;

pub use crate::address_space::{AddressSpace, FaultOutcome, MapError, PageFault};
pub use crate::pool::{PoolError, VmPool, MAX_REGIONS};

use alloc::sync::Arc;
use memory::{PhysAddr, PhysMapper};
use physmem::{FramePool, FramePoolRegistry};
use spin::Mutex;

/// The collaborators the paging subsystem works against.
///
/// This takes the place of global paging state: instead of static
/// fields recording the frame pools and the shared region size, every
/// address space carries its context explicitly.
///
#[derive(Clone)]
pub struct PagingContext {
    /// The pool backing kernel allocations in the shared region.
    pub kernel_pool: Arc<Mutex<FramePool>>,

    /// The pool backing page directories, page tables, and
    /// demand-paged frames.
    pub process_pool: Arc<Mutex<FramePool>>,

    /// The registry the pools above are registered with, used to
    /// release frames without knowing their pool.
    pub registry: Arc<FramePoolRegistry>,

    /// The size in bytes of the identity-mapped shared kernel
    /// region at the bottom of every address space.
    pub shared_size: u32,

    /// How physical frames are reached through pointers.
    pub mapper: Arc<dyn PhysMapper>,

    /// How the memory management hardware is driven.
    pub mmu: Arc<dyn Mmu>,
}

/// Access to the memory-management control registers.
///
/// The kernel drives the real CR0/CR3 registers; host test suites
/// substitute a recording implementation. CR2 does not appear here:
/// the faulting address is captured by the exception dispatcher and
/// arrives in [`PageFault`].
///
pub trait Mmu: Send + Sync {
    /// Makes the page directory at `directory` the active one by
    /// writing CR3. Rewriting CR3 also flushes the TLB, which is
    /// how mapping removals are made visible.
    ///
    fn write_cr3(&self, directory: PhysAddr);

    /// Sets the paging-enable bit (bit 31) of CR0.
    ///
    fn enable_paging(&self);

    /// Returns whether paging has been enabled.
    ///
    fn paging_enabled(&self) -> bool;
}

/// An [`Mmu`] for environments in which this kernel does not drive
/// the hardware, such as a host test process.
///
/// Control register writes are accepted and the paging-enabled state
/// is tracked, but nothing reaches any hardware.
///
pub struct InertMmu {
    paging: core::sync::atomic::AtomicBool,
}

impl InertMmu {
    /// Returns a new MMU with paging disabled.
    ///
    pub const fn new() -> Self {
        InertMmu {
            paging: core::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Default for InertMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu for InertMmu {
    fn write_cr3(&self, _directory: PhysAddr) {}

    fn enable_paging(&self) {
        self.paging.store(true, core::sync::atomic::Ordering::Relaxed);
    }

    fn paging_enabled(&self) -> bool {
        self.paging.load(core::sync::atomic::Ordering::Relaxed)
    }
}

/// The [`Mmu`] backed by the real control registers.
///
#[cfg(target_arch = "x86")]
pub struct HardwareMmu;

#[cfg(target_arch = "x86")]
impl Mmu for HardwareMmu {
    fn write_cr3(&self, directory: PhysAddr) {
        unsafe { x86::controlregs::cr3_write(directory.as_u32() as u64) };
    }

    fn enable_paging(&self) {
        unsafe {
            let cr0 = x86::controlregs::cr0();
            x86::controlregs::cr0_write(cr0 | x86::controlregs::Cr0::CR0_ENABLE_PAGING);
        }
    }

    fn paging_enabled(&self) -> bool {
        unsafe { x86::controlregs::cr0().contains(x86::controlregs::Cr0::CR0_ENABLE_PAGING) }
    }
}
