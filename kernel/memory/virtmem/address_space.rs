// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides per-address-space page table management and the demand
//! paging fault service.

use crate::pool::VmPool;
use crate::recursive::RECURSIVE_SLOT;
use crate::PagingContext;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use memory::{
    PageTableEntry, PageTableFlags, PhysAddr, PhysFrame, VirtAddr, VirtPage, ENTRIES_PER_PAGE,
    FRAME_SIZE, PAGE_SIZE,
};
use spin::Mutex;

// Page fault error code bits.
const PF_PRESENT: u32 = 1 << 0; // 0 = not present, 1 = protection violation.
const PF_WRITE: u32 = 1 << 1; // 0 = read, 1 = write.
const PF_USER: u32 = 1 << 2; // 0 = kernel mode, 1 = user mode.

/// A page fault, as delivered by the exception dispatcher.
///
/// The dispatcher reads the faulting linear address out of CR2 and
/// takes the error code from the exception frame.
///
#[derive(Clone, Copy, Debug)]
pub struct PageFault {
    /// The faulting linear address.
    pub address: VirtAddr,

    /// The hardware error code pushed with the exception.
    pub error_code: u32,
}

/// How a page fault was resolved.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
    /// The missing page was mapped; the faulting instruction can be
    /// retried.
    Serviced,

    /// The address lies in no registered pool, so the fault was
    /// refused. The faulting instruction will fault again if
    /// retried.
    Illegitimate,

    /// The page was present but the access violated its protection.
    /// No recovery is attempted.
    ProtectionFault,
}

/// An error encountered while growing a paging hierarchy.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapError {
    /// The process frame pool has no free frames left.
    OutOfFrames,
}

/// One frame of 1024 page table entries, reached through the
/// physical memory mapping.
///
/// Entry accesses are volatile: on the machine, the MMU reads these
/// words behind the compiler's back.
///
struct TableView {
    base: *mut u32,
}

impl TableView {
    fn new(ctx: &PagingContext, frame: PhysFrame) -> Self {
        TableView {
            base: ctx.mapper.phys_to_virt(frame.start_address(), FRAME_SIZE) as *mut u32,
        }
    }

    fn read(&self, index: usize) -> PageTableEntry {
        assert!(index < ENTRIES_PER_PAGE);
        PageTableEntry::from_bits(unsafe { ptr::read_volatile(self.base.add(index)) })
    }

    fn write(&self, index: usize, entry: PageTableEntry) {
        assert!(index < ENTRIES_PER_PAGE);
        unsafe { ptr::write_volatile(self.base.add(index), entry.bits()) };
    }
}

/// A virtual address space: one page directory, its page tables, and
/// the virtual memory pools registered against it.
///
pub struct AddressSpace {
    // The frame holding the page directory.
    directory: PhysFrame,

    // The pools consulted to judge the legitimacy of a fault.
    pools: Vec<Arc<Mutex<VmPool>>>,

    ctx: PagingContext,
}

impl AddressSpace {
    /// Creates a new address space.
    ///
    /// The directory and the initial page table are allocated from
    /// the process frame pool. The shared kernel region is identity
    /// mapped, present and writable; every other directory slot is
    /// marked writable but not present, to be filled in on demand by
    /// [`handle_fault`](Self::handle_fault); and the final directory
    /// slot is the recursive self-reference.
    ///
    /// # Panics
    ///
    /// `new` will panic if the context's shared region is not
    /// page-aligned or does not fit the initial page table (4 MiB).
    ///
    pub fn new(ctx: PagingContext) -> Result<AddressSpace, MapError> {
        let shared_pages = ctx.shared_size as usize / PAGE_SIZE;
        if ctx.shared_size as usize % PAGE_SIZE != 0 {
            panic!("shared region size {:#x} is not page-aligned", ctx.shared_size);
        }
        if shared_pages > ENTRIES_PER_PAGE {
            panic!(
                "shared region of {} pages does not fit the initial page table",
                shared_pages
            );
        }

        let directory = allocate_frame(&ctx)?;
        let first_table = allocate_frame(&ctx)?;

        // The initial table identity-maps the shared region. Entries
        // past the shared region stay writable-not-present.
        let table = TableView::new(&ctx, first_table);
        for index in 0..ENTRIES_PER_PAGE {
            let mut entry = PageTableEntry::new();
            if index < shared_pages {
                entry.set_frame_flags(
                    PhysFrame::from_number(index as u32),
                    PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
                );
            } else {
                entry.set_flags(PageTableFlags::WRITABLE);
            }

            table.write(index, entry);
        }

        let dir = TableView::new(&ctx, directory);
        let mut first = PageTableEntry::new();
        first.set_frame_flags(
            first_table,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        );
        dir.write(0, first);

        let mut empty = PageTableEntry::new();
        empty.set_flags(PageTableFlags::WRITABLE);
        for index in 1..RECURSIVE_SLOT {
            dir.write(index, empty);
        }

        // The self-reference that pins the hierarchy at the recursive
        // window addresses.
        let mut own = PageTableEntry::new();
        own.set_frame_flags(
            directory,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        );
        dir.write(RECURSIVE_SLOT, own);

        log::debug!(
            "constructed address space with directory {:?} and {} shared pages",
            directory,
            shared_pages
        );

        Ok(AddressSpace {
            directory,
            pools: Vec::new(),
            ctx,
        })
    }

    /// Returns the frame holding this space's page directory.
    ///
    pub fn directory_frame(&self) -> PhysFrame {
        self.directory
    }

    /// Makes this the active address space by loading its directory
    /// into CR3.
    ///
    pub fn load(&self) {
        self.ctx.mmu.write_cr3(self.directory.start_address());
        log::debug!("loaded address space with directory {:?}", self.directory);
    }

    /// Sets the paging-enable bit in CR0.
    ///
    /// An address space must have been loaded first.
    ///
    pub fn enable_paging(&self) {
        self.ctx.mmu.enable_paging();
        log::debug!("enabled paging");
    }

    /// Adds a pool to the list consulted on page faults.
    ///
    /// Before the first pool is registered, every not-present fault
    /// is serviced unconditionally; this is the bootstrap window in
    /// which the kernel touches memory it has not described yet.
    /// From the first registration onwards, faults outside every
    /// registered pool are refused.
    ///
    pub fn register_pool(&mut self, pool: Arc<Mutex<VmPool>>) {
        self.pools.push(pool);
    }

    /// Services a page fault against this address space.
    ///
    /// Protection violations are classified and logged but not
    /// recovered. Not-present faults at legitimate addresses are
    /// serviced by installing the missing page table (if any) and
    /// page, both allocated from the process frame pool and mapped
    /// present and writable.
    ///
    pub fn handle_fault(&mut self, fault: &PageFault) -> Result<FaultOutcome, MapError> {
        if fault.error_code & PF_PRESENT != 0 {
            let who = if fault.error_code & PF_USER != 0 {
                "user"
            } else {
                "kernel"
            };
            let how = if fault.error_code & PF_WRITE != 0 {
                "write"
            } else {
                "read"
            };
            log::warn!(
                "protection fault: {} {} of protected page at {:?}",
                who,
                how,
                fault.address
            );

            return Ok(FaultOutcome::ProtectionFault);
        }

        if !self.pools.is_empty() {
            let legitimate = self
                .pools
                .iter()
                .any(|pool| pool.lock().is_legitimate(fault.address));
            if !legitimate {
                log::warn!("refusing fault at {:?}: address in no pool", fault.address);
                return Ok(FaultOutcome::Illegitimate);
            }
        }

        let dir = TableView::new(&self.ctx, self.directory);
        let pde_index = fault.address.directory_index();
        let mut pde = dir.read(pde_index);
        if !pde.is_present() {
            // Install the missing page table, with every entry
            // writable but not present.
            let frame = allocate_frame(&self.ctx)?;
            pde.set_frame_flags(
                frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
            );
            dir.write(pde_index, pde);

            let table = TableView::new(&self.ctx, frame);
            let mut empty = PageTableEntry::new();
            empty.set_flags(PageTableFlags::WRITABLE);
            for index in 0..ENTRIES_PER_PAGE {
                table.write(index, empty);
            }
        }

        let table = TableView::new(&self.ctx, pde.phys_frame());
        let frame = allocate_frame(&self.ctx)?;
        let mut pte = PageTableEntry::new();
        pte.set_frame_flags(
            frame,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        );
        table.write(fault.address.table_index(), pte);

        log::debug!("serviced page fault at {:?} with {:?}", fault.address, frame);

        Ok(FaultOutcome::Serviced)
    }

    /// Returns the physical address the given virtual address maps
    /// to, or `None` if it is unmapped.
    ///
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let dir = TableView::new(&self.ctx, self.directory);
        let pde = dir.read(addr.directory_index());
        if !pde.is_present() {
            return None;
        }

        let table = TableView::new(&self.ctx, pde.phys_frame());
        let pte = table.read(addr.table_index());
        if !pte.is_present() {
            return None;
        }

        Some(pte.addr() + addr.page_offset() as u32)
    }

    /// Unmaps the given page, if it is mapped, releasing its backing
    /// frame through the frame pool registry and flushing the TLB.
    ///
    /// Unmapped pages are ignored, so releasing a region is a simple
    /// sweep over its pages whether or not they were ever touched.
    ///
    pub fn free_page(&mut self, page: VirtPage) {
        let dir = TableView::new(&self.ctx, self.directory);
        let pde = dir.read(page.directory_index());
        if !pde.is_present() {
            return;
        }

        let table = TableView::new(&self.ctx, pde.phys_frame());
        let mut pte = table.read(page.table_index());
        if !pte.is_present() {
            return;
        }

        self.ctx.registry.release(pte.phys_frame());

        let mut flags = pte.flags();
        flags.remove(PageTableFlags::PRESENT);
        pte.set_flags(flags);
        table.write(page.table_index(), pte);

        // Rewriting CR3 flushes the stale translation.
        self.ctx.mmu.write_cr3(self.directory.start_address());
    }
}

/// Takes one frame from the process pool.
///
fn allocate_frame(ctx: &PagingContext) -> Result<PhysFrame, MapError> {
    ctx.process_pool
        .lock()
        .get_frames(1)
        .ok_or(MapError::OutOfFrames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InertMmu, VmPool};
    use memory::PhysArena;
    use physmem::{FramePool, FramePoolRegistry, MapPlacement};

    // A context over a 64-frame arena: a small kernel pool over the
    // shared region, and a process pool over frames 16..64, both with
    // in-band state maps. The shared region is the first 16 pages.
    fn test_context() -> PagingContext {
        let mapper = Arc::new(PhysArena::new(64));
        let registry = Arc::new(FramePoolRegistry::new());
        let kernel_pool = FramePool::new(
            PhysFrame::from_number(0),
            16,
            MapPlacement::InBand,
            mapper.clone(),
            &registry,
        );
        let process_pool = FramePool::new(
            PhysFrame::from_number(16),
            48,
            MapPlacement::InBand,
            mapper.clone(),
            &registry,
        );

        PagingContext {
            kernel_pool,
            process_pool,
            registry,
            shared_size: 16 * PAGE_SIZE as u32,
            mapper,
            mmu: Arc::new(InertMmu::new()),
        }
    }

    fn not_present_write(address: u32) -> PageFault {
        PageFault {
            address: VirtAddr::new(address),
            error_code: PF_WRITE,
        }
    }

    #[test]
    fn new_space_maps_shared_region() {
        let ctx = test_context();
        let space = AddressSpace::new(ctx).unwrap();

        // The shared region is identity-mapped.
        assert_eq!(
            space.translate(VirtAddr::new(0x3abc)),
            Some(PhysAddr::new(0x3abc))
        );
        assert_eq!(
            space.translate(VirtAddr::new(0xf000)),
            Some(PhysAddr::new(0xf000))
        );

        // Memory past the shared region is not.
        assert_eq!(space.translate(VirtAddr::new(0x10000)), None);
        assert_eq!(space.translate(VirtAddr::new(0x0040_0000)), None);
    }

    #[test]
    fn recursive_slot_references_the_directory() {
        let ctx = test_context();
        let space = AddressSpace::new(ctx.clone()).unwrap();

        let dir = TableView::new(&ctx, space.directory_frame());
        let own = dir.read(RECURSIVE_SLOT);
        assert!(own.is_present());
        assert!(own.flags().writable());
        assert_eq!(own.phys_frame(), space.directory_frame());
    }

    #[test]
    fn fault_installs_missing_table_and_page() {
        let ctx = test_context();
        let mut space = AddressSpace::new(ctx.clone()).unwrap();
        let free_before = ctx.process_pool.lock().free_frames();

        // A not-present write to 0x0040_1000: directory slot 1 has no
        // table yet, so servicing must allocate exactly two frames,
        // one for the table and one for the page.
        let outcome = space.handle_fault(&not_present_write(0x0040_1000)).unwrap();
        assert_eq!(outcome, FaultOutcome::Serviced);
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before - 2);

        // The page is now mapped, so the instruction would not fault
        // a second time.
        let phys = space.translate(VirtAddr::new(0x0040_1234)).unwrap();
        assert_eq!(phys.as_u32() & 0xfff, 0x234);

        // A second fault in the same table only needs the page frame.
        let outcome = space.handle_fault(&not_present_write(0x0040_3000)).unwrap();
        assert_eq!(outcome, FaultOutcome::Serviced);
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before - 3);
    }

    #[test]
    fn protection_fault_is_not_serviced() {
        let ctx = test_context();
        let mut space = AddressSpace::new(ctx.clone()).unwrap();
        let free_before = ctx.process_pool.lock().free_frames();

        let fault = PageFault {
            address: VirtAddr::new(0x1000),
            error_code: PF_PRESENT | PF_WRITE,
        };
        assert_eq!(
            space.handle_fault(&fault).unwrap(),
            FaultOutcome::ProtectionFault
        );
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before);
    }

    #[test]
    fn pools_gate_fault_service() {
        let ctx = test_context();
        let mut space = AddressSpace::new(ctx.clone()).unwrap();

        // Bootstrap window: with no pools registered, any address is
        // serviced.
        let outcome = space.handle_fault(&not_present_write(0x0880_0000)).unwrap();
        assert_eq!(outcome, FaultOutcome::Serviced);

        // Register a 1 MiB pool at 0x4000_0000. Faults inside it are
        // serviced; faults outside it are refused without consuming
        // frames.
        let _pool = VmPool::new(VirtAddr::new(0x4000_0000), 0x0010_0000, &mut space);
        let outcome = space.handle_fault(&not_present_write(0x4008_0000)).unwrap();
        assert_eq!(outcome, FaultOutcome::Serviced);

        let free_before = ctx.process_pool.lock().free_frames();
        let outcome = space.handle_fault(&not_present_write(0x5000_0000)).unwrap();
        assert_eq!(outcome, FaultOutcome::Illegitimate);
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before);
    }

    #[test]
    fn out_of_frames_surfaces() {
        let ctx = test_context();
        let mut space = AddressSpace::new(ctx.clone()).unwrap();

        // Drain the process pool, then fault.
        while ctx.process_pool.lock().get_frames(1).is_some() {}
        assert_eq!(
            space.handle_fault(&not_present_write(0x0040_1000)),
            Err(MapError::OutOfFrames)
        );
    }

    #[test]
    fn free_page_releases_the_backing_frame() {
        let ctx = test_context();
        let mut space = AddressSpace::new(ctx.clone()).unwrap();

        space.handle_fault(&not_present_write(0x0040_1000)).unwrap();
        assert!(space.translate(VirtAddr::new(0x0040_1000)).is_some());
        let free_before = ctx.process_pool.lock().free_frames();

        let page = VirtPage::containing_address(VirtAddr::new(0x0040_1000));
        space.free_page(page);
        assert_eq!(space.translate(VirtAddr::new(0x0040_1000)), None);
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before + 1);

        // Freeing an unmapped page is a no-op, not an error.
        space.free_page(page);
        space.free_page(VirtPage::containing_address(VirtAddr::new(0x0900_0000)));
        assert_eq!(ctx.process_pool.lock().free_frames(), free_before + 1);
    }
}
