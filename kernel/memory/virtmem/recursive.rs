// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The virtual addresses implied by the recursive self-map.
//!
//! The last entry of every page directory references the directory
//! itself. Address translation then folds back on itself for any
//! virtual address whose directory index is 1023: the "page table"
//! found at the first level is the directory, so the remaining address
//! bits index into the paging structures rather than ordinary memory.
//! This pins the active hierarchy at fixed addresses:
//!
//! - `0xffc0_0000 + (d << 12)` is the page table for directory slot
//!   `d`, one page each, covering the whole hierarchy.
//! - `0xffff_f000` is the page directory itself (both address halves
//!   fold, `d = 1023` twice over).
//!
//! The functions here compute entry addresses inside those windows.
//! They describe the layout seen by the CPU once the self-mapped
//! directory is active; the managers in this crate reach the same
//! structures through their [`PhysMapper`](memory::PhysMapper)
//! instead, so that they also run where no paging hardware is
//! present.

use memory::VirtAddr;

/// The directory slot holding the self-reference.
///
pub const RECURSIVE_SLOT: usize = 1023;

/// The base of the window through which the active page tables are
/// visible.
///
pub const TABLE_WINDOW: VirtAddr = VirtAddr::new(0xffc0_0000);

/// The address of the active page directory within the recursive
/// window.
///
pub const DIRECTORY_WINDOW: VirtAddr = VirtAddr::new(0xffff_f000);

/// Returns the virtual address of the page table serving the given
/// virtual address.
///
pub fn table_window(addr: VirtAddr) -> VirtAddr {
    VirtAddr::new(TABLE_WINDOW.as_u32() | (addr.directory_index() as u32) << 12)
}

/// Returns the virtual address of the directory entry (PDE) serving
/// the given virtual address.
///
pub fn pde_window(addr: VirtAddr) -> VirtAddr {
    VirtAddr::new(DIRECTORY_WINDOW.as_u32() + (addr.directory_index() as u32) * 4)
}

/// Returns the virtual address of the page table entry (PTE) serving
/// the given virtual address.
///
pub fn pte_window(addr: VirtAddr) -> VirtAddr {
    VirtAddr::new(
        TABLE_WINDOW.as_u32()
            | (addr.directory_index() as u32) << 12
            | (addr.table_index() as u32) * 4,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_addresses() {
        // Directory slot 1, table slot 1.
        let addr = VirtAddr::new(0x0040_1234);
        assert_eq!(table_window(addr), VirtAddr::new(0xffc0_1000));
        assert_eq!(pde_window(addr), VirtAddr::new(0xffff_f004));
        assert_eq!(pte_window(addr), VirtAddr::new(0xffc0_1004));

        // The zero address uses the first entries of both windows.
        assert_eq!(table_window(VirtAddr::zero()), TABLE_WINDOW);
        assert_eq!(pde_window(VirtAddr::zero()), DIRECTORY_WINDOW);
        assert_eq!(pte_window(VirtAddr::zero()), TABLE_WINDOW);

        // The top of the address space folds onto the directory.
        let top = VirtAddr::new(0xffff_ffff);
        assert_eq!(table_window(top), DIRECTORY_WINDOW);
        assert_eq!(pde_window(top), VirtAddr::new(0xffff_fffc));
        assert_eq!(pte_window(top), VirtAddr::new(0xffff_fffc));
    }
}
