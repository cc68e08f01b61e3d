// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use crate::{PhysAddr, PhysFrame};
use bitflags::bitflags;
use core::fmt;

/// The number of entries in a page directory or page table.
///
/// Both levels of the two-level hierarchy are one frame of
/// 1024 32-bit entries.
///
pub const ENTRIES_PER_PAGE: usize = 1024;

bitflags! {
    /// The flags in a page directory or page table entry.
    ///
    pub struct PageTableFlags: u32 {
        /// Indicates that the referenced page table or
        /// physical frame is mapped and usable.
        const PRESENT = 1 << 0;

        /// Indicates that the referenced page table or
        /// physical frame is writable. If this bit is
        /// unset in a directory entry, none of the memory
        /// referenced by that page table is writable,
        /// irrespective of the table's own flags.
        const WRITABLE = 1 << 1;

        /// Indicates that accesses from ring 3 are
        /// allowed. If unset, only the kernel can access
        /// the memory.
        const USER_ACCESSIBLE = 1 << 2;

        /// Indicates that the caching behaviour for this
        /// memory is write-through. Otherwise, it is
        /// write-back.
        const WRITE_THROUGH = 1 << 3;

        /// Indicates that the memory should not be
        /// cached.
        const NO_CACHE = 1 << 4;

        /// Indicates that the referenced page table or
        /// physical frame has been read since this bit
        /// was last unset.
        const ACCESSED = 1 << 5;

        /// Indicates that the referenced physical frame
        /// has been written since this bit was last
        /// unset.
        const DIRTY = 1 << 6;

        /// Indicates that a directory entry references a
        /// 4 MiB physical frame, rather than a page
        /// table.
        const HUGE_PAGE = 1 << 7;

        /// Indicates that this mapping is not flushed
        /// from the TLB when an address space change
        /// takes place.
        const GLOBAL = 1 << 8;
    }
}

impl PageTableFlags {
    /// Returns whether the `PRESENT` flag is set.
    ///
    pub const fn present(&self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the `WRITABLE` flag is set.
    ///
    pub const fn writable(&self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the `USER_ACCESSIBLE` flag is set.
    ///
    pub const fn user_accessible(&self) -> bool {
        self.contains(Self::USER_ACCESSIBLE)
    }
}

/// Represents a single 32-bit entry in a page directory or
/// page table.
///
/// The low 12 bits of an entry carry its [`PageTableFlags`];
/// the high 20 bits carry the number of the referenced
/// physical frame.
///
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u32,
}

impl PageTableEntry {
    /// Returns a new, empty page table entry.
    ///
    #[inline]
    pub const fn new() -> Self {
        PageTableEntry { entry: 0 }
    }

    /// Returns the entry with the given raw bits.
    ///
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        PageTableEntry { entry: bits }
    }

    /// Returns the entry's raw bits.
    ///
    #[inline]
    pub const fn bits(self) -> u32 {
        self.entry
    }

    /// Clears this entry.
    ///
    #[inline]
    pub fn zero(&mut self) {
        self.entry = 0;
    }

    /// Returns whether the entry is marked as present.
    ///
    #[inline]
    pub const fn is_present(self) -> bool {
        PageTableFlags::from_bits_truncate(self.entry).present()
    }

    /// Returns the flags for this entry.
    ///
    #[inline]
    pub const fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.entry)
    }

    /// Returns the physical address in this entry. Note
    /// that this address will always have the least
    /// significant 12 bits unset.
    ///
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new(self.entry & 0xffff_f000)
    }

    /// Returns the physical frame referenced by this
    /// entry.
    ///
    #[inline]
    pub fn phys_frame(self) -> PhysFrame {
        PhysFrame::from_start_address(self.addr())
    }

    /// Sets the entry's flags, leaving the referenced
    /// frame unchanged.
    ///
    #[inline]
    pub fn set_flags(&mut self, flags: PageTableFlags) {
        self.entry = flags.bits() | self.addr().as_u32();
    }

    /// Sets the entry's physical frame to `frame` and
    /// its flags to `flags`.
    ///
    #[inline]
    pub fn set_frame_flags(&mut self, frame: PhysFrame, flags: PageTableFlags) {
        self.entry = frame.start_address().as_u32() | flags.bits();
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PageTableEntry({:?}, {:?})",
            self.addr(),
            self.flags()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let mut entry = PageTableEntry::new();
        assert!(!entry.is_present());
        assert_eq!(entry.addr(), PhysAddr::zero());

        let frame = PhysFrame::from_number(0x1234);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        entry.set_frame_flags(frame, flags);
        assert!(entry.is_present());
        assert_eq!(entry.flags(), flags);
        assert_eq!(entry.phys_frame(), frame);
        assert_eq!(entry.bits(), 0x0123_4000 | 0b11);

        // Changing the flags preserves the frame.
        entry.set_flags(PageTableFlags::WRITABLE);
        assert!(!entry.is_present());
        assert_eq!(entry.addr(), frame.start_address());

        entry.zero();
        assert_eq!(entry.bits(), 0);
    }

    #[test]
    fn flag_helpers() {
        let flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        assert!(flags.present());
        assert!(!flags.writable());
        assert!(flags.user_accessible());
    }
}
