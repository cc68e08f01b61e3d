// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the on-disk inode record.

use storage::BLOCK_SIZE;

/// The number of bytes each inode occupies on disk.
///
pub(crate) const INODE_SIZE: usize = 16;

/// The number of inodes in the file system.
///
/// The whole inode table must fit the single metadata block that
/// stores it.
///
pub const MAX_INODES: usize = BLOCK_SIZE / INODE_SIZE;

/// Associates a file identifier with the file's single data block.
///
/// On disk an inode is a 16-byte little-endian record: the id, the
/// data block number, the file size, one flag byte (zero when the
/// inode is free), and padding.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inode {
    /// The file's identifier.
    pub id: i32,

    /// The data block owned by the file.
    pub block: u32,

    /// The file's size in bytes.
    pub size: u32,

    /// Whether this inode is unused.
    pub free: bool,
}

impl Inode {
    /// Returns an unused inode.
    ///
    pub const fn empty() -> Self {
        Inode {
            id: -1,
            block: 0,
            size: 0,
            free: true,
        }
    }

    /// Serialises the inode into its on-disk record.
    ///
    pub(crate) fn serialise_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.block.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12] = if self.free { 0 } else { 1 };
        out[13..INODE_SIZE].fill(0);
    }

    /// Deserialises an inode from its on-disk record.
    ///
    pub(crate) fn deserialise(bytes: &[u8]) -> Self {
        let mut id = [0u8; 4];
        let mut block = [0u8; 4];
        let mut size = [0u8; 4];
        id.copy_from_slice(&bytes[0..4]);
        block.copy_from_slice(&bytes[4..8]);
        size.copy_from_slice(&bytes[8..12]);

        Inode {
            id: i32::from_le_bytes(id),
            block: u32::from_le_bytes(block),
            size: u32::from_le_bytes(size),
            free: bytes[12] == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip() {
        let inode = Inode {
            id: 7,
            block: 3,
            size: 5,
            free: false,
        };

        let mut record = [0u8; INODE_SIZE];
        inode.serialise_into(&mut record);
        assert_eq!(Inode::deserialise(&record), inode);

        // The empty inode round-trips too, and its record is
        // almost all zeroes (the id is -1).
        let mut record = [0u8; INODE_SIZE];
        Inode::empty().serialise_into(&mut record);
        assert_eq!(Inode::deserialise(&record), Inode::empty());
        assert_eq!(&record[4..], [0u8; INODE_SIZE - 4]);
    }

    #[test]
    fn table_fits_its_block() {
        assert_eq!(MAX_INODES, 32);
        assert!(MAX_INODES * INODE_SIZE <= BLOCK_SIZE);
    }
}
