// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the mounted file system: the free-block map, the inode
//! table, and file creation and deletion.

use crate::inode::{Inode, INODE_SIZE};
use crate::{Error, MAX_INODES};
use alloc::boxed::Box;
use storage::{BlockDevice, BLOCK_SIZE};

// The fixed metadata blocks.
pub(crate) const FREE_MAP_BLOCK: u32 = 0;
pub(crate) const INODE_TABLE_BLOCK: u32 = 1;

// The free-block map entries.
const FREE: u8 = b'f';
const USED: u8 = b'u';

/// A mounted file system.
///
/// The free-block map and inode table are held in memory for the
/// lifetime of the mount. [`flush`](Self::flush) writes them back;
/// dropping the file system flushes as a best effort, so a clean
/// shutdown leaves a consistent image.
///
pub struct FileSystem {
    disk: Box<dyn BlockDevice>,

    // The free-block map, one byte per block. Entries past
    // `num_blocks` are marked used.
    free_blocks: [u8; BLOCK_SIZE],

    inodes: [Inode; MAX_INODES],
    used_inodes: usize,

    num_blocks: usize,
}

impl FileSystem {
    /// Writes a fresh, empty file system onto the first `size` bytes
    /// of `disk`.
    ///
    /// The free-block map marks the two metadata blocks used and
    /// every data block free, and the inode table is entirely free.
    /// A device larger than the map can describe is truncated to
    /// [`BLOCK_SIZE`] blocks.
    ///
    pub fn format(disk: &mut dyn BlockDevice, size: usize) -> Result<(), Error> {
        let num_blocks = usable_blocks(disk, size);

        let mut map = [USED; BLOCK_SIZE];
        for entry in map.iter_mut().take(num_blocks).skip(2) {
            *entry = FREE;
        }

        disk.write(FREE_MAP_BLOCK, &map)?;

        let mut table = [0u8; BLOCK_SIZE];
        for slot in 0..MAX_INODES {
            Inode::empty().serialise_into(record_mut(&mut table, slot));
        }

        disk.write(INODE_TABLE_BLOCK, &table)?;

        log::info!("formatted file system of {} blocks", num_blocks);

        Ok(())
    }

    /// Mounts the file system on `disk`, reading the free-block map
    /// and inode table into memory.
    ///
    /// The image is trusted to have been produced by
    /// [`format`](Self::format); corruption is not detected.
    ///
    pub fn mount(mut disk: Box<dyn BlockDevice>) -> Result<FileSystem, Error> {
        let mut free_blocks = [0u8; BLOCK_SIZE];
        disk.read(FREE_MAP_BLOCK, &mut free_blocks)?;

        let mut table = [0u8; BLOCK_SIZE];
        disk.read(INODE_TABLE_BLOCK, &mut table)?;

        let mut inodes = [Inode::empty(); MAX_INODES];
        let mut used_inodes = 0;
        for (slot, inode) in inodes.iter_mut().enumerate() {
            *inode = Inode::deserialise(record(&table, slot));
            if !inode.free {
                used_inodes += 1;
            }
        }

        let num_blocks = usable_blocks(disk.as_ref(), usize::MAX);

        log::info!(
            "mounted file system of {} blocks, {} files",
            num_blocks,
            used_inodes
        );

        Ok(FileSystem {
            disk,
            free_blocks,
            inodes,
            used_inodes,
            num_blocks,
        })
    }

    /// Writes the free-block map and inode table back to disk.
    ///
    pub fn flush(&mut self) -> Result<(), Error> {
        let map = self.free_blocks;
        self.disk.write(FREE_MAP_BLOCK, &map)?;
        self.write_inode_table()
    }

    /// Returns the index of the inode for the given file id.
    ///
    pub fn lookup_file(&self, id: i32) -> Result<usize, Error> {
        self.inodes
            .iter()
            .position(|inode| !inode.free && inode.id == id)
            .ok_or(Error::FileNotFound)
    }

    /// Returns the inode at the given index.
    ///
    pub fn inode(&self, index: usize) -> &Inode {
        &self.inodes[index]
    }

    /// Creates an empty file with the given id, claiming the first
    /// free inode and the first free data block.
    ///
    pub fn create_file(&mut self, id: i32) -> Result<(), Error> {
        if self.lookup_file(id).is_ok() {
            return Err(Error::FileExists);
        }

        let slot = self
            .inodes
            .iter()
            .position(|inode| inode.free)
            .ok_or(Error::InodesExhausted)?;

        let block = self.free_blocks[..self.num_blocks]
            .iter()
            .position(|entry| *entry == FREE)
            .ok_or(Error::BlocksExhausted)?;

        self.inodes[slot] = Inode {
            id,
            block: block as u32,
            size: 0,
            free: false,
        };
        self.free_blocks[block] = USED;
        self.used_inodes += 1;

        log::debug!("created file {} in block {}", id, block);

        Ok(())
    }

    /// Deletes the file with the given id, freeing its inode and its
    /// data block.
    ///
    pub fn delete_file(&mut self, id: i32) -> Result<(), Error> {
        let slot = self.lookup_file(id)?;
        let block = self.inodes[slot].block as usize;

        self.free_blocks[block] = FREE;
        self.inodes[slot] = Inode::empty();
        self.used_inodes -= 1;

        log::debug!("deleted file {}", id);

        Ok(())
    }

    /// Returns the number of files in the file system.
    ///
    pub fn used_inodes(&self) -> usize {
        self.used_inodes
    }

    /// Returns the number of blocks marked used in the free-block
    /// map, the two metadata blocks included.
    ///
    pub fn used_blocks(&self) -> usize {
        self.free_blocks[..self.num_blocks]
            .iter()
            .filter(|entry| **entry == USED)
            .count()
    }

    /// Returns the device capacity in blocks, as mounted.
    ///
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    // Support for `File` handles.

    pub(crate) fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error> {
        self.disk.read(block, buf)?;
        Ok(())
    }

    pub(crate) fn write_block(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        self.disk.write(block, buf)?;
        Ok(())
    }

    pub(crate) fn set_file_size(&mut self, index: usize, size: u32) {
        self.inodes[index].size = size;
    }

    pub(crate) fn write_inode_table(&mut self) -> Result<(), Error> {
        let mut table = [0u8; BLOCK_SIZE];
        for (slot, inode) in self.inodes.iter().enumerate() {
            inode.serialise_into(record_mut(&mut table, slot));
        }

        self.disk.write(INODE_TABLE_BLOCK, &table)?;
        Ok(())
    }
}

impl Drop for FileSystem {
    /// Unmounts the file system, flushing the metadata blocks as a
    /// best effort. Callers that need the result should call
    /// [`flush`](Self::flush) first.
    ///
    fn drop(&mut self) {
        if self.flush().is_err() {
            log::error!("failed to flush file system metadata at unmount");
        }
    }
}

/// Returns the record for inode `slot` within the table block.
///
fn record(table: &[u8; BLOCK_SIZE], slot: usize) -> &[u8] {
    &table[slot * INODE_SIZE..(slot + 1) * INODE_SIZE]
}

fn record_mut(table: &mut [u8; BLOCK_SIZE], slot: usize) -> &mut [u8] {
    &mut table[slot * INODE_SIZE..(slot + 1) * INODE_SIZE]
}

/// Returns the number of blocks the file system can manage on
/// `disk`: no more than the device holds, no more than requested,
/// and no more than the one-block map can describe.
///
fn usable_blocks(disk: &dyn BlockDevice, size: usize) -> usize {
    let requested = size / BLOCK_SIZE;
    let device = disk.num_blocks();

    requested.min(device).min(BLOCK_SIZE)
}
