// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides sequential file handles.

use crate::file_system::FileSystem;
use crate::Error;
use alloc::sync::Arc;
use spin::Mutex;
use storage::BLOCK_SIZE;

/// An open file, supporting sequential reads and writes through a
/// cursor.
///
/// The file's single data block is cached in the handle: it is read
/// from disk when the file is opened and written back when the file
/// is closed, along with the inode table. In between, reads and
/// writes touch only the cache.
///
pub struct File {
    fs: Arc<Mutex<FileSystem>>,

    inode_index: usize,
    id: i32,
    block: u32,
    size: u32,

    // The cursor, as a byte offset into the data block.
    cursor: u32,

    cache: [u8; BLOCK_SIZE],

    closed: bool,
}

impl File {
    /// Opens the file with the given id, caching its data block.
    /// The cursor starts at the beginning of the file.
    ///
    pub fn open(fs: &Arc<Mutex<FileSystem>>, id: i32) -> Result<File, Error> {
        let mut cache = [0u8; BLOCK_SIZE];
        let (inode_index, block, size) = {
            let mut fs = fs.lock();
            let inode_index = fs.lookup_file(id)?;
            let inode = *fs.inode(inode_index);
            fs.read_block(inode.block, &mut cache)?;

            (inode_index, inode.block, inode.size)
        };

        log::debug!("opened file {} with {} bytes", id, size);

        Ok(File {
            fs: fs.clone(),
            inode_index,
            id,
            block,
            size,
            cursor: 0,
            cache,
            closed: false,
        })
    }

    /// Returns the file's id.
    ///
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the file's size in bytes.
    ///
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Copies bytes from the file into `buf`, starting at the
    /// cursor, and advances the cursor past them. Returns the number
    /// of bytes read, which stops short at the end of the file.
    ///
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let available = (self.size - self.cursor) as usize;
        let count = buf.len().min(available);
        let start = self.cursor as usize;
        buf[..count].copy_from_slice(&self.cache[start..start + count]);
        self.cursor += count as u32;

        count
    }

    /// Copies bytes from `buf` into the file at the cursor, and
    /// advances the cursor past them. Writing extends the file, but
    /// never past the single data block: a write that would run past
    /// [`BLOCK_SIZE`] bytes is silently truncated, and the number of
    /// bytes actually written is returned.
    ///
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let room = BLOCK_SIZE - self.cursor as usize;
        let count = buf.len().min(room);
        let start = self.cursor as usize;
        self.cache[start..start + count].copy_from_slice(&buf[..count]);
        self.cursor += count as u32;
        if self.cursor > self.size {
            self.size = self.cursor;
        }

        count
    }

    /// Moves the cursor back to the beginning of the file.
    ///
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Returns whether the cursor is at (or past) the end of the
    /// file.
    ///
    pub fn eof(&self) -> bool {
        self.cursor >= self.size
    }

    /// Closes the file, writing the cached data block back to disk
    /// and persisting the inode table.
    ///
    pub fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        self.writeback()
    }

    /// Writes the cached block, the file's size, and the inode
    /// table back to disk.
    ///
    fn writeback(&mut self) -> Result<(), Error> {
        let mut fs = self.fs.lock();
        fs.write_block(self.block, &self.cache)?;
        fs.set_file_size(self.inode_index, self.size);
        fs.write_inode_table()?;

        log::debug!("closed file {} with {} bytes", self.id, self.size);

        Ok(())
    }
}

impl Drop for File {
    /// Flushes the file as a best effort if it was dropped without
    /// [`close`](Self::close).
    ///
    fn drop(&mut self) {
        if !self.closed && self.writeback().is_err() {
            log::error!("failed to flush file {} at drop", self.id);
        }
    }
}
