// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements an inode-based file system over a single block device.
//!
//! Files are identified by number, not name, and each file owns
//! exactly one data block, so a file is at most
//! [`BLOCK_SIZE`](storage::BLOCK_SIZE) bytes. The on-disk layout is
//! correspondingly small:
//!
//! - **Block 0** holds the free-block map: one byte per block, `b'f'`
//!   for free, `b'u'` for used. Blocks 0 and 1 are permanently used,
//!   and entries past the end of the device are marked used so they
//!   can never be allocated.
//! - **Block 1** holds the inode table: [`MAX_INODES`] fixed-size
//!   records (see [`Inode`]).
//! - **Blocks 2 onwards** hold file data, one file per block.
//!
//! [`FileSystem`] keeps both metadata blocks in memory for the
//! lifetime of the mount and writes them back when flushed or
//! dropped, so an image is consistent after a clean shutdown. Mounts
//! trust the image: only [`format`](FileSystem::format) ever builds
//! one from scratch, and corruption is not detected.
//!
//! [`File`] is a sequential read/write handle with a cursor and a
//! one-block cache: the file's single data block, read at open and
//! written back at close.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![forbid(unsafe_code)]

extern crate alloc;

mod file;
mod file_system;
mod inode;

pub use crate::file::File;
pub use crate::file_system::FileSystem;
pub use crate::inode::{Inode, MAX_INODES};

/// Describes an error encountered while operating on the file
/// system.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// A file with the requested id already exists.
    FileExists,

    /// No file with the requested id exists.
    FileNotFound,

    /// Every inode is in use.
    InodesExhausted,

    /// Every data block is in use.
    BlocksExhausted,

    /// The underlying device failed.
    Disk(storage::Error),
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        Error::Disk(err)
    }
}
