// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides a block device backed by ordinary memory.

use crate::{BlockDevice, Error, BLOCK_SIZE};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

/// A handle that drives a [`RamDisk`]'s readiness from outside.
///
/// A real controller is busy while a transfer is in flight; a memory
/// disk is never genuinely busy, so the readiness is simulated. The
/// switch is what lets a harness hold the disk busy while threads
/// pile up behind it, then release them.
///
#[derive(Clone)]
pub struct ReadySwitch(Arc<AtomicBool>);

impl ReadySwitch {
    /// Sets whether the disk reports itself ready.
    ///
    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::Relaxed);
    }
}

/// A block device stored in memory.
///
/// All blocks start out zeroed, as after
/// a low-level format.
///
pub struct RamDisk {
    blocks: Vec<u8>,
    ready: Arc<AtomicBool>,
}

impl RamDisk {
    /// Returns a zeroed memory disk of `num_blocks` blocks, ready
    /// for transfers.
    ///
    pub fn new(num_blocks: usize) -> Self {
        RamDisk {
            blocks: vec![0u8; num_blocks * BLOCK_SIZE],
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns a switch controlling the disk's readiness.
    ///
    pub fn ready_switch(&self) -> ReadySwitch {
        ReadySwitch(self.ready.clone())
    }

    fn range_of(&self, block: u32) -> Result<core::ops::Range<usize>, Error> {
        let start = block as usize * BLOCK_SIZE;
        if start + BLOCK_SIZE > self.blocks.len() {
            return Err(Error::OutOfRange);
        }

        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> usize {
        self.blocks.len() / BLOCK_SIZE
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn read(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error> {
        let range = self.range_of(block)?;
        buf.copy_from_slice(&self.blocks[range]);
        Ok(())
    }

    fn write(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        let range = self.range_of(block)?;
        self.blocks[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_round_trip() {
        let mut disk = RamDisk::new(4);
        assert_eq!(disk.num_blocks(), 4);
        assert!(disk.is_ready());

        let mut data = [0u8; BLOCK_SIZE];
        data[0] = 0xca;
        data[BLOCK_SIZE - 1] = 0xfe;
        disk.write(2, &data).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        disk.read(2, &mut out).unwrap();
        assert_eq!(out[0], 0xca);
        assert_eq!(out[BLOCK_SIZE - 1], 0xfe);

        // Other blocks stay zeroed.
        disk.read(1, &mut out).unwrap();
        assert_eq!(out, [0u8; BLOCK_SIZE]);
    }

    #[test]
    fn out_of_range_blocks() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(disk.read(4, &mut buf), Err(Error::OutOfRange));
        assert_eq!(disk.write(4, &buf), Err(Error::OutOfRange));
    }

    #[test]
    fn ready_switch() {
        let disk = RamDisk::new(1);
        let switch = disk.ready_switch();
        assert!(disk.is_ready());
        switch.set_ready(false);
        assert!(!disk.is_ready());
        switch.set_ready(true);
        assert!(disk.is_ready());
    }
}
