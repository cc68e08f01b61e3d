// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements block storage devices for the kernel.
//!
//! A [`BlockDevice`] is addressed in 512-byte blocks and is polled:
//! [`is_ready`](BlockDevice::is_ready) reports whether the controller
//! can accept a transfer, and the raw [`read`](BlockDevice::read) and
//! [`write`](BlockDevice::write) assume the caller has already seen it
//! ready, as with a PIO ATA controller. The register sequences that
//! drive real hardware live with the device drivers; this crate
//! provides the device contract, a memory-backed device
//! ([`RamDisk`]), and the policy layer that makes a polled device
//! cooperate with the scheduler ([`BlockingDisk`]).

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

extern crate alloc;

mod blocking;
mod ram;

pub use crate::blocking::BlockingDisk;
pub use crate::ram::{RamDisk, ReadySwitch};

/// The number of bytes in each disk block.
///
pub const BLOCK_SIZE: usize = 512;

/// Describes an error encountered while operating on a device.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The requested block lies beyond the end of the device.
    OutOfRange,

    /// The device encountered an error while performing the
    /// requested operation.
    DeviceError,
}

/// Represents a block storage device.
///
pub trait BlockDevice: Send {
    /// Returns the device capacity as a number of blocks.
    ///
    fn num_blocks(&self) -> usize;

    /// Returns whether the device controller can accept a transfer.
    ///
    /// The raw transfer operations assume readiness; callers that
    /// cannot guarantee it should go through a [`BlockingDisk`].
    ///
    fn is_ready(&self) -> bool;

    /// Copies the given block of the device into `buf`.
    ///
    fn read(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error>;

    /// Copies `buf` to the given block of the device.
    ///
    fn write(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error>;
}
