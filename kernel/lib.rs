// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! kernel implements the core of a small 32-bit x86 kernel.
//!
//! The heavy lifting lives in the subsystem crates; this crate is the
//! composition layer that assembles them into a running core:
//! [`memory::init`] builds the frame pools and the first address
//! space over a machine description, and [`tasks::init`] wires up the
//! cooperative scheduler and the blocking disk.
//!
//! # Kernel subsystems
//!
//! Several parts of kernel functionality are provided in separate
//! crates. These are:
//!
//! - [filesystem](::filesystem)
//! - [memory](::memory)
//! - [memory/physmem](::physmem)
//! - [memory/virtmem](::virtmem)
//! - [multitasking](::multitasking)
//! - [storage](::storage)
//! - [utils/dibits](::dibits)

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![allow(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![allow(unused_crate_dependencies)] // This is to allow the doc references above.

extern crate alloc;

pub mod memory;
pub mod tasks;

pub use crate::memory::{MachineLayout, MemorySystem};
pub use crate::tasks::TaskSystem;
