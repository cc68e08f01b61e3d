// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements a cooperative thread scheduler.
//!
//! The model is a single CPU with no preemption timer: a thread runs
//! until it surrenders the CPU, either by calling
//! [`Scheduler::switch`] directly or by blocking on disk I/O. The
//! scheduler keeps runnable threads in a strict FIFO queue, with one
//! exception: when a blocked disk transfer can finally proceed, its
//! waiting thread is dispatched ahead of the queue head (see
//! [`DiskHandoff`]).
//!
//! Threads themselves (stacks, machine contexts, entry points) are
//! owned by an external thread factory. The scheduler sees them only
//! as [`ThreadId`]s and switches between them through the
//! [`Dispatcher`] trait.
//!
//! Queue mutations are critical sections. They are guarded by masking
//! interrupts through the [`InterruptController`] trait, restoring the
//! previous state on the way out, so the scheduler can be entered with
//! interrupts on or off.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

extern crate alloc;

mod interrupts;
mod scheduler;
mod thread;

pub use crate::interrupts::{without_interrupts, InertInterrupts, InterruptController};
pub use crate::scheduler::{DiskHandoff, Scheduler};
pub use crate::thread::{Dispatcher, ThreadId};

#[cfg(target_arch = "x86")]
pub use crate::interrupts::HardwareInterrupts;
