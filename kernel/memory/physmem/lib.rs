// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical memory management and allocation.
//!
//! This crate manages physical memory in [`FramePool`]s, each of which
//! owns a contiguous range of 4 KiB frames and can hand out runs of
//! consecutive frames, not just single ones. Each pool tracks its frames
//! with a two-bit state map: a frame is free, used, or the head of an
//! allocated sequence. Marking the first frame of every allocation lets
//! a sequence be released later knowing only its first frame number:
//! the pool walks forward from the head until the sequence ends.
//!
//! The state map itself lives in physical memory: either in the first
//! frame(s) of the pool, or in caller-provided frames outside it (see
//! [`MapPlacement`]). The map is reached through the pool's
//! [`PhysMapper`], so the same pool code runs against the kernel's
//! physical memory window and against a test arena.
//!
//! Pools register themselves with a [`FramePoolRegistry`] at
//! construction. The registry provides the pool-agnostic
//! [`release`](FramePoolRegistry::release) operation: at release time a
//! caller knows only the first frame of a sequence, not which pool it
//! came from.
//!
//! # Examples
//!
//! ```
//! use memory::{PhysArena, PhysFrame};
//! use physmem::{FramePool, FramePoolRegistry, MapPlacement};
//! use std::sync::Arc;
//!
//! let mapper = Arc::new(PhysArena::new(17));
//! let registry = FramePoolRegistry::new();
//! let pool = FramePool::new(
//!     PhysFrame::from_number(0),
//!     16,
//!     MapPlacement::Frame(PhysFrame::from_number(16)),
//!     mapper,
//!     &registry,
//! );
//!
//! let run = pool.lock().get_frames(4).unwrap();
//! assert_eq!(registry.release(run), 4); // All four frames return to the pool.
//! ```

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![allow(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

extern crate alloc;

mod pool;
mod registry;

pub use crate::pool::{FramePool, FrameState, MapPlacement};
pub use crate::registry::FramePoolRegistry;

use memory::FRAME_SIZE;

/// The largest number of frames a single pool can manage.
///
/// The pool's two-bit state map must fit in one frame, which
/// holds four states per byte.
///
pub const MAX_POOL_FRAMES: usize = 4 * FRAME_SIZE;

/// Returns the number of frames needed to hold the state map for a
/// pool of `frames` frames.
///
/// Each frame of map storage describes `4 * FRAME_SIZE` frames under
/// the two-bit encoding.
///
pub const fn needed_info_frames(frames: usize) -> usize {
    (frames + MAX_POOL_FRAMES - 1) / MAX_POOL_FRAMES
}
