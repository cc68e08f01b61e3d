// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Assembles the scheduler and the blocking disk.

use alloc::sync::Arc;
use multitasking::{Dispatcher, InterruptController, Scheduler};
use storage::{BlockDevice, BlockingDisk};

/// The assembled multitasking system.
///
pub struct TaskSystem {
    /// The system scheduler.
    pub scheduler: Arc<Scheduler>,
}

/// Builds the scheduler over the thread factory and interrupt
/// controller the platform provides.
///
pub fn init(
    dispatcher: Arc<dyn Dispatcher>,
    interrupts: Arc<dyn InterruptController>,
) -> TaskSystem {
    let scheduler = Arc::new(Scheduler::new(dispatcher, interrupts));

    log::info!("scheduler initialised");

    TaskSystem { scheduler }
}

impl TaskSystem {
    /// Wraps `device` in a [`BlockingDisk`] attached to the system
    /// scheduler, so threads park instead of spinning while its
    /// controller is busy.
    ///
    pub fn attach_disk<D: BlockDevice + 'static>(&self, device: D) -> Arc<BlockingDisk<D>> {
        BlockingDisk::new(device, self.scheduler.clone())
    }
}
