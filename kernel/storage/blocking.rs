// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the blocking layer over a polled block device.

use crate::{BlockDevice, Error, BLOCK_SIZE};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use multitasking::{DiskHandoff, Scheduler, ThreadId};
use spin::Mutex;

/// A block device that parks threads instead of spinning on a busy
/// controller.
///
/// A raw polled device expects its caller to wait until the
/// controller is ready. Spinning would waste the one CPU this kernel
/// has, so the blocking disk puts the calling thread on a FIFO
/// waiter queue and surrenders the CPU instead. The scheduler holds
/// a [`DiskHandoff`] reference to the disk and dispatches the head
/// waiter, ahead of the ordinary ready queue, as soon as it sees the
/// controller ready, so the thread resumes precisely when its
/// transfer can proceed.
///
pub struct BlockingDisk<D> {
    device: Mutex<D>,

    // Threads parked until the controller is ready, oldest first.
    waiters: Mutex<VecDeque<ThreadId>>,

    scheduler: Arc<Scheduler>,
}

impl<D: BlockDevice + 'static> BlockingDisk<D> {
    /// Wraps `device` and attaches the result to `scheduler`, so
    /// that parked transfers take dispatch priority once the
    /// controller is ready.
    ///
    pub fn new(device: D, scheduler: Arc<Scheduler>) -> Arc<BlockingDisk<D>> {
        let disk = Arc::new(BlockingDisk {
            device: Mutex::new(device),
            waiters: Mutex::new(VecDeque::new()),
            scheduler,
        });
        disk.scheduler.update_disk(disk.clone());

        disk
    }

    /// Returns the device capacity as a number of blocks.
    ///
    pub fn num_blocks(&self) -> usize {
        self.device.lock().num_blocks()
    }

    /// Copies the given block of the device into `buf`, blocking the
    /// calling thread while the controller is busy.
    ///
    pub fn read(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error> {
        self.wait_until_ready();
        self.device.lock().read(block, buf)
    }

    /// Copies `buf` to the given block of the device, blocking the
    /// calling thread while the controller is busy.
    ///
    pub fn write(&self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        self.wait_until_ready();
        self.device.lock().write(block, buf)
    }

    /// Parks the calling thread until the controller is ready.
    ///
    /// When the controller is busy, the thread joins the waiter
    /// queue and gives up the CPU. It runs again only when the
    /// scheduler has seen the controller ready and dispatched it,
    /// so on return the transfer can proceed.
    ///
    fn wait_until_ready(&self) {
        if !self.device.lock().is_ready() {
            let current = self.scheduler.current_thread();
            self.waiters.lock().push_back(current);
            log::debug!("{:?} waiting for the disk controller", current);
            self.scheduler.switch();
        }
    }
}

impl<D: BlockDevice> DiskHandoff for BlockingDisk<D> {
    fn disk_ready(&self) -> bool {
        self.device.lock().is_ready()
    }

    fn pop_waiter(&self) -> Option<ThreadId> {
        self.waiters.lock().pop_front()
    }
}

// The blocking disk is itself a block device, so anything built on
// the device contract (the file system in particular) can sit on
// either a raw disk or a blocking one. The handle is shared, hence
// the implementation on `Arc`.
impl<D: BlockDevice + 'static> BlockDevice for Arc<BlockingDisk<D>> {
    fn num_blocks(&self) -> usize {
        (**self).num_blocks()
    }

    fn is_ready(&self) -> bool {
        self.device.lock().is_ready()
    }

    fn read(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Error> {
        (**self).read(block, buf)
    }

    fn write(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
        (**self).write(block, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RamDisk, ReadySwitch};
    use alloc::vec::Vec;
    use multitasking::{Dispatcher, InertInterrupts};

    // A thread factory that records dispatches instead of switching
    // stacks.
    struct TestDispatcher {
        current: Mutex<ThreadId>,
        dispatched: Mutex<Vec<ThreadId>>,
    }

    impl TestDispatcher {
        fn new(initial: ThreadId) -> Self {
            TestDispatcher {
                current: Mutex::new(initial),
                dispatched: Mutex::new(Vec::new()),
            }
        }

        fn dispatched(&self) -> Vec<ThreadId> {
            self.dispatched.lock().clone()
        }
    }

    impl Dispatcher for TestDispatcher {
        fn current_thread(&self) -> ThreadId {
            *self.current.lock()
        }

        fn dispatch_to(&self, thread: ThreadId) {
            self.dispatched.lock().push(thread);
            *self.current.lock() = thread;
        }
    }

    fn thread(id: u64) -> ThreadId {
        ThreadId::new(id)
    }

    fn test_disk() -> (
        Arc<TestDispatcher>,
        Arc<Scheduler>,
        Arc<BlockingDisk<RamDisk>>,
        ReadySwitch,
    ) {
        let dispatcher = Arc::new(TestDispatcher::new(thread(0)));
        let scheduler = Arc::new(Scheduler::new(
            dispatcher.clone(),
            Arc::new(InertInterrupts::new()),
        ));
        let device = RamDisk::new(8);
        let switch = device.ready_switch();
        let disk = BlockingDisk::new(device, scheduler.clone());

        (dispatcher, scheduler, disk, switch)
    }

    #[test]
    fn ready_controller_passes_straight_through() {
        let (dispatcher, _scheduler, mut disk, _switch) = test_disk();

        let mut data = [0u8; BLOCK_SIZE];
        data[7] = 0x77;
        disk.write(3, &data).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        disk.read(3, &mut out).unwrap();
        assert_eq!(out[7], 0x77);

        // Nobody was parked and nothing was dispatched.
        assert_eq!(disk.pop_waiter(), None);
        assert!(dispatcher.dispatched().is_empty());
    }

    #[test]
    fn busy_controller_parks_the_caller() {
        let (dispatcher, scheduler, mut disk, switch) = test_disk();

        // Thread 1 is runnable; thread 0 is running and hits a busy
        // controller. It must be parked, and the CPU must go to
        // thread 1, not back into a spin.
        scheduler.resume(thread(1));
        switch.set_ready(false);

        let mut buf = [0u8; BLOCK_SIZE];
        disk.read(2, &mut buf).unwrap();
        assert_eq!(dispatcher.dispatched(), [thread(1)]);

        // Once the controller reports ready, the next switch from
        // any thread hands the CPU to the parked waiter, ahead of
        // the queued thread 2.
        scheduler.resume(thread(2));
        switch.set_ready(true);
        scheduler.switch();
        assert_eq!(dispatcher.dispatched(), [thread(1), thread(0)]);
        assert_eq!(disk.pop_waiter(), None);
    }

    #[test]
    fn waiters_are_fifo() {
        let (_dispatcher, scheduler, mut disk, switch) = test_disk();

        switch.set_ready(false);
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read(0, &mut buf).unwrap(); // Parks thread 0.

        // A second thread blocks behind the first.
        // (Simulate the thread switch by parking directly.)
        scheduler.resume(thread(5));
        scheduler.switch(); // Dispatches 5; disk still busy.
        disk.read(1, &mut buf).unwrap(); // Parks thread 5.

        assert_eq!(disk.pop_waiter(), Some(thread(0)));
        assert_eq!(disk.pop_waiter(), Some(thread(5)));
        assert_eq!(disk.pop_waiter(), None);
    }
}
