// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the cooperative FIFO scheduler.

use crate::interrupts::{without_interrupts, InterruptController};
use crate::thread::{Dispatcher, ThreadId};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

/// The scheduler's view of a blocking disk.
///
/// A blocking disk keeps its own FIFO queue of threads that tried to
/// start a transfer while the controller was busy. The scheduler asks
/// the disk for a waiter whenever the controller is ready, so a woken
/// transfer takes priority over the ordinary ready queue.
///
pub trait DiskHandoff: Send + Sync {
    /// Returns whether the disk controller can accept a transfer
    /// now.
    ///
    fn disk_ready(&self) -> bool;

    /// Removes and returns the thread that has been waiting for the
    /// controller the longest, if any.
    ///
    fn pop_waiter(&self) -> Option<ThreadId>;
}

/// A basic cooperative thread scheduler.
///
/// Runnable threads wait in a FIFO queue; the running thread is never
/// in the queue. Nothing preempts the running thread: the CPU moves
/// on only when the thread calls [`switch`](Self::switch), directly
/// or via a blocking operation.
///
pub struct Scheduler {
    // The runnable queue, in dispatch order.
    runnable: Mutex<VecDeque<ThreadId>>,

    // The blocking disk, once one has been attached.
    disk: Mutex<Option<Arc<dyn DiskHandoff>>>,

    dispatcher: Arc<dyn Dispatcher>,
    interrupts: Arc<dyn InterruptController>,
}

impl Scheduler {
    /// Returns a scheduler with an empty ready queue.
    ///
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        interrupts: Arc<dyn InterruptController>,
    ) -> Scheduler {
        Scheduler {
            runnable: Mutex::new(VecDeque::new()),
            disk: Mutex::new(None),
            dispatcher,
            interrupts,
        }
    }

    /// Returns the id of the currently running thread, as reported
    /// by the thread factory.
    ///
    pub fn current_thread(&self) -> ThreadId {
        self.dispatcher.current_thread()
    }

    /// Attaches a blocking disk, giving its waiters dispatch
    /// priority whenever the controller is ready.
    ///
    pub fn update_disk(&self, disk: Arc<dyn DiskHandoff>) {
        without_interrupts(&*self.interrupts, || {
            *self.disk.lock() = Some(disk);
        });
    }

    /// Surrenders the CPU to the next thread able to run.
    ///
    /// If the attached disk is ready and has a waiting thread, that
    /// thread runs next, ahead of the ready queue. Otherwise the head
    /// of the ready queue runs. With nothing to run, `switch` simply
    /// returns and the caller continues.
    ///
    /// The caller is not re-queued: a thread that wants to run again
    /// must be the subject of a [`resume`](Self::resume), typically
    /// performed by whatever event it is waiting on.
    ///
    pub fn switch(&self) {
        without_interrupts(&*self.interrupts, || {
            // A ready disk transfer outranks the queue head.
            let disk = self.disk.lock().clone();
            if let Some(disk) = disk {
                if disk.disk_ready() {
                    if let Some(waiter) = disk.pop_waiter() {
                        log::debug!("dispatching disk waiter {:?}", waiter);
                        self.dispatcher.dispatch_to(waiter);
                        return;
                    }
                }
            }

            let next = self.runnable.lock().pop_front();
            if let Some(next) = next {
                self.dispatcher.dispatch_to(next);
            }
        });
    }

    /// Appends the given thread to the ready queue.
    ///
    pub fn resume(&self, thread: ThreadId) {
        without_interrupts(&*self.interrupts, || {
            self.runnable.lock().push_back(thread);
        });
    }

    /// Makes the given thread runnable. This is called once after
    /// thread creation and is equivalent to
    /// [`resume`](Self::resume).
    ///
    pub fn add(&self, thread: ThreadId) {
        self.resume(thread);
    }

    /// Removes the given thread from the scheduler ahead of its
    /// destruction.
    ///
    /// A thread may terminate itself: in that case the CPU is handed
    /// to the next runnable thread, and since the terminated thread
    /// is never resumed, the dispatch never returns.
    ///
    pub fn terminate(&self, thread: ThreadId) {
        if thread == self.dispatcher.current_thread() {
            // The current thread is not in the ready queue, so there
            // is nothing to unlink; just surrender the CPU for good.
            self.switch();
            return;
        }

        without_interrupts(&*self.interrupts, || {
            self.runnable.lock().retain(|queued| *queued != thread);
        });
    }

    /// Logs the scheduler's state.
    ///
    pub fn debug(&self) {
        without_interrupts(&*self.interrupts, || {
            let runnable = self.runnable.lock();
            log::debug!(
                "{} runnable threads behind {:?}",
                runnable.len(),
                self.dispatcher.current_thread()
            );
        });
    }
}
