//! Deferred work drained by the kworker thread.
//!
//! Producers own their [`Work`] items (typically `static`s); the queue only
//! holds references, so queueing never copies the item and a pending item
//! is never queued twice.

use super::wait::{wake_up, WaitQueueHead};
use crate::errors::KResult;
use crate::sched::SchedContext;
use alloc::collections::VecDeque;
use core::fmt;
use portable_atomic::{AtomicBool, Ordering};

/// A deferred callback.
pub struct Work {
    func: fn(usize),
    data: usize,
    pending: AtomicBool,
}

impl Work {
    pub const fn new(func: fn(usize), data: usize) -> Self {
        Self {
            func,
            data,
            pending: AtomicBool::new(false),
        }
    }

    /// Whether the item sits in a queue.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("data", &self.data)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// FIFO of pending work items plus the queue its worker waits on.
#[derive(Default)]
pub struct WorkQueue {
    items: spin::Mutex<VecDeque<&'static Work>>,
    head: WaitQueueHead,
}

impl WorkQueue {
    pub const fn new() -> Self {
        Self {
            items: spin::Mutex::new(VecDeque::new()),
            head: WaitQueueHead::new(),
        }
    }

    /// The wait queue the worker sleeps on.
    pub fn head(&self) -> &WaitQueueHead {
        &self.head
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Append `work` unless it is already pending, then wake the worker.
    ///
    /// # Returns
    ///
    /// `false` if `work` was already queued.
    pub fn schedule_work<C: SchedContext + ?Sized>(&self, k: &C, work: &'static Work) -> KResult<bool> {
        if work.pending.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let flags = k.local_irq_save();
        let queued = {
            let mut items = self.items.lock();
            items.try_reserve(1).map(|()| items.push_back(work))
        };
        k.local_irq_restore(flags);
        if let Err(err) = queued {
            work.pending.store(false, Ordering::Release);
            return Err(err.into());
        }
        wake_up(k, &self.head);
        Ok(true)
    }

    /// Take `work` off the queue if it has not started.
    pub fn cancel_work<C: SchedContext + ?Sized>(&self, k: &C, work: &'static Work) -> bool {
        let flags = k.local_irq_save();
        let removed = {
            let mut items = self.items.lock();
            match items.iter().position(|w| core::ptr::eq(*w, work)) {
                Some(pos) => {
                    items.remove(pos);
                    work.pending.store(false, Ordering::Release);
                    true
                }
                None => false,
            }
        };
        k.local_irq_restore(flags);
        removed
    }

    /// Run every queued item in FIFO order. Items queued by a callback run
    /// in the same pass.
    ///
    /// # Returns
    ///
    /// The number of callbacks run.
    pub fn run_pending<C: SchedContext + ?Sized>(&self, k: &C) -> usize {
        let mut ran = 0;
        loop {
            let flags = k.local_irq_save();
            let next = self.items.lock().pop_front();
            k.local_irq_restore(flags);
            let Some(work) = next else {
                return ran;
            };
            // Cleared first so the callback may requeue its own item.
            work.pending.store(false, Ordering::Release);
            (work.func)(work.data);
            ran += 1;
        }
    }
}
