//! Binary mutex with poll-and-yield contention.

use crate::errors::{KResult, KernelError};
use crate::sched::SchedContext;
use portable_atomic::{AtomicU32, Ordering};

/// A mutex that never parks its waiters. A contender stays ready and
/// retries after each full reschedule.
#[derive(Debug, Default)]
pub struct Mutex {
    count: AtomicU32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.count.load(Ordering::Acquire) != 0
    }

    fn try_acquire(&self) -> bool {
        self.count
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock<C: SchedContext + ?Sized>(&self, k: &C) {
        while !self.try_acquire() {
            k.schedule_thread();
        }
    }

    /// # Returns
    ///
    /// `Busy` if the mutex is held.
    pub fn try_lock(&self) -> KResult<()> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(KernelError::Busy)
        }
    }

    /// Release the mutex. There is no owner check.
    pub fn unlock(&self) {
        let released = self
            .count
            .fetch_update(Ordering::Release, Ordering::Relaxed, |c| c.checked_sub(1));
        if released.is_err() {
            log::warn!("unlock of a free mutex");
        }
    }
}
