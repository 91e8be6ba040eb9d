//! Counting semaphore with poll-and-yield contention.

use crate::errors::{KResult, KernelError};
use crate::sched::SchedContext;
use portable_atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct Semaphore {
    count: AtomicU32,
}

impl Semaphore {
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    fn try_take(&self) -> bool {
        self.count
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }

    /// Take one unit, yielding the CPU while none is available.
    ///
    /// # Returns
    ///
    /// `Forbid` when called outside a thread.
    pub fn down<C: SchedContext + ?Sized>(&self, k: &C) -> KResult<()> {
        if k.current_tid().is_none() {
            return Err(KernelError::Forbid);
        }
        while !self.try_take() {
            k.schedule_thread();
        }
        Ok(())
    }

    /// # Returns
    ///
    /// `Busy` if no unit is available.
    pub fn down_try_lock(&self) -> KResult<()> {
        if self.try_take() {
            Ok(())
        } else {
            Err(KernelError::Busy)
        }
    }

    /// Release one unit. Only a semaphore at zero is incremented, so a
    /// binary semaphore can never be over-released.
    ///
    /// # Returns
    ///
    /// Whether the count changed.
    pub fn up(&self) -> bool {
        self.count
            .compare_exchange(0, 1, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeSched;
    use alloc::boxed::Box;

    #[test]
    fn test_down_outside_thread_is_forbidden() {
        let k = FakeSched::new(None);
        let sem = Semaphore::new(1);
        assert_eq!(sem.down(&k), Err(KernelError::Forbid));
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_down_waits_for_up() {
        let k = FakeSched::new(Some(2));
        let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0)));
        k.on_yield(move || {
            sem.up();
        });
        sem.down(&k).unwrap();
        assert_eq!(sem.count(), 0);
        assert_eq!(k.yields.load(Ordering::SeqCst), 1);
        assert_eq!(sem.down_try_lock(), Err(KernelError::Busy));
    }

    #[test]
    fn test_up_only_from_zero() {
        let sem = Semaphore::new(2);
        assert!(!sem.up());
        sem.down_try_lock().unwrap();
        sem.down_try_lock().unwrap();
        assert!(sem.up());
        assert!(!sem.up());
        assert_eq!(sem.count(), 1);
    }
}
