//! Cooperative spinlock.
//!
//! Holding a [`SpinLock`] keeps the scheduler from switching threads, which
//! on a single core is enough for mutual exclusion between threads. Data also
//! touched from interrupt context needs the `_irqsave` variants. There is no
//! owner tracking: taking a lock twice from the same thread deadlocks.

use crate::arch::IrqFlags;
use crate::errors::{KResult, KernelError};
use crate::sched::SchedContext;
use portable_atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct SpinLock {
    count: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.count.load(Ordering::Acquire) != 0
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.count
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Busy-wait for the lock, then disable preemption.
    pub fn lock<C: SchedContext + ?Sized>(&self, k: &C) {
        while !self.try_acquire() {
            while self.is_locked() {
                core::hint::spin_loop();
            }
        }
        k.preempt_disable();
    }

    /// Release the lock and re-enable preemption. Releasing a free lock is
    /// logged and otherwise ignored.
    pub fn unlock<C: SchedContext + ?Sized>(&self, k: &C) {
        let released = self
            .count
            .fetch_update(Ordering::Release, Ordering::Relaxed, |c| c.checked_sub(1));
        match released {
            Ok(_) => k.preempt_enable(),
            Err(_) => log::warn!("unlock of a free spinlock"),
        }
    }

    /// Take the lock without waiting.
    ///
    /// # Returns
    ///
    /// `Busy` if it is held.
    pub fn trylock<C: SchedContext + ?Sized>(&self, k: &C) -> KResult<()> {
        if !self.try_acquire() {
            return Err(KernelError::Busy);
        }
        k.preempt_disable();
        Ok(())
    }

    /// Mask interrupts, then take the lock.
    pub fn lock_irqsave<C: SchedContext + ?Sized>(&self, k: &C) -> IrqFlags {
        let flags = k.local_irq_save();
        self.lock(k);
        flags
    }

    pub fn unlock_irqrestore<C: SchedContext + ?Sized>(&self, k: &C, flags: IrqFlags) {
        self.unlock(k);
        k.local_irq_restore(flags);
    }
}
