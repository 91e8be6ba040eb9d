//! Locks, wait queues and deferred work, written against [`SchedContext`].
//!
//! None of the locks own the threads contending for them. They gate access
//! by polling and yielding the CPU, so none of them is starvation-free.

pub mod mutex;
pub mod semaphore;
pub mod spinlock;
pub mod wait;
pub mod workqueue;

pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spinlock::SpinLock;
pub use wait::{
    wait_event, wait_event_interruptible, wait_event_interruptible_timeout, wait_event_timeout,
    wake_up, wake_up_interruptible, WaitQueueHead,
};
pub use workqueue::{Work, WorkQueue};

#[cfg(test)]
pub(crate) mod testing {
    //! A scheduler stand-in that never switches: yields run a hook, timeouts
    //! advance the clock.

    use crate::arch::IrqFlags;
    use crate::errors::{KResult, KernelError};
    use crate::sched::SchedContext;
    use crate::thread::{Signal, SignalSet, Tid};
    use crate::time::Jiffies;
    use alloc::boxed::Box;
    use portable_atomic::{AtomicU32, Ordering};

    type Hook = Box<dyn FnMut() + Send>;

    pub(crate) struct FakeSched {
        pub(crate) current: Option<Tid>,
        pub(crate) jiffies: AtomicU32,
        pub(crate) preempt: AtomicU32,
        pub(crate) yields: AtomicU32,
        pub(crate) suspends: AtomicU32,
        pub(crate) signals: SignalSet,
        on_yield: spin::Mutex<Option<Hook>>,
    }

    impl FakeSched {
        pub(crate) fn new(current: Option<u16>) -> Self {
            Self {
                current: current.and_then(Tid::new),
                jiffies: AtomicU32::new(0),
                preempt: AtomicU32::new(0),
                yields: AtomicU32::new(0),
                suspends: AtomicU32::new(0),
                signals: SignalSet::new(),
                on_yield: spin::Mutex::new(None),
            }
        }

        pub(crate) fn on_yield(&self, hook: impl FnMut() + Send + 'static) {
            *self.on_yield.lock() = Some(Box::new(hook));
        }

        fn run_hook(&self) {
            if let Some(hook) = self.on_yield.lock().as_mut() {
                hook();
            }
        }
    }

    impl SchedContext for FakeSched {
        fn current_tid(&self) -> Option<Tid> {
            self.current
        }

        fn jiffies(&self) -> Jiffies {
            self.jiffies.load(Ordering::SeqCst)
        }

        fn schedule_thread(&self) {
            self.yields.fetch_add(1, Ordering::SeqCst);
            self.run_hook();
        }

        fn schedule_timeout(&self, timeout: Jiffies) -> KResult<Jiffies> {
            if self.current.is_none() {
                return Err(KernelError::Forbid);
            }
            self.suspends.fetch_add(1, Ordering::SeqCst);
            self.jiffies.fetch_add(timeout, Ordering::SeqCst);
            self.run_hook();
            Ok(0)
        }

        fn preempt_disable(&self) {
            self.preempt.fetch_add(1, Ordering::SeqCst);
        }

        fn preempt_enable(&self) {
            let _ = self
                .preempt
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        }

        fn local_irq_save(&self) -> IrqFlags {
            IrqFlags(true)
        }

        fn local_irq_restore(&self, _flags: IrqFlags) {}

        fn arm_signal(&self, tid: Tid, mode: Signal) -> KResult<()> {
            if Some(tid) != self.current {
                return Err(KernelError::NotFound);
            }
            self.signals.clear(Signal::ARMED | Signal::WAKEUP);
            self.signals.raise(mode);
            Ok(())
        }

        fn disarm_signal(&self, _tid: Tid) {
            self.signals.clear(Signal::ARMED | Signal::WAKEUP);
        }

        fn state_pending(&self, _tid: Tid, mask: Signal) -> Signal {
            self.signals.take(mask & Signal::PENDING)
        }

        fn signal_wakeup(&self, _tid: Tid, armed: Signal) -> bool {
            self.signals.wake_if_armed(armed)
        }
    }
}
