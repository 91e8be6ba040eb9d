//! The built-in threads.
//!
//! Boot code calls [`Kernel::start_kernel`], which turns the boot context into
//! the idle thread and creates `kthread`. That one arms the preemption
//! checker (preemptive policies only), creates `init` and `kworker`, and goes
//! to sleep.
//!
//! | thread  | priority             | job                                  |
//! |---------|----------------------|--------------------------------------|
//! | idle    | [`priority::IDLE`]   | fallback dispatcher, reaps zombies   |
//! | kworker | [`priority::KWORKER`]| drains the kernel workqueue          |
//! | init    | [`priority::INIT`]   | runs initcalls, then housekeeping    |
//! | kthread | [`priority::KTHREAD`]| owns the preemption checker          |

use crate::arch::Arch;
use crate::config::priority;
use crate::errors::{KResult, KernelError};
use crate::kassert;
use crate::kernel::{Initcall, Kernel};
use crate::sched::Policy;
use crate::sync::wait_event_interruptible_timeout;
use crate::thread::{ThreadAttr, ThreadPolicy, Tid};
use crate::time::{msecs_to_jiffies, Jiffies, TimerId};
use portable_atomic::Ordering;

/// Ticks between two runs of the preemption checker.
pub const PREEMPT_CHECK_PERIOD: Jiffies = 1;

/// Timer callback: request a reschedule when the running thread should give
/// way, then re-arm.
fn kthread_schedule_timeout<A: Arch, P: Policy>(kernel: &Kernel<A, P>, _data: usize) {
    kernel.check_preemption();
    if let Some(&id) = kernel.preempt_timer.get() {
        if let Err(err) = kernel.mod_timer(id, kernel.jiffies().wrapping_add(PREEMPT_CHECK_PERIOD)) {
            log::error!("preemption checker stopped: {}", err);
        }
    }
}

impl<A: Arch, P: Policy> Kernel<A, P> {
    /// Enter the scheduler from boot code. The boot context becomes the idle
    /// thread.
    pub fn start_kernel(&'static self) -> ! {
        if let Err(err) = self.init() {
            log::debug!("start_kernel: {}", err);
        }
        self.register_global();
        let idle = self.adopt_current(
            "idle",
            ThreadAttr::new()
                .with_priority(priority::IDLE)
                .with_policy(ThreadPolicy::Fifo),
        );
        kassert!(idle.is_ok(), "cannot adopt the boot context: {:?}", idle);
        if let Err(err) = self.kthread_init() {
            log::error!("kthread: {}", err);
        }
        A::enable_interrupts();
        self.cpu_idle()
    }

    /// Create the `kthread` thread.
    pub fn kthread_init(&'static self) -> KResult<Tid> {
        let attr = ThreadAttr::new()
            .with_priority(priority::KTHREAD)
            .with_policy(ThreadPolicy::Fifo);
        self.kernel_thread_base_create("kthread", attr, move || self.kthread_main())
    }

    fn kthread_main(&'static self) {
        if P::PREEMPTIVE {
            if let Err(err) = self.start_preempt_checker() {
                log::error!("preemption checker: {}", err);
            }
        }
        if let Err(err) = self.kernel_thread_init_create(move || self.init_main()) {
            log::error!("init: {}", err);
        }
        let kworker_attr = ThreadAttr::new()
            .with_priority(priority::KWORKER)
            .with_policy(ThreadPolicy::Fifo);
        match self.kernel_thread_base_create("kworker", kworker_attr, move || self.kworker_main()) {
            Ok(tid) => {
                self.kworker.call_once(|| tid);
            }
            Err(err) => log::error!("kworker: {}", err),
        }

        while !self.kill_pending() {
            if let Err(err) = self.schedule_self_sleep() {
                log::warn!("kthread cannot sleep: {}", err);
                self.schedule_thread();
            }
        }
    }

    /// Arm the periodic preemption check.
    ///
    /// # Returns
    ///
    /// `Busy` if it is already running.
    pub fn start_preempt_checker(&self) -> KResult<TimerId> {
        if self.preempt_timer.get().is_some() {
            return Err(KernelError::Busy);
        }
        let id = self.setup_timer(kthread_schedule_timeout::<A, P>, 0)?;
        self.preempt_timer.call_once(|| id);
        self.mod_timer(id, self.jiffies().wrapping_add(PREEMPT_CHECK_PERIOD))?;
        log::debug!("preemption checker armed");
        Ok(id)
    }

    /// Add a callback for the init thread to run at startup.
    ///
    /// # Returns
    ///
    /// `Busy` once the initcalls have run.
    pub fn register_initcall(&self, name: &'static str, call: Initcall<A, P>) -> KResult<()> {
        let mut calls = self.initcalls.lock();
        if self.initcalls_done.load(Ordering::Acquire) {
            return Err(KernelError::Busy);
        }
        calls.try_reserve(1)?;
        calls.push((name, call));
        Ok(())
    }

    /// Run the registered initcalls in registration order. Only the first
    /// call does anything.
    ///
    /// # Returns
    ///
    /// How many initcalls succeeded.
    pub fn run_initcalls(&'static self) -> usize {
        let calls = {
            let mut calls = self.initcalls.lock();
            if self.initcalls_done.swap(true, Ordering::AcqRel) {
                return 0;
            }
            core::mem::take(&mut *calls)
        };
        let mut ok = 0;
        for (name, call) in calls {
            match call(self) {
                Ok(()) => ok += 1,
                Err(err) => log::error!("initcall {} failed: {}", name, err),
            }
        }
        log::info!("initcalls: {} ok", ok);
        ok
    }

    fn init_main(&'static self) {
        self.run_initcalls();
        loop {
            if let Err(err) = self.schedule_delay_ms(self.config.init_period_ms) {
                log::debug!("init leaving: {}", err);
                return;
            }
            let stats = self.stats();
            log::debug!(
                "threads {} ready {} suspended {} sleeping {} dispatches {}",
                stats.threads,
                stats.ready,
                stats.suspended,
                stats.sleeping,
                stats.schedule_count
            );
        }
    }

    fn kworker_main(&'static self) {
        let poll = msecs_to_jiffies(self.config.kworker_poll_ms, self.config.hz);
        let queue = &self.workqueue;
        loop {
            queue.run_pending(self);
            match wait_event_interruptible_timeout(self, queue.head(), || !queue.is_empty(), poll) {
                Ok(_) | Err(KernelError::TimedOut) => {}
                Err(KernelError::Interrupted) => break,
                Err(err) => {
                    log::warn!("kworker wait: {}", err);
                    self.schedule_thread();
                }
            }
        }
        log::debug!("kworker exiting");
    }

    /// The kworker's tid, once it has been created.
    pub fn kworker_tid(&self) -> Option<Tid> {
        self.kworker.get().copied()
    }

    /// One round of the idle loop.
    ///
    /// # Returns
    ///
    /// Whether another thread was ready and got the CPU.
    pub fn idle_once(&self) -> bool {
        self.reap_zombies();
        if self.stats().ready > 0 {
            self.schedule_thread();
            true
        } else {
            A::wait_for_interrupt();
            false
        }
    }

    fn cpu_idle(&self) -> ! {
        loop {
            self.idle_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostArch;
    use crate::config::KernelConfig;
    use crate::sched::Preemptive;
    use alloc::boxed::Box;

    type TestKernel = Kernel<HostArch, Preemptive>;

    fn noop(_kernel: &TestKernel, _data: usize) {}

    #[test]
    fn test_checker_survives_losing_its_timer() {
        let _ = env_logger::builder().is_test(true).try_init();
        let k: &'static TestKernel =
            Box::leak(Box::new(TestKernel::new(KernelConfig::DEFAULT).unwrap()));
        k.init().unwrap();
        k.adopt_current("test", ThreadAttr::new().with_priority(10)).unwrap();

        let id = k.start_preempt_checker().unwrap();
        assert!(k.timer_pending(id));
        k.release_timer(id).unwrap();
        let fresh = k.setup_timer(noop, 0).unwrap();

        kthread_schedule_timeout(k, 0);
        assert!(!k.timer_pending(id));
        assert!(!k.timer_pending(fresh));
    }
}
