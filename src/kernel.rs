//! The kernel context object.
//!
//! [`Kernel`] owns every piece of scheduler state: the thread table with its
//! queues, the software timers, jiffies, the preemption counter and the
//! reschedule flag. Nothing lives in file-scope statics, so independent
//! kernels can coexist (the hosted tests rely on this).
//!
//! All dispatching funnels through one internal routine that, inside a
//! single interrupt-masked critical section, moves the running thread to the
//! status it asked for, picks the next thread per the policy, and then
//! switches contexts after releasing the table lock.

use crate::arch::{Arch, DefaultArch, IrqFlags, IrqMutex};
use crate::config::{priority, KernelConfig};
use crate::errors::{KResult, KernelError};
use crate::fatal::KernelDump;
use crate::irq::{IrqController, IrqTail, SoftIrq, SystemTick, TickHandler};
use crate::kassert;
use crate::mem::{Stack, StackPool, StackPoolCounters};
use crate::sched::{DefaultPolicy, Policy, SchedContext, SchedStats, ThreadTable};
use crate::sync::{Work, WorkQueue};
use crate::thread::{
    DetachState, JoinHandle, Signal, StackSpec, Thread, ThreadAttr, ThreadBuilder, ThreadName,
    ThreadPolicy, ThreadStatus, Tid,
};
use crate::time::{
    do_timer_event, msecs_to_jiffies, time_after_eq, time_before, Jiffies, JiffiesCounter,
    TickSource, TimerFn, TimerId, TimerList,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use spin::Once;

/// Callback run once by the init thread.
pub type Initcall<A, P> = fn(&'static Kernel<A, P>) -> KResult<()>;

/// Main kernel handle.
///
/// # Type Parameters
///
/// * `A` - Architecture implementation
/// * `P` - Scheduling policy
pub struct Kernel<A: Arch = DefaultArch, P: Policy = DefaultPolicy> {
    pub(crate) config: KernelConfig,
    table: IrqMutex<A, ThreadTable<A>>,
    timers: IrqMutex<A, TimerList<Kernel<A, P>>>,
    jiffies: JiffiesCounter,
    preempt_count: AtomicU32,
    need_resched: AtomicBool,
    initialized: AtomicBool,
    stack_pool: StackPool,
    pub(crate) workqueue: WorkQueue,
    pub(crate) initcalls: spin::Mutex<Vec<(&'static str, Initcall<A, P>)>>,
    pub(crate) initcalls_done: AtomicBool,
    pub(crate) preempt_timer: Once<TimerId>,
    pub(crate) kworker: Once<Tid>,
    _policy: PhantomData<fn() -> P>,
}

/// Handed to a new thread through its context's entry argument.
struct ThreadStart<A: Arch, P: Policy> {
    kernel: &'static Kernel<A, P>,
    body: Box<dyn FnOnce() + Send>,
}

extern "C-unwind" fn thread_trampoline<A: Arch, P: Policy>(arg: usize) -> ! {
    // SAFETY: `arg` is the box leaked by `create_thread`; each context runs
    // its entry exactly once.
    let start = unsafe { Box::from_raw(arg as *mut ThreadStart<A, P>) };
    let ThreadStart { kernel, body } = *start;
    A::enable_interrupts();
    body();
    kernel.thread_exit()
}

/// Timer callback of [`Kernel::schedule_timeout`]. `data` is the sleeper's tid.
fn process_timeout<A: Arch, P: Policy>(kernel: &Kernel<A, P>, data: usize) {
    if let Some(tid) = Tid::from_index(data) {
        kernel.wake_if_suspended(tid);
    }
}

/// Releases a private timer on every exit path.
struct TimerGuard<'a, A: Arch, P: Policy> {
    kernel: &'a Kernel<A, P>,
    id: TimerId,
}

impl<A: Arch, P: Policy> Drop for TimerGuard<'_, A, P> {
    fn drop(&mut self) {
        if let Err(err) = self.kernel.release_timer(self.id) {
            log::warn!("timeout timer {:?} already gone: {}", self.id, err);
        }
    }
}

/// Outcome of a dispatch decision.
enum Dispatch<C> {
    /// The caller keeps the CPU
    Stay,
    Switch(*mut C, *const C),
}

impl<A: Arch, P: Policy> Kernel<A, P> {
    /// Create a kernel instance.
    ///
    /// # Returns
    ///
    /// `NoMem` if the scheduler queues cannot be reserved.
    pub fn new(config: KernelConfig) -> KResult<Self> {
        Ok(Self {
            config,
            table: IrqMutex::new(ThreadTable::new(config.overflow_threads)?),
            timers: IrqMutex::new(TimerList::new()),
            jiffies: JiffiesCounter::new(),
            preempt_count: AtomicU32::new(0),
            need_resched: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            stack_pool: StackPool::new(),
            workqueue: WorkQueue::new(),
            initcalls: spin::Mutex::new(Vec::new()),
            initcalls_done: AtomicBool::new(false),
            preempt_timer: Once::new(),
            kworker: Once::new(),
            _policy: PhantomData,
        })
    }

    /// Initialize the kernel. Dispatching is refused until this is called.
    ///
    /// # Returns
    ///
    /// `Busy` if already initialized.
    pub fn init(&self) -> KResult<()> {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| KernelError::Busy)?;
        log::info!(
            "kernel: policy {}, {} Hz, slice {} ticks, {} threads max",
            P::NAME,
            self.config.hz,
            self.config.preempt_period,
            self.config.max_threads()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Make this kernel the one dumped by a failed [`kassert!`].
    pub fn register_global(&'static self) {
        crate::fatal::set_dump_hook(self);
    }

    /// Register the system tick on `controller`: map `hwirq`, attach the
    /// tick action, install this kernel as the interrupt tail and start
    /// `source` at the configured rate.
    pub fn install_tick(
        &'static self,
        controller: &IrqController<A>,
        hwirq: u32,
        source: &'static dyn TickSource,
    ) -> KResult<SoftIrq> {
        let soft = controller.map_irq(hwirq)?;
        let action: &'static SystemTick = Box::leak(Box::new(SystemTick::new(self, source)));
        controller.request_irq(soft, "tick", action)?;
        controller.set_tail(self);
        source.start(self.config.hz);
        Ok(soft)
    }

    // ---------------------------------------------------------------------
    // Thread creation

    fn create_thread(
        &'static self,
        name: &str,
        mut attr: ThreadAttr,
        body: Box<dyn FnOnce() + Send>,
    ) -> KResult<Tid> {
        if !self.is_initialized() {
            return Err(KernelError::Forbid);
        }
        let stack = match core::mem::replace(&mut attr.stack, StackSpec::Default) {
            StackSpec::Default => self.stack_pool.allocate(self.config.default_stack_size)?,
            StackSpec::Size(size) => self.stack_pool.allocate(size)?,
            StackSpec::Static(memory) => {
                let stack = Stack::from_static(memory)?;
                stack.install_canary();
                stack
            }
        };
        let slice = match attr.time_slice {
            0 => self.config.preempt_period,
            ticks => ticks,
        };
        let start = Box::into_raw(Box::new(ThreadStart { kernel: self, body }));

        let mut table = self.table.lock();
        let tid = match table.get_unused_tid() {
            Ok(tid) => tid,
            Err(err) => {
                drop(table);
                self.stack_pool.release(stack);
                // SAFETY: `start` was never handed to a context.
                drop(unsafe { Box::from_raw(start) });
                log::warn!("cannot create {}: {}", name, err);
                return Err(err);
            }
        };

        let mut thread = Box::new(Thread::<A>::new(tid, name, &attr, slice));
        // SAFETY: the context is fresh and the stack moves into the thread,
        // which keeps it until the thread is reaped.
        unsafe {
            A::init_context(
                thread.context.get_mut(),
                thread_trampoline::<A, P>,
                start as usize,
                stack.top(),
            );
        }
        thread.stack = Some(stack);
        let registered = table
            .insert(thread)
            .and_then(|()| table.transfer(tid, ThreadStatus::Ready));
        kassert!(registered.is_ok(), "tid {} handed out twice", tid);
        drop(table);

        log::debug!("created tid {} ({}) prio {}", tid, name, attr.priority);
        Ok(tid)
    }

    /// Create a thread running `body`.
    ///
    /// # Returns
    ///
    /// The new thread's id; `NoMem` when the table or the stack pool is
    /// exhausted.
    pub fn kernel_thread_base_create<F>(
        &'static self,
        name: &str,
        attr: ThreadAttr,
        body: F,
    ) -> KResult<Tid>
    where
        F: FnOnce() + Send + 'static,
    {
        self.create_thread(name, attr, Box::new(body))
    }

    /// Create a thread running `entry(arg)`.
    pub fn kernel_thread_create(
        &'static self,
        name: &str,
        attr: ThreadAttr,
        entry: fn(usize),
        arg: usize,
    ) -> KResult<Tid> {
        self.kernel_thread_base_create(name, attr, move || entry(arg))
    }

    /// Create a thread at idle priority.
    pub fn kernel_thread_idle_create<F>(&'static self, body: F) -> KResult<Tid>
    where
        F: FnOnce() + Send + 'static,
    {
        let attr = ThreadAttr::new()
            .with_priority(priority::IDLE)
            .with_policy(ThreadPolicy::Fifo);
        self.kernel_thread_base_create("idle", attr, body)
    }

    /// Create the init thread.
    pub fn kernel_thread_init_create<F>(&'static self, body: F) -> KResult<Tid>
    where
        F: FnOnce() + Send + 'static,
    {
        let attr = ThreadAttr::new()
            .with_priority(priority::INIT)
            .with_policy(ThreadPolicy::Fifo);
        self.kernel_thread_base_create("init", attr, body)
    }

    /// Spawn a joinable thread with default attributes.
    pub fn spawn<F>(&'static self, f: F) -> KResult<JoinHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        ThreadBuilder::new().spawn(self, f)
    }

    /// Register the calling context, which runs on a stack the kernel does
    /// not own, as the running thread.
    ///
    /// # Returns
    ///
    /// `Busy` if a thread is already running.
    pub fn adopt_current(&self, name: &str, attr: ThreadAttr) -> KResult<Tid> {
        let mut table = self.table.lock();
        if table.current().is_some() {
            return Err(KernelError::Busy);
        }
        let tid = table.get_unused_tid()?;
        let slice = match attr.time_slice {
            0 => self.config.preempt_period,
            ticks => ticks,
        };
        let mut thread = Box::new(Thread::<A>::new(tid, name, &attr, slice));
        thread.expires = self.jiffies().wrapping_add(slice);
        table.insert(thread)?;
        table.transfer(tid, ThreadStatus::Running)?;
        table.set_current(Some(tid));
        log::info!("tid {} ({}) adopted as running thread", tid, name);
        Ok(tid)
    }

    // ---------------------------------------------------------------------
    // Dispatch

    fn release_zombies(&self, table: &mut ThreadTable<A>) -> usize {
        table.reap_zombies(|mut thread: Box<Thread<A>>| {
            if let Some(stack) = thread.stack.take() {
                self.stack_pool.release(stack);
            }
        })
    }

    /// Move the running thread to `prev_to` and choose its successor.
    fn commit(&self, prev_to: ThreadStatus) -> KResult<Dispatch<A::SavedContext>> {
        let mut table = self.table.lock();
        let prev = table.current().ok_or(KernelError::Forbid)?;
        self.release_zombies(&mut table);

        let mut prev_to = prev_to;
        {
            let thread = table.get_mut(prev).ok_or(KernelError::Fault)?;
            kassert!(
                thread.stack_intact(),
                "stack overflow in tid {} ({})",
                thread.tid,
                thread.name
            );
            // A wakeup that arrived after the waiter's last check cancels
            // the suspension.
            if prev_to == ThreadStatus::Suspend && thread.signals.contains(Signal::WAKEUP) {
                prev_to = ThreadStatus::Ready;
            }
            thread.to_status = prev_to;
        }

        if prev_to == ThreadStatus::Ready && !table.has_ready() {
            self.need_resched.store(false, Ordering::Release);
            return Ok(Dispatch::Stay);
        }

        table.transfer(prev, prev_to)?;
        let Some(next) = P::pick_next(&table).and_then(|pos| table.ready_at(pos)) else {
            // Nothing else can run; the caller keeps the CPU.
            table.transfer(prev, ThreadStatus::Running)?;
            log::warn!("tid {} cannot leave the CPU: nothing is ready", prev);
            return Err(KernelError::Forbid);
        };

        table.transfer(next, ThreadStatus::Running)?;
        table.set_current(Some(next));
        table.count_schedule();
        self.need_resched.store(false, Ordering::Release);

        let now = self.jiffies();
        let thread = table.get_mut(next).ok_or(KernelError::Fault)?;
        thread.expires = now.wrapping_add(thread.time_slice);
        thread.to_status = ThreadStatus::None;
        let next_ctx = thread.context_ptr() as *const A::SavedContext;
        if next == prev {
            return Ok(Dispatch::Stay);
        }
        let prev_ctx = table.get(prev).ok_or(KernelError::Fault)?.context_ptr();
        log::trace!("switch tid {} -> tid {}", prev, next);
        Ok(Dispatch::Switch(prev_ctx, next_ctx))
    }

    /// Leave the CPU with the running thread moving to `prev_to`.
    ///
    /// With preemption disabled only a yield is accepted, and it is turned
    /// into a pending reschedule request.
    fn reschedule(&self, prev_to: ThreadStatus) -> KResult<()> {
        if !self.is_initialized() {
            return Err(KernelError::Forbid);
        }
        if self.preempt_count.load(Ordering::Acquire) > 0 {
            if prev_to == ThreadStatus::Ready {
                self.need_resched.store(true, Ordering::Release);
                return Ok(());
            }
            log::warn!("cannot block with preemption disabled");
            return Err(KernelError::Forbid);
        }

        let flags = A::irq_save();
        let result = self.commit(prev_to).map(|dispatch| {
            if let Dispatch::Switch(prev, next) = dispatch {
                // SAFETY: both contexts belong to boxed threads the table
                // keeps alive; `prev` is the caller, and interrupts are off.
                unsafe { A::context_switch(prev, next) };
            }
        });
        A::irq_restore(flags);
        result
    }

    /// Give up the CPU, staying ready.
    pub fn schedule_thread(&self) {
        if let Err(err) = self.reschedule(ThreadStatus::Ready) {
            log::trace!("schedule_thread: {}", err);
        }
    }

    pub fn yield_now(&self) {
        self.schedule_thread();
    }

    /// Park the running thread until [`schedule_thread_wakeup`](Self::schedule_thread_wakeup).
    pub fn schedule_self_suspend(&self) -> KResult<()> {
        self.reschedule(ThreadStatus::Suspend)
    }

    /// Put the running thread to sleep. Only an explicit wakeup or a kill
    /// makes it ready again.
    pub fn schedule_self_sleep(&self) -> KResult<()> {
        self.reschedule(ThreadStatus::Sleep)
    }

    /// Suspend `tid`. Suspending the running thread parks it.
    ///
    /// # Returns
    ///
    /// `Busy` for a sleeping thread, `NoDev` for one that exited.
    pub fn schedule_thread_suspend(&self, tid: Tid) -> KResult<()> {
        if self.current_tid() == Some(tid) {
            return self.schedule_self_suspend();
        }
        let mut table = self.table.lock();
        let status = table.get(tid).ok_or(KernelError::NotFound)?.status;
        match status {
            ThreadStatus::Ready => table.transfer(tid, ThreadStatus::Suspend).map(drop),
            ThreadStatus::Suspend => Ok(()),
            ThreadStatus::Sleep => Err(KernelError::Busy),
            ThreadStatus::None | ThreadStatus::Running => Err(KernelError::NoDev),
        }
    }

    /// Make a suspended or sleeping thread ready. Waking a ready or running
    /// thread does nothing.
    pub fn schedule_thread_wakeup(&self, tid: Tid) -> KResult<()> {
        let mut table = self.table.lock();
        let status = table.get(tid).ok_or(KernelError::NotFound)?.status;
        match status {
            ThreadStatus::Suspend | ThreadStatus::Sleep => {
                table.transfer(tid, ThreadStatus::Ready).map(drop)
            }
            ThreadStatus::Ready | ThreadStatus::Running => Ok(()),
            ThreadStatus::None => Err(KernelError::NoDev),
        }
    }

    /// Ready `tid` only if it is suspended. Sleepers are left alone.
    pub(crate) fn wake_if_suspended(&self, tid: Tid) -> bool {
        let mut table = self.table.lock();
        match table.get(tid).map(Thread::status) {
            Some(ThreadStatus::Suspend) => table.transfer(tid, ThreadStatus::Ready).is_ok(),
            _ => false,
        }
    }

    /// Suspend the running thread for at most `ticks`.
    ///
    /// # Returns
    ///
    /// The ticks left when woken early, 0 once the timeout has elapsed.
    pub fn schedule_timeout(&self, ticks: Jiffies) -> KResult<Jiffies> {
        let tid = self.current_tid().ok_or(KernelError::Forbid)?;
        if ticks == 0 {
            return Ok(0);
        }
        let expires = self.jiffies().wrapping_add(ticks);
        let timer = TimerGuard {
            kernel: self,
            id: self.setup_timer(process_timeout::<A, P>, tid.index())?,
        };
        self.mod_timer(timer.id, expires)?;
        self.reschedule(ThreadStatus::Suspend)?;
        drop(timer);

        let now = self.jiffies();
        Ok(if time_before(now, expires) {
            expires.wrapping_sub(now)
        } else {
            0
        })
    }

    /// Suspend the running thread for `ticks`, ignoring early wakeups.
    ///
    /// # Returns
    ///
    /// `Interrupted` if the thread was killed while waiting.
    pub fn schedule_delay(&self, ticks: Jiffies) -> KResult<()> {
        let deadline = self.jiffies().wrapping_add(ticks);
        loop {
            let now = self.jiffies();
            if time_after_eq(now, deadline) {
                return Ok(());
            }
            self.schedule_timeout(deadline.wrapping_sub(now))?;
            if self.kill_pending() {
                return Err(KernelError::Interrupted);
            }
        }
    }

    pub fn schedule_delay_ms(&self, ms: u32) -> KResult<()> {
        self.schedule_delay(msecs_to_jiffies(ms, self.config.hz))
    }

    // ---------------------------------------------------------------------
    // Preemption

    pub fn preempt_disable(&self) {
        self.preempt_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn preempt_enable(&self) {
        let released = self
            .preempt_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        if released.is_err() {
            log::warn!("preempt_enable without a matching preempt_disable");
        }
    }

    pub fn preempt_count(&self) -> u32 {
        self.preempt_count.load(Ordering::Acquire)
    }

    /// Whether a reschedule is waiting for the next interrupt return.
    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    /// The tick action: advance jiffies and run expired timers.
    pub fn timer_interrupt(&self) {
        let now = self.jiffies.tick();
        do_timer_event(self, now, || self.timers.lock());
    }

    /// Interrupt return: switch away if a reschedule was requested and
    /// preemption is enabled.
    pub fn irq_exit(&self) {
        if !self.need_resched() || self.preempt_count() > 0 {
            return;
        }
        if let Err(err) = self.reschedule(ThreadStatus::Ready) {
            log::trace!("irq_exit: {}", err);
        }
    }

    /// Request a reschedule if the running thread should give way.
    ///
    /// Never requests one for a non-preemptive policy or while preemption is
    /// disabled.
    pub fn check_preemption(&self) -> bool {
        if !P::PREEMPTIVE || self.preempt_count() > 0 {
            return false;
        }
        let table = self.table.lock();
        let preempt = P::should_preempt(&table, self.jiffies());
        drop(table);
        if preempt {
            self.need_resched.store(true, Ordering::Release);
        }
        preempt
    }

    // ---------------------------------------------------------------------
    // Lifecycle

    fn exit_commit(&self) -> KResult<*const A::SavedContext> {
        let mut table = self.table.lock();
        let prev = table.current().ok_or(KernelError::Forbid)?;
        let joiner = table.get_mut(prev).and_then(|thread| {
            thread.zombie = true;
            thread.to_status = ThreadStatus::None;
            thread.joiner.take()
        });
        table.transfer(prev, ThreadStatus::None)?;
        if let Some(joiner) = joiner {
            let parked = table.get(joiner).map_or(false, |t| {
                t.signals.wake_if_armed(Signal::NORMAL) && t.status == ThreadStatus::Suspend
            });
            if parked {
                table.transfer(joiner, ThreadStatus::Ready)?;
            }
        }
        let next = P::pick_next(&table)
            .and_then(|pos| table.ready_at(pos))
            .ok_or(KernelError::NotFound)?;
        table.transfer(next, ThreadStatus::Running)?;
        table.set_current(Some(next));
        table.count_schedule();
        self.need_resched.store(false, Ordering::Release);

        let now = self.jiffies();
        let thread = table.get_mut(next).ok_or(KernelError::Fault)?;
        thread.expires = now.wrapping_add(thread.time_slice);
        log::debug!("tid {} exited, tid {} runs", prev, next);
        Ok(thread.context_ptr() as *const A::SavedContext)
    }

    /// Terminate the running thread.
    ///
    /// A detached thread is reclaimed at the next dispatch; a joinable one
    /// stays a zombie until joined.
    pub fn thread_exit(&self) -> ! {
        A::disable_interrupts();
        if self.preempt_count.swap(0, Ordering::AcqRel) != 0 {
            log::warn!("thread exited with preemption disabled");
        }
        match self.exit_commit() {
            // SAFETY: `next` belongs to a boxed thread the table keeps alive,
            // and this thread never runs again.
            Ok(next) => unsafe { A::context_switch_final(next) },
            Err(err) => crate::fatal::assert_failed(
                file!(),
                line!(),
                module_path!(),
                format_args!("no thread left to run after exit: {}", err),
            ),
        }
    }

    /// Wait for a joinable thread to exit and reclaim it.
    ///
    /// The caller is suspended until the target exits, so a target of any
    /// priority gets to run. The wait is not interruptible.
    ///
    /// # Returns
    ///
    /// `Unvalid` when joining oneself or a detached thread.
    pub fn thread_join(&self, tid: Tid) -> KResult<()> {
        loop {
            {
                let mut table = self.table.lock();
                let me = table.current();
                if me == Some(tid) {
                    return Err(KernelError::Unvalid);
                }
                let thread = table.get_mut(tid).ok_or(KernelError::NotFound)?;
                if thread.detach == DetachState::Detached {
                    return Err(KernelError::Unvalid);
                }
                if thread.zombie && thread.status == ThreadStatus::None {
                    let mut thread = table.remove(tid)?;
                    if let Some(stack) = thread.stack.take() {
                        self.stack_pool.release(stack);
                    }
                    if let Some(me) = me.and_then(|me| table.get(me)) {
                        me.signals.clear(Signal::ARMED | Signal::WAKEUP);
                    }
                    log::debug!("joined tid {}", tid);
                    return Ok(());
                }
                let me = me.ok_or(KernelError::Forbid)?;
                thread.joiner = Some(me);
                let me = table.get(me).ok_or(KernelError::Fault)?;
                me.signals.clear(Signal::ARMED | Signal::WAKEUP);
                me.signals.raise(Signal::NORMAL);
            }
            // An exit between the unlock and the switch leaves WAKEUP
            // raised, which cancels the suspension.
            if let Err(err) = self.reschedule(ThreadStatus::Suspend) {
                log::trace!("join of tid {} polls: {}", tid, err);
                self.schedule_thread();
            }
        }
    }

    /// Ask `tid` to terminate. A parked target is made ready so it can
    /// notice; only interruptible waits observe the request.
    pub fn thread_kill(&self, tid: Tid) -> KResult<()> {
        let mut table = self.table.lock();
        let thread = table.get(tid).ok_or(KernelError::NotFound)?;
        if thread.zombie {
            return Err(KernelError::NoDev);
        }
        thread.signals.raise(Signal::KILL);
        thread.signals.wake_if_armed(Signal::INTR);
        if matches!(thread.status, ThreadStatus::Suspend | ThreadStatus::Sleep) {
            table.transfer(tid, ThreadStatus::Ready)?;
        }
        log::debug!("kill sent to tid {}", tid);
        Ok(())
    }

    /// Whether the running thread has been killed.
    pub fn kill_pending(&self) -> bool {
        let table = self.table.lock();
        table
            .current_thread()
            .map_or(false, |t| t.signals.contains(Signal::KILL))
    }

    /// Reclaim exited detached threads now.
    pub fn reap_zombies(&self) -> usize {
        let mut table = self.table.lock();
        self.release_zombies(&mut table)
    }

    // ---------------------------------------------------------------------
    // Introspection

    pub fn current_tid(&self) -> Option<Tid> {
        self.table.lock().current()
    }

    pub fn jiffies(&self) -> Jiffies {
        self.jiffies.get()
    }

    /// How often jiffies wrapped around.
    pub fn jiffies_wraps(&self) -> u32 {
        self.jiffies.wraps()
    }

    pub fn thread_status(&self, tid: Tid) -> KResult<ThreadStatus> {
        self.table
            .lock()
            .get(tid)
            .map(Thread::status)
            .ok_or(KernelError::NotFound)
    }

    pub fn thread_priority(&self, tid: Tid) -> KResult<u8> {
        self.table
            .lock()
            .get(tid)
            .map(Thread::priority)
            .ok_or(KernelError::NotFound)
    }

    pub fn set_priority(&self, tid: Tid, priority: u8) -> KResult<()> {
        let mut table = self.table.lock();
        let thread = table.get_mut(tid).ok_or(KernelError::NotFound)?;
        thread.priority = priority;
        Ok(())
    }

    pub fn thread_name(&self, tid: Tid) -> KResult<ThreadName> {
        self.table
            .lock()
            .get(tid)
            .map(|t| t.name)
            .ok_or(KernelError::NotFound)
    }

    pub fn stats(&self) -> SchedStats {
        self.table.lock().stats()
    }

    pub fn stack_counters(&self) -> StackPoolCounters {
        self.stack_pool.counters()
    }

    /// Verify the queue invariants of the thread table.
    pub fn check_invariants(&self) -> KResult<()> {
        self.table.lock().check_invariants()
    }

    // ---------------------------------------------------------------------
    // Timers

    pub fn setup_timer(&self, func: TimerFn<Self>, data: usize) -> KResult<TimerId> {
        self.timers.lock().setup_timer(func, data)
    }

    pub fn add_timer(&self, id: TimerId, expires: Jiffies) -> KResult<()> {
        self.timers.lock().add_timer(id, expires)
    }

    pub fn mod_timer(&self, id: TimerId, expires: Jiffies) -> KResult<bool> {
        self.timers.lock().mod_timer(id, expires)
    }

    pub fn del_timer(&self, id: TimerId) -> KResult<()> {
        self.timers.lock().del_timer(id)
    }

    pub fn release_timer(&self, id: TimerId) -> KResult<()> {
        self.timers.lock().release_timer(id)
    }

    pub fn timer_pending(&self, id: TimerId) -> bool {
        self.timers.lock().timer_pending(id)
    }

    // ---------------------------------------------------------------------
    // Deferred work

    /// Queue `work` for the kworker thread.
    ///
    /// # Returns
    ///
    /// `false` if it was already pending.
    pub fn schedule_work(&self, work: &'static Work) -> KResult<bool> {
        self.workqueue.schedule_work(self, work)
    }

    pub fn cancel_work(&self, work: &'static Work) -> bool {
        self.workqueue.cancel_work(self, work)
    }
}

impl<A: Arch, P: Policy> SchedContext for Kernel<A, P> {
    fn current_tid(&self) -> Option<Tid> {
        Kernel::current_tid(self)
    }

    fn jiffies(&self) -> Jiffies {
        Kernel::jiffies(self)
    }

    fn schedule_thread(&self) {
        Kernel::schedule_thread(self);
    }

    fn schedule_timeout(&self, timeout: Jiffies) -> KResult<Jiffies> {
        Kernel::schedule_timeout(self, timeout)
    }

    fn preempt_disable(&self) {
        Kernel::preempt_disable(self);
    }

    fn preempt_enable(&self) {
        Kernel::preempt_enable(self);
    }

    fn local_irq_save(&self) -> IrqFlags {
        A::irq_save()
    }

    fn local_irq_restore(&self, flags: IrqFlags) {
        A::irq_restore(flags);
    }

    fn arm_signal(&self, tid: Tid, mode: Signal) -> KResult<()> {
        let table = self.table.lock();
        let thread = table.get(tid).ok_or(KernelError::NotFound)?;
        thread.signals.clear(Signal::ARMED | Signal::WAKEUP);
        thread.signals.raise(mode & Signal::ARMED);
        Ok(())
    }

    fn disarm_signal(&self, tid: Tid) {
        if let Some(thread) = self.table.lock().get(tid) {
            thread.signals.clear(Signal::ARMED | Signal::WAKEUP);
        }
    }

    fn state_pending(&self, tid: Tid, mask: Signal) -> Signal {
        self.table
            .lock()
            .get(tid)
            .map_or(Signal::empty(), |t| t.signals.take(mask & Signal::PENDING))
    }

    fn signal_wakeup(&self, tid: Tid, armed: Signal) -> bool {
        let mut table = self.table.lock();
        let Some(thread) = table.get(tid) else {
            return false;
        };
        if !thread.signals.wake_if_armed(armed) {
            return false;
        }
        if thread.status == ThreadStatus::Suspend {
            if let Err(err) = table.transfer(tid, ThreadStatus::Ready) {
                log::error!("wakeup of tid {} failed: {}", tid, err);
            }
        }
        true
    }
}

impl<A: Arch, P: Policy> TickHandler for Kernel<A, P> {
    fn tick(&self) {
        self.timer_interrupt();
    }
}

impl<A: Arch, P: Policy> IrqTail for Kernel<A, P> {
    fn irq_exit(&self) {
        Kernel::irq_exit(self);
    }
}

impl<A: Arch, P: Policy> KernelDump for Kernel<A, P> {
    fn dump_current(&self) {
        let Some(table) = self.table.try_lock() else {
            log::error!("dump: thread table is locked");
            return;
        };
        match table.current_thread() {
            Some(thread) => {
                log::error!(
                    "current: tid {} ({}) {:?} -> {:?}, prio {}, expires {}, signals {:?}",
                    thread.tid,
                    thread.name,
                    thread.status,
                    thread.to_status,
                    thread.priority,
                    thread.expires,
                    thread.signals.get()
                );
                // SAFETY: read-only view of a context that is not being
                // switched while the table lock is held.
                let ctx = unsafe { &*thread.context_ptr() };
                log::error!("context: {:?}", ctx);
            }
            None => log::error!("current: none"),
        }
        log::error!("jiffies {} ({} wraps), {:?}", self.jiffies(), self.jiffies_wraps(), table.stats());
    }
}
