//! Thread scheduling: the thread table, the policies, and the service
//! interface the synchronization primitives are written against.

pub mod policy;
pub mod table;

pub use policy::{DefaultPolicy, Policy, Preemptive, PriorityPoll, RoundRobin};
pub use table::{SchedStats, ThreadTable};

use crate::arch::IrqFlags;
use crate::errors::KResult;
use crate::thread::{Signal, Tid};
use crate::time::Jiffies;

/// Scheduler services used by locks, wait queues and the workqueue.
///
/// [`Kernel`](crate::Kernel) is the implementation; the trait keeps the
/// primitives independent of the architecture and policy parameters.
pub trait SchedContext: Sync {
    /// The running thread, if the scheduler has started.
    fn current_tid(&self) -> Option<Tid>;

    fn jiffies(&self) -> Jiffies;

    /// Give up the CPU. The caller stays ready and runs again when the policy
    /// picks it.
    fn schedule_thread(&self);

    /// Park the caller for at most `timeout` ticks.
    ///
    /// # Returns
    ///
    /// The ticks left until the timeout when the caller was woken early, 0
    /// if the timeout elapsed.
    fn schedule_timeout(&self, timeout: Jiffies) -> KResult<Jiffies>;

    fn preempt_disable(&self);

    fn preempt_enable(&self);

    fn local_irq_save(&self) -> IrqFlags;

    fn local_irq_restore(&self, flags: IrqFlags);

    /// Mark `tid` as waiting, with `mode` being [`Signal::NORMAL`] or
    /// [`Signal::INTR`].
    fn arm_signal(&self, tid: Tid, mode: Signal) -> KResult<()>;

    /// Clear the wait mode of `tid`.
    fn disarm_signal(&self, tid: Tid);

    /// Atomically take the pending bits of `tid` selected by `mask`
    /// (WAKEUP and/or KILL).
    fn state_pending(&self, tid: Tid, mask: Signal) -> Signal;

    /// Deliver a wakeup to `tid` if its wait mode intersects `armed`.
    ///
    /// # Returns
    ///
    /// Whether the wakeup was delivered.
    fn signal_wakeup(&self, tid: Tid, armed: Signal) -> bool;
}
