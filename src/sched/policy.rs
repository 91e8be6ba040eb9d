//! Scheduling policies.
//!
//! A policy decides which ready thread runs next and, for preemptive
//! policies, when the running thread should give way. The kernel is generic
//! over its policy; [`DefaultPolicy`] is chosen by Cargo features.

use super::table::ThreadTable;
use crate::arch::Arch;
use crate::thread::ThreadPolicy;
use crate::time::{time_after_eq, Jiffies};

/// Scheduler policy trait.
pub trait Policy: Send + Sync + 'static {
    /// Name shown in boot logs.
    const NAME: &'static str;

    /// Whether the tick may force a reschedule.
    const PREEMPTIVE: bool;

    /// Position in the ready queue of the thread to dispatch next.
    fn pick_next<A: Arch>(table: &ThreadTable<A>) -> Option<usize>;

    /// Whether the running thread should be switched out at the next
    /// interrupt return.
    ///
    /// # Arguments
    ///
    /// * `table` - The thread table
    /// * `now` - Current jiffies
    fn should_preempt<A: Arch>(_table: &ThreadTable<A>, _now: Jiffies) -> bool {
        false
    }
}

/// First ready thread of the highest priority present.
fn highest_priority_first<A: Arch>(table: &ThreadTable<A>) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (pos, thread) in table.ready_threads().enumerate() {
        if best.map_or(true, |(_, prio)| thread.priority() > prio) {
            best = Some((pos, thread.priority()));
        }
    }
    best.map(|(pos, _)| pos)
}

/// Priority scheduling with tick-driven preemption.
///
/// Threads of equal priority run in FIFO order. The running thread is
/// preempted when a strictly higher priority thread is ready, or when its time
/// slice has run out and another thread is ready.
pub struct Preemptive;

impl Policy for Preemptive {
    const NAME: &'static str = "preempt";
    const PREEMPTIVE: bool = true;

    fn pick_next<A: Arch>(table: &ThreadTable<A>) -> Option<usize> {
        highest_priority_first(table)
    }

    fn should_preempt<A: Arch>(table: &ThreadTable<A>, now: Jiffies) -> bool {
        let Some(current) = table.current_thread() else {
            return false;
        };
        let Some(best) = table.highest_ready_priority() else {
            return false;
        };
        if best > current.priority {
            return true;
        }
        current.policy == ThreadPolicy::RoundRobin && time_after_eq(now, current.expires)
    }
}

/// Cooperative strict-priority scheduling.
pub struct PriorityPoll;

impl Policy for PriorityPoll {
    const NAME: &'static str = "priority-poll";
    const PREEMPTIVE: bool = false;

    fn pick_next<A: Arch>(table: &ThreadTable<A>) -> Option<usize> {
        highest_priority_first(table)
    }
}

/// Cooperative scheduling in ready-queue order, ignoring priority.
pub struct RoundRobin;

impl Policy for RoundRobin {
    const NAME: &'static str = "roll-poll";
    const PREEMPTIVE: bool = false;

    fn pick_next<A: Arch>(table: &ThreadTable<A>) -> Option<usize> {
        table.has_ready().then_some(0)
    }
}

#[cfg(all(feature = "preempt", feature = "roll-poll"))]
compile_error!("features `preempt` and `roll-poll` are mutually exclusive");

#[cfg(feature = "preempt")]
pub type DefaultPolicy = Preemptive;

#[cfg(all(feature = "roll-poll", not(feature = "preempt")))]
pub type DefaultPolicy = RoundRobin;

#[cfg(not(any(feature = "preempt", feature = "roll-poll")))]
pub type DefaultPolicy = PriorityPoll;
