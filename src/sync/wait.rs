//! Wait queues with signal-based wakeup.
//!
//! A waiter links its tid into a [`WaitQueueHead`] for the duration of one
//! wait and arms its signal word with the kind of wait (`NORMAL` or
//! `INTR`). A waker only raises WAKEUP on armed waiters; the waiter's own
//! loop notices it, re-evaluates its condition and unlinks itself. Wakeups
//! are level triggered: one raised before the waiter reaches its check is
//! still seen. Spurious wakeups happen, which is why the condition is always
//! re-checked.
//!
//! ```ignore
//! static DATA_READY: AtomicBool = AtomicBool::new(false);
//! static HEAD: WaitQueueHead = WaitQueueHead::new();
//!
//! // consumer
//! wait_event(kernel, &HEAD, || DATA_READY.load(Ordering::Acquire))?;
//!
//! // producer, thread or interrupt context
//! DATA_READY.store(true, Ordering::Release);
//! wake_up(kernel, &HEAD);
//! ```

use crate::errors::{KResult, KernelError};
use crate::sched::SchedContext;
use crate::thread::{Signal, Tid};
use crate::time::{time_after_eq, time_before, Jiffies};
use alloc::vec::Vec;

/// List of threads waiting for one condition.
#[derive(Debug, Default)]
pub struct WaitQueueHead {
    waiters: spin::Mutex<Vec<Tid>>,
}

/// Membership of one thread in a queue, for one wait call.
struct WaitNode<'a, C: SchedContext + ?Sized> {
    head: &'a WaitQueueHead,
    k: &'a C,
    tid: Tid,
}

impl<C: SchedContext + ?Sized> Drop for WaitNode<'_, C> {
    fn drop(&mut self) {
        let flags = self.k.local_irq_save();
        {
            let mut waiters = self.head.waiters.lock();
            if let Some(pos) = waiters.iter().position(|&t| t == self.tid) {
                waiters.remove(pos);
            }
        }
        self.k.local_irq_restore(flags);
    }
}

impl WaitQueueHead {
    pub const fn new() -> Self {
        Self {
            waiters: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    fn link<'a, C: SchedContext + ?Sized>(&'a self, k: &'a C, tid: Tid) -> KResult<WaitNode<'a, C>> {
        let flags = k.local_irq_save();
        let linked = {
            let mut waiters = self.waiters.lock();
            waiters.try_reserve(1).map(|()| waiters.push(tid))
        };
        k.local_irq_restore(flags);
        linked?;
        Ok(WaitNode { head: self, k, tid })
    }

    /// Raise WAKEUP on every waiter armed with a bit of `armed`.
    fn wake<C: SchedContext + ?Sized>(&self, k: &C, armed: Signal) -> usize {
        let flags = k.local_irq_save();
        let woken = self
            .waiters
            .lock()
            .iter()
            .filter(|&&tid| k.signal_wakeup(tid, armed))
            .count();
        k.local_irq_restore(flags);
        woken
    }
}

fn wait_common<C, F>(
    k: &C,
    head: &WaitQueueHead,
    mode: Signal,
    timeout: Option<Jiffies>,
    mut condition: F,
) -> KResult<Jiffies>
where
    C: SchedContext + ?Sized,
    F: FnMut() -> bool,
{
    if condition() {
        return Ok(timeout.unwrap_or(0));
    }
    let tid = k.current_tid().ok_or(KernelError::Forbid)?;
    let deadline = timeout.map(|ticks| k.jiffies().wrapping_add(ticks));
    let listen = if mode.contains(Signal::INTR) {
        Signal::PENDING
    } else {
        Signal::WAKEUP
    };

    let _node = head.link(k, tid)?;
    k.arm_signal(tid, mode)?;
    let result = loop {
        let now = k.jiffies();
        if condition() {
            break Ok(match deadline {
                Some(deadline) if time_before(now, deadline) => deadline.wrapping_sub(now),
                _ => 0,
            });
        }
        let pending = k.state_pending(tid, listen);
        if pending.contains(Signal::KILL) {
            break Err(KernelError::Interrupted);
        }
        match deadline {
            Some(deadline) if time_after_eq(now, deadline) => break Err(KernelError::TimedOut),
            Some(_) if pending.contains(Signal::WAKEUP) => {}
            Some(deadline) => {
                if let Err(err) = k.schedule_timeout(deadline.wrapping_sub(now)) {
                    break Err(err);
                }
            }
            None if pending.contains(Signal::WAKEUP) => {}
            None => k.schedule_thread(),
        }
    };
    k.disarm_signal(tid);
    result
}

/// Wait until `condition` holds.
///
/// # Returns
///
/// `Forbid` outside a thread.
pub fn wait_event<C, F>(k: &C, head: &WaitQueueHead, condition: F) -> KResult<()>
where
    C: SchedContext + ?Sized,
    F: FnMut() -> bool,
{
    wait_common(k, head, Signal::NORMAL, None, condition).map(drop)
}

/// Like [`wait_event`], but a kill ends the wait with `Interrupted`.
pub fn wait_event_interruptible<C, F>(k: &C, head: &WaitQueueHead, condition: F) -> KResult<()>
where
    C: SchedContext + ?Sized,
    F: FnMut() -> bool,
{
    wait_common(k, head, Signal::INTR, None, condition).map(drop)
}

/// Wait at most `timeout` ticks for `condition`.
///
/// # Returns
///
/// The ticks left when the condition held, `TimedOut` if it never did.
pub fn wait_event_timeout<C, F>(
    k: &C,
    head: &WaitQueueHead,
    condition: F,
    timeout: Jiffies,
) -> KResult<Jiffies>
where
    C: SchedContext + ?Sized,
    F: FnMut() -> bool,
{
    wait_common(k, head, Signal::NORMAL, Some(timeout), condition)
}

pub fn wait_event_interruptible_timeout<C, F>(
    k: &C,
    head: &WaitQueueHead,
    condition: F,
    timeout: Jiffies,
) -> KResult<Jiffies>
where
    C: SchedContext + ?Sized,
    F: FnMut() -> bool,
{
    wait_common(k, head, Signal::INTR, Some(timeout), condition)
}

/// Wake every waiter on `head`.
///
/// # Returns
///
/// The number of waiters signalled.
pub fn wake_up<C: SchedContext + ?Sized>(k: &C, head: &WaitQueueHead) -> usize {
    head.wake(k, Signal::ARMED)
}

/// Wake only the interruptible waiters on `head`.
pub fn wake_up_interruptible<C: SchedContext + ?Sized>(k: &C, head: &WaitQueueHead) -> usize {
    head.wake(k, Signal::INTR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeSched;
    use alloc::boxed::Box;
    use portable_atomic::{AtomicBool, Ordering};

    #[test]
    fn test_fast_path_does_not_link() {
        let k = FakeSched::new(None);
        let head = WaitQueueHead::new();
        assert_eq!(wait_event_timeout(&k, &head, || true, 7), Ok(7));
        wait_event(&k, &head, || true).unwrap();
        assert_eq!(wait_event(&k, &head, || false), Err(KernelError::Forbid));
        assert!(head.is_empty());
    }

    #[test]
    fn test_timeout_without_wake() {
        let k = FakeSched::new(Some(3));
        let head = WaitQueueHead::new();
        assert_eq!(
            wait_event_timeout(&k, &head, || false, 10),
            Err(KernelError::TimedOut)
        );
        assert_eq!(k.jiffies(), 10);
        assert!(head.is_empty());
        assert!(!k.signals.intersects(Signal::ARMED));
    }

    #[test]
    fn test_wake_between_link_and_check_is_seen() {
        let k = FakeSched::new(Some(3));
        let head = WaitQueueHead::new();
        let mut checks = 0;
        let result = wait_event_timeout(
            &k,
            &head,
            || {
                checks += 1;
                if checks == 2 {
                    // Arrives after link-in, before the first check in the loop.
                    assert_eq!(head.len(), 1);
                    assert_eq!(wake_up(&k, &head), 1);
                }
                checks == 3
            },
            50,
        );
        assert_eq!(result, Ok(50));
        assert_eq!(k.suspends.load(Ordering::SeqCst), 0);
        assert!(head.is_empty());
    }

    #[test]
    fn test_interruptible_wake_skips_normal_waiters() {
        let k = FakeSched::new(Some(3));
        let head = WaitQueueHead::new();
        let mut checks = 0;
        let result = wait_event_timeout(
            &k,
            &head,
            || {
                checks += 1;
                if checks == 2 {
                    assert_eq!(wake_up_interruptible(&k, &head), 0);
                }
                false
            },
            4,
        );
        assert_eq!(result, Err(KernelError::TimedOut));
        assert_eq!(k.suspends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kill_interrupts_only_interruptible_waits() {
        let k: &'static FakeSched = Box::leak(Box::new(FakeSched::new(Some(3))));
        let head = WaitQueueHead::new();
        k.signals.raise(Signal::KILL);
        assert_eq!(
            wait_event_interruptible(k, &head, || false),
            Err(KernelError::Interrupted)
        );
        assert!(head.is_empty());

        k.signals.raise(Signal::KILL);
        let done: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
        k.on_yield(move || done.store(true, Ordering::SeqCst));
        wait_event(k, &head, || done.load(Ordering::SeqCst)).unwrap();
        assert!(k.signals.contains(Signal::KILL));
    }
}
