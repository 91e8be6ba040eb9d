//! Software timers driven by the tick interrupt.
//!
//! Timers live in a slab owned by the [`TimerList`]; callers hold a
//! [`TimerId`] handle (slot index plus generation, so a handle to a released
//! slot is detected rather than aliasing a newer timer). Linked timers are kept
//! in insertion order and [`do_timer_event`] scans them once per tick.
//!
//! Firing a timer does not unlink it: a callback that neither re-arms nor
//! deletes its timer runs again on every following tick.

use super::{time_after_eq, Jiffies};
use crate::errors::{KResult, KernelError};
use alloc::vec::Vec;
use core::fmt;
use core::ops::DerefMut;

/// Timer callback. Receives the owning context and the word of data given to
/// [`TimerList::setup_timer`].
pub type TimerFn<C> = fn(&C, usize);

/// Handle to a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

struct TimerState<C> {
    func: TimerFn<C>,
    data: usize,
    expires: Jiffies,
    linked: bool,
}

struct TimerSlot<C> {
    generation: u32,
    state: Option<TimerState<C>>,
}

/// The list of software timers of one kernel.
pub struct TimerList<C> {
    slots: Vec<TimerSlot<C>>,
    free: Vec<u32>,
    /// Linked timers, in insertion order
    active: Vec<u32>,
}

impl<C> TimerList<C> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Create an unlinked timer.
    ///
    /// # Returns
    ///
    /// The handle of the new timer, or `NoMem` if the slab cannot grow.
    pub fn setup_timer(&mut self, func: TimerFn<C>, data: usize) -> KResult<TimerId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| KernelError::NoMem)?;
                self.slots.try_reserve(1)?;
                // Linking and releasing must never allocate.
                self.active.try_reserve(self.slots.len() + 1 - self.active.len())?;
                self.free.try_reserve(self.slots.len() + 1 - self.free.len())?;
                self.slots.push(TimerSlot {
                    generation: 0,
                    state: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.state = Some(TimerState {
            func,
            data,
            expires: 0,
            linked: false,
        });
        Ok(TimerId {
            index,
            generation: slot.generation,
        })
    }

    fn state(&self, id: TimerId) -> KResult<&TimerState<C>> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.state.as_ref().ok_or(KernelError::NoDev)
            }
            _ => Err(KernelError::NoDev),
        }
    }

    fn state_mut(&mut self, id: TimerId) -> KResult<&mut TimerState<C>> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.state.as_mut().ok_or(KernelError::NoDev)
            }
            _ => Err(KernelError::NoDev),
        }
    }

    /// Link a timer that is not yet pending.
    ///
    /// Fails with `Busy` if the timer is already linked.
    pub fn add_timer(&mut self, id: TimerId, expires: Jiffies) -> KResult<()> {
        let state = self.state_mut(id)?;
        if state.linked {
            return Err(KernelError::Busy);
        }
        state.expires = expires;
        state.linked = true;
        self.active.push(id.index);
        Ok(())
    }

    /// Set the expiry of a timer and link it if it is not pending.
    ///
    /// # Returns
    ///
    /// `true` if the timer was already pending.
    pub fn mod_timer(&mut self, id: TimerId, expires: Jiffies) -> KResult<bool> {
        let state = self.state_mut(id)?;
        state.expires = expires;
        if state.linked {
            return Ok(true);
        }
        state.linked = true;
        self.active.push(id.index);
        Ok(false)
    }

    /// Unlink a pending timer. `NotFound` if it was not pending.
    pub fn del_timer(&mut self, id: TimerId) -> KResult<()> {
        let state = self.state_mut(id)?;
        if !state.linked {
            return Err(KernelError::NotFound);
        }
        state.linked = false;
        self.unlink(id.index)
    }

    fn unlink(&mut self, index: u32) -> KResult<()> {
        let pos = self
            .active
            .iter()
            .position(|&i| i == index)
            .ok_or(KernelError::Fault)?;
        self.active.remove(pos);
        Ok(())
    }

    /// Unlink the timer if needed and free its slot. The handle becomes stale.
    pub fn release_timer(&mut self, id: TimerId) -> KResult<()> {
        let linked = self.state(id)?.linked;
        if linked {
            self.unlink(id.index)?;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.state = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    pub fn timer_pending(&self, id: TimerId) -> bool {
        self.state(id).map(|s| s.linked).unwrap_or(false)
    }

    pub fn expires(&self, id: TimerId) -> KResult<Jiffies> {
        self.state(id).map(|s| s.expires)
    }

    /// Number of linked timers.
    pub fn pending_count(&self) -> usize {
        self.active.len()
    }

    /// Number of allocated timers, linked or not.
    pub fn allocated_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn entry_at(&self, pos: usize) -> Option<(u32, &TimerState<C>)> {
        let index = *self.active.get(pos)?;
        let state = self.slots[index as usize].state.as_ref()?;
        Some((index, state))
    }
}

impl<C> Default for TimerList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TimerList<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerList")
            .field("allocated", &self.allocated_count())
            .field("pending", &self.active)
            .finish()
    }
}

/// Fire every linked timer whose expiry is at or before `now`, in list order.
///
/// `lock` is called to access the list; the lock is not held while a callback
/// runs, so callbacks may re-arm, delete or release timers, including their
/// own.
///
/// # Returns
///
/// The number of callbacks invoked.
pub fn do_timer_event<C, G, L>(ctx: &C, now: Jiffies, lock: L) -> usize
where
    L: Fn() -> G,
    G: DerefMut<Target = TimerList<C>>,
{
    let mut pos = 0;
    let mut fired = 0;
    loop {
        let (index, func, data) = {
            let list = lock();
            let Some((index, state)) = list.entry_at(pos) else {
                break;
            };
            if !time_after_eq(now, state.expires) {
                pos += 1;
                continue;
            }
            (index, state.func, state.data)
        };

        func(ctx, data);
        fired += 1;

        // If the callback unlinked this entry, whatever moved into `pos` has
        // not been looked at yet.
        if lock().active.get(pos) == Some(&index) {
            pos += 1;
        }
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use quickcheck_macros::quickcheck;
    use spin::Mutex;

    struct Recorder {
        fired: Mutex<Vec<usize>>,
        timers: Mutex<TimerList<Recorder>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                fired: Mutex::new(Vec::new()),
                timers: Mutex::new(TimerList::new()),
            }
        }

        fn run(&self, now: Jiffies) -> usize {
            do_timer_event(self, now, || self.timers.lock())
        }
    }

    fn record(r: &Recorder, data: usize) {
        r.fired.lock().push(data);
    }

    fn record_and_delete(r: &Recorder, data: usize) {
        r.fired.lock().push(data);
        let id = r.timers.lock().active_ids()[0];
        r.timers.lock().del_timer(id).unwrap();
    }

    impl<C> TimerList<C> {
        fn active_ids(&self) -> Vec<TimerId> {
            self.active
                .iter()
                .map(|&index| TimerId {
                    index,
                    generation: self.slots[index as usize].generation,
                })
                .collect()
        }
    }

    #[test]
    fn test_fires_in_list_order_and_stays_linked() {
        let r = Recorder::new();
        {
            let mut list = r.timers.lock();
            let a = list.setup_timer(record, 1).unwrap();
            let b = list.setup_timer(record, 2).unwrap();
            let c = list.setup_timer(record, 3).unwrap();
            list.add_timer(b, 5).unwrap();
            list.add_timer(a, 5).unwrap();
            list.add_timer(c, 9).unwrap();
        }

        assert_eq!(r.run(4), 0);
        assert_eq!(r.run(5), 2);
        assert_eq!(*r.fired.lock(), vec![2, 1]);

        // Not re-armed, not deleted: fires again.
        assert_eq!(r.run(6), 2);
        assert_eq!(r.timers.lock().pending_count(), 3);
    }

    #[test]
    fn test_callback_deleting_itself_does_not_skip_next() {
        let r = Recorder::new();
        {
            let mut list = r.timers.lock();
            let a = list.setup_timer(record_and_delete, 1).unwrap();
            let b = list.setup_timer(record, 2).unwrap();
            list.add_timer(a, 1).unwrap();
            list.add_timer(b, 1).unwrap();
        }
        assert_eq!(r.run(1), 2);
        assert_eq!(*r.fired.lock(), vec![1, 2]);
        assert_eq!(r.timers.lock().pending_count(), 1);
    }

    #[test]
    fn test_add_and_del_errors() {
        let mut list: TimerList<Recorder> = TimerList::new();
        let t = list.setup_timer(record, 0).unwrap();
        assert_eq!(list.del_timer(t), Err(KernelError::NotFound));
        list.add_timer(t, 10).unwrap();
        assert_eq!(list.add_timer(t, 11), Err(KernelError::Busy));
        assert!(list.timer_pending(t));
        list.del_timer(t).unwrap();
        assert!(!list.timer_pending(t));
    }

    #[test]
    fn test_stale_handle_after_release() {
        let mut list: TimerList<Recorder> = TimerList::new();
        let t = list.setup_timer(record, 0).unwrap();
        list.add_timer(t, 3).unwrap();
        list.release_timer(t).unwrap();
        assert_eq!(list.pending_count(), 0);
        assert_eq!(list.mod_timer(t, 4), Err(KernelError::NoDev));

        let reused = list.setup_timer(record, 1).unwrap();
        assert_ne!(reused, t);
        assert_eq!(list.allocated_count(), 1);
        assert_eq!(list.release_timer(t), Err(KernelError::NoDev));
    }

    #[test]
    fn test_expiry_across_wrap() {
        let r = Recorder::new();
        {
            let mut list = r.timers.lock();
            let t = list.setup_timer(record, 7).unwrap();
            list.add_timer(t, 2).unwrap();
        }
        assert_eq!(r.run(u32::MAX - 1), 0);
        assert_eq!(r.run(u32::MAX), 0);
        assert_eq!(r.run(1), 0);
        assert_eq!(r.run(2), 1);
    }

    // mod_timer twice with the same expiry leaves the timer linked exactly once.
    #[quickcheck]
    fn prop_mod_timer_idempotent(expires: u32, repeats: u8) -> bool {
        let mut list: TimerList<Recorder> = TimerList::new();
        let t = list.setup_timer(record, 0).unwrap();
        let first = list.mod_timer(t, expires).unwrap();
        let mut again = true;
        for _ in 0..(repeats % 8) + 1 {
            again &= list.mod_timer(t, expires).unwrap();
        }
        !first
            && again
            && list.pending_count() == 1
            && list.expires(t) == Ok(expires)
            && list.active.iter().filter(|&&i| i == t.index).count() == 1
    }
}
