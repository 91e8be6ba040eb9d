//! The thread table and the scheduler queues.
//!
//! Slots `1..REAL_THREAD_MAX_NUM` live in a fixed array; once those are taken,
//! an overflow vector grows up to the configured cap. A thread's [`Tid`] is
//! its slot index. The ready, suspend and sleep queues hold tids, and every
//! thread is in at most one of them, the one matching its status. The running
//! thread is in none.

use crate::arch::Arch;
use crate::config::REAL_THREAD_MAX_NUM;
use crate::errors::{KResult, KernelError};
use crate::thread::{DetachState, Thread, ThreadStatus, Tid};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

type Slot<A> = Option<Box<Thread<A>>>;

/// Queue lengths and dispatch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedStats {
    pub threads: usize,
    pub ready: usize,
    pub suspended: usize,
    pub sleeping: usize,
    pub zombies: usize,
    /// Dispatches, modulo 2^32
    pub schedule_count: u32,
    /// How many times `schedule_count` wrapped
    pub schedule_overflows: u32,
}

pub struct ThreadTable<A: Arch> {
    fixed: [Slot<A>; REAL_THREAD_MAX_NUM],
    overflow: Vec<Slot<A>>,
    overflow_cap: usize,
    ready: VecDeque<Tid>,
    suspend: VecDeque<Tid>,
    sleep: VecDeque<Tid>,
    current: Option<Tid>,
    schedule_count: u32,
    schedule_overflows: u32,
}

impl<A: Arch> ThreadTable<A> {
    /// Create an empty table. Queue storage for every possible thread is
    /// reserved up front so that queue moves never allocate.
    pub fn new(overflow_cap: usize) -> KResult<Self> {
        let max = REAL_THREAD_MAX_NUM - 1 + overflow_cap;
        let mut queues = [VecDeque::new(), VecDeque::new(), VecDeque::new()];
        for q in queues.iter_mut() {
            q.try_reserve(max)?;
        }
        let [ready, suspend, sleep] = queues;
        Ok(Self {
            fixed: core::array::from_fn(|_| None),
            overflow: Vec::new(),
            overflow_cap,
            ready,
            suspend,
            sleep,
            current: None,
            schedule_count: 0,
            schedule_overflows: 0,
        })
    }

    fn slot(&self, tid: Tid) -> Option<&Slot<A>> {
        let index = tid.index();
        if index < REAL_THREAD_MAX_NUM {
            self.fixed.get(index)
        } else {
            self.overflow.get(index - REAL_THREAD_MAX_NUM)
        }
    }

    fn slot_mut(&mut self, tid: Tid) -> Option<&mut Slot<A>> {
        let index = tid.index();
        if index < REAL_THREAD_MAX_NUM {
            self.fixed.get_mut(index)
        } else {
            self.overflow.get_mut(index - REAL_THREAD_MAX_NUM)
        }
    }

    /// Find a free slot, growing the overflow area if the fixed table is full.
    ///
    /// # Returns
    ///
    /// The tid of the free slot, or `NoMem` when the table is at capacity or
    /// the overflow area cannot grow.
    pub fn get_unused_tid(&mut self) -> KResult<Tid> {
        if let Some(index) = (1..REAL_THREAD_MAX_NUM).find(|&i| self.fixed[i].is_none()) {
            return Tid::from_index(index).ok_or(KernelError::Fault);
        }
        if let Some(pos) = self.overflow.iter().position(Option::is_none) {
            return Tid::from_index(REAL_THREAD_MAX_NUM + pos).ok_or(KernelError::NoMem);
        }
        if self.overflow.len() >= self.overflow_cap {
            return Err(KernelError::NoMem);
        }
        let tid = Tid::from_index(REAL_THREAD_MAX_NUM + self.overflow.len()).ok_or(KernelError::NoMem)?;
        self.overflow.try_reserve(1)?;
        self.overflow.push(None);
        Ok(tid)
    }

    /// Put a new thread into its slot. It starts in no queue.
    pub fn insert(&mut self, thread: Box<Thread<A>>) -> KResult<()> {
        let slot = self.slot_mut(thread.tid).ok_or(KernelError::NotFound)?;
        if slot.is_some() {
            return Err(KernelError::Busy);
        }
        *slot = Some(thread);
        Ok(())
    }

    pub fn get(&self, tid: Tid) -> Option<&Thread<A>> {
        self.slot(tid).and_then(|s| s.as_deref())
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread<A>> {
        self.slot_mut(tid).and_then(|s| s.as_deref_mut())
    }

    /// Take a thread out of the table. It must not be queued or running.
    pub fn remove(&mut self, tid: Tid) -> KResult<Box<Thread<A>>> {
        let thread = self.get(tid).ok_or(KernelError::NotFound)?;
        if thread.status != ThreadStatus::None || self.current == Some(tid) {
            return Err(KernelError::Busy);
        }
        self.slot_mut(tid)
            .and_then(Option::take)
            .ok_or(KernelError::NotFound)
    }

    fn queue_mut(&mut self, status: ThreadStatus) -> Option<&mut VecDeque<Tid>> {
        match status {
            ThreadStatus::Ready => Some(&mut self.ready),
            ThreadStatus::Suspend => Some(&mut self.suspend),
            ThreadStatus::Sleep => Some(&mut self.sleep),
            ThreadStatus::None | ThreadStatus::Running => None,
        }
    }

    fn queue(&self, status: ThreadStatus) -> Option<&VecDeque<Tid>> {
        match status {
            ThreadStatus::Ready => Some(&self.ready),
            ThreadStatus::Suspend => Some(&self.suspend),
            ThreadStatus::Sleep => Some(&self.sleep),
            ThreadStatus::None | ThreadStatus::Running => None,
        }
    }

    /// Move a thread to the queue of `to`, leaving the queue of its current
    /// status. Moving to the status it already has keeps its queue position.
    ///
    /// `current` is not touched; the dispatcher owns it.
    ///
    /// # Returns
    ///
    /// The previous status.
    pub fn transfer(&mut self, tid: Tid, to: ThreadStatus) -> KResult<ThreadStatus> {
        let from = self.get(tid).ok_or(KernelError::NotFound)?.status;
        if from == to {
            return Ok(from);
        }
        if let Some(queue) = self.queue_mut(from) {
            let pos = queue.iter().position(|&t| t == tid).ok_or(KernelError::Fault)?;
            queue.remove(pos);
        }
        if let Some(queue) = self.queue_mut(to) {
            queue.push_back(tid);
        }
        if let Some(thread) = self.get_mut(tid) {
            thread.status = to;
        }
        log::trace!("tid {}: {:?} -> {:?}", tid, from, to);
        Ok(from)
    }

    /// Ready threads in queue order.
    pub fn ready_threads(&self) -> impl Iterator<Item = &Thread<A>> + '_ {
        self.ready.iter().filter_map(move |&tid| self.get(tid))
    }

    pub fn ready_at(&self, pos: usize) -> Option<Tid> {
        self.ready.get(pos).copied()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn highest_ready_priority(&self) -> Option<u8> {
        self.ready_threads().map(|t| t.priority).max()
    }

    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    pub(crate) fn set_current(&mut self, tid: Option<Tid>) {
        self.current = tid;
    }

    pub fn current_thread(&self) -> Option<&Thread<A>> {
        self.current.and_then(|tid| self.get(tid))
    }

    pub(crate) fn count_schedule(&mut self) {
        if self.schedule_count == u32::MAX {
            self.schedule_count = 0;
            self.schedule_overflows = self.schedule_overflows.saturating_add(1);
        } else {
            self.schedule_count += 1;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread<A>> + '_ {
        self.fixed
            .iter()
            .chain(self.overflow.iter())
            .filter_map(|s| s.as_deref())
    }

    /// Remove every exited, detached thread that is not running, handing each
    /// one to `release`.
    pub fn reap_zombies(&mut self, mut release: impl FnMut(Box<Thread<A>>)) -> usize {
        let current = self.current;
        let mut reaped = 0;
        let slots = self.fixed.iter_mut().chain(self.overflow.iter_mut());
        for slot in slots {
            let reapable = matches!(slot, Some(t) if t.zombie
                && t.detach == DetachState::Detached
                && Some(t.tid) != current);
            if reapable {
                if let Some(thread) = slot.take() {
                    log::debug!("reaped tid {} ({})", thread.tid, thread.name);
                    release(thread);
                    reaped += 1;
                }
            }
        }
        reaped
    }

    pub fn stats(&self) -> SchedStats {
        SchedStats {
            threads: self.iter().count(),
            ready: self.ready.len(),
            suspended: self.suspend.len(),
            sleeping: self.sleep.len(),
            zombies: self.iter().filter(|t| t.zombie).count(),
            schedule_count: self.schedule_count,
            schedule_overflows: self.schedule_overflows,
        }
    }

    /// Verify that every thread sits in exactly the queue its status names
    /// and that the running thread is in none.
    pub fn check_invariants(&self) -> KResult<()> {
        for thread in self.iter() {
            for status in [ThreadStatus::Ready, ThreadStatus::Suspend, ThreadStatus::Sleep] {
                let copies = self
                    .queue(status)
                    .map_or(0, |q| q.iter().filter(|&&t| t == thread.tid).count());
                let expected = usize::from(thread.status == status);
                if copies != expected {
                    log::error!("tid {} ({:?}) queued {} times as {:?}", thread.tid, thread.status, copies, status);
                    return Err(KernelError::Fault);
                }
            }
            let is_current = self.current == Some(thread.tid);
            if is_current != (thread.status == ThreadStatus::Running) {
                log::error!("tid {} status {:?}, current {:?}", thread.tid, thread.status, self.current);
                return Err(KernelError::Fault);
            }
        }
        let queued = self.ready.iter().chain(&self.suspend).chain(&self.sleep);
        for &tid in queued {
            if self.get(tid).is_none() {
                log::error!("queued tid {} has no thread", tid);
                return Err(KernelError::Fault);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostArch;
    use crate::thread::ThreadAttr;
    use alloc::vec;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    type Table = ThreadTable<HostArch>;

    fn add(table: &mut Table, name: &str, priority: u8) -> Tid {
        let tid = table.get_unused_tid().unwrap();
        let attr = ThreadAttr::new().with_priority(priority);
        table
            .insert(Box::new(Thread::new(tid, name, &attr, 10)))
            .unwrap();
        tid
    }

    #[test]
    fn test_tid_zero_never_handed_out() {
        let mut table = Table::new(0).unwrap();
        let first = add(&mut table, "a", 1);
        assert_eq!(first.index(), 1);
    }

    #[test]
    fn test_overflow_area_and_capacity() {
        let mut table = Table::new(2).unwrap();
        let mut tids = vec![];
        for _ in 1..REAL_THREAD_MAX_NUM + 2 {
            tids.push(add(&mut table, "t", 1));
        }
        assert_eq!(tids.last().map(|t| t.index()), Some(REAL_THREAD_MAX_NUM + 1));
        assert_eq!(table.get_unused_tid(), Err(KernelError::NoMem));

        // A freed overflow slot is found again.
        let victim = tids[REAL_THREAD_MAX_NUM - 1];
        table.remove(victim).unwrap();
        assert_eq!(table.get_unused_tid(), Ok(victim));
    }

    #[test]
    fn test_transfer_moves_between_queues() {
        let mut table = Table::new(0).unwrap();
        let a = add(&mut table, "a", 1);
        let b = add(&mut table, "b", 1);
        table.transfer(a, ThreadStatus::Ready).unwrap();
        table.transfer(b, ThreadStatus::Ready).unwrap();
        assert_eq!(table.ready_at(0), Some(a));

        assert_eq!(table.transfer(a, ThreadStatus::Sleep), Ok(ThreadStatus::Ready));
        assert_eq!(table.ready_at(0), Some(b));
        assert_eq!(table.stats().sleeping, 1);
        table.check_invariants().unwrap();

        assert_eq!(table.remove(a).unwrap_err(), KernelError::Busy);
        table.transfer(a, ThreadStatus::None).unwrap();
        assert!(table.remove(a).is_ok());
        table.check_invariants().unwrap();
    }

    #[test]
    fn test_reap_skips_current_and_joinable() {
        let mut table = Table::new(0).unwrap();
        let a = add(&mut table, "a", 1);
        let b = add(&mut table, "b", 1);
        let c = add(&mut table, "c", 1);
        for tid in [a, b, c] {
            table.get_mut(tid).unwrap().zombie = true;
        }
        table.get_mut(b).unwrap().detach = DetachState::Joinable;
        table.set_current(Some(c));

        let mut released = vec![];
        assert_eq!(table.reap_zombies(|t| released.push(t.tid)), 1);
        assert_eq!(released, vec![a]);
        assert!(table.get(b).is_some());
        assert!(table.get(c).is_some());
    }

    #[test]
    fn test_schedule_counter_saturates_and_counts() {
        let mut table = Table::new(0).unwrap();
        table.schedule_count = u32::MAX - 1;
        table.count_schedule();
        table.count_schedule();
        let stats = table.stats();
        assert_eq!(stats.schedule_count, 0);
        assert_eq!(stats.schedule_overflows, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(u8),
        Move(usize, u8),
        Destroy(usize),
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            match u8::arbitrary(g) % 3 {
                0 => Op::Create(u8::arbitrary(g)),
                1 => Op::Move(usize::arbitrary(g), u8::arbitrary(g)),
                _ => Op::Destroy(usize::arbitrary(g)),
            }
        }
    }

    // Any sequence of creations, queue moves and teardowns keeps every
    // thread in exactly one queue and keeps live tids unique.
    #[quickcheck]
    fn prop_single_membership(ops: Vec<Op>) -> bool {
        let mut table = Table::new(4).unwrap();
        let mut live: Vec<Tid> = vec![];
        for op in ops {
            match op {
                Op::Create(p) => {
                    if let Ok(tid) = table.get_unused_tid() {
                        if live.contains(&tid) {
                            return false;
                        }
                        let attr = ThreadAttr::new().with_priority(p);
                        table.insert(Box::new(Thread::new(tid, "p", &attr, 1))).unwrap();
                        table.transfer(tid, ThreadStatus::Ready).unwrap();
                        live.push(tid);
                    }
                }
                Op::Move(i, s) if !live.is_empty() => {
                    let tid = live[i % live.len()];
                    let to = match s % 4 {
                        0 => ThreadStatus::Ready,
                        1 => ThreadStatus::Suspend,
                        2 => ThreadStatus::Sleep,
                        _ => ThreadStatus::None,
                    };
                    table.transfer(tid, to).unwrap();
                }
                Op::Destroy(i) if !live.is_empty() => {
                    let tid = live.swap_remove(i % live.len());
                    table.transfer(tid, ThreadStatus::None).unwrap();
                    table.remove(tid).unwrap();
                }
                _ => {}
            }
            if table.check_invariants().is_err() {
                return false;
            }
        }
        table.stats().threads == live.len()
    }
}
