//! Creation attributes of a thread.

use crate::config::priority;
use crate::time::Jiffies;
use core::fmt;

/// Where a thread's stack comes from.
pub enum StackSpec {
    /// A pool stack of the kernel's default size
    Default,
    /// A pool stack of at least this many bytes
    Size(usize),
    /// Caller-provided memory
    Static(&'static mut [u8]),
}

impl fmt::Debug for StackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackSpec::Default => f.write_str("Default"),
            StackSpec::Size(size) => f.debug_tuple("Size").field(size).finish(),
            StackSpec::Static(mem) => f
                .debug_struct("Static")
                .field("base", &mem.as_ptr())
                .field("len", &mem.len())
                .finish(),
        }
    }
}

/// How a thread shares the CPU with threads of its own priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPolicy {
    /// Runs until it blocks or a higher priority thread is ready
    Fifo,
    /// Also gives way when its time slice runs out
    RoundRobin,
}

/// Whether someone will collect the thread after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachState {
    /// Stays a zombie until [`thread_join`](crate::Kernel::thread_join)
    Joinable,
    /// Reclaimed by the scheduler as soon as it exits
    Detached,
}

/// Thread attributes, prepared by the caller before creation.
#[derive(Debug)]
pub struct ThreadAttr {
    pub stack: StackSpec,
    /// 0-255, higher runs first
    pub priority: u8,
    /// Time slice in jiffies, 0 for the kernel default
    pub time_slice: Jiffies,
    pub policy: ThreadPolicy,
    pub detach: DetachState,
}

impl ThreadAttr {
    pub const fn new() -> Self {
        Self {
            stack: StackSpec::Default,
            priority: priority::NORMAL,
            time_slice: 0,
            policy: ThreadPolicy::RoundRobin,
            detach: DetachState::Detached,
        }
    }

    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack = StackSpec::Size(size);
        self
    }

    pub fn with_static_stack(mut self, memory: &'static mut [u8]) -> Self {
        self.stack = StackSpec::Static(memory);
        self
    }

    pub const fn with_time_slice(mut self, ticks: Jiffies) -> Self {
        self.time_slice = ticks;
        self
    }

    pub const fn with_policy(mut self, policy: ThreadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn joinable(mut self) -> Self {
        self.detach = DetachState::Joinable;
        self
    }
}

impl Default for ThreadAttr {
    fn default() -> Self {
        Self::new()
    }
}
