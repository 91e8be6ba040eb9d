//! Thread control blocks.
//!
//! A [`Thread`] is owned by the kernel's thread table and only ever touched
//! with the table lock held. Threads refer to each other by [`Tid`], never by
//! pointer.

use crate::arch::Arch;
use crate::config::REAL_THREAD_NAME_LEN;
use crate::mem::Stack;
use crate::time::Jiffies;
use core::cell::UnsafeCell;
use core::fmt;
use core::num::NonZeroU16;

pub mod attr;
pub mod builder;
pub mod handle;
pub mod signal;

pub use attr::{DetachState, StackSpec, ThreadAttr, ThreadPolicy};
pub use builder::ThreadBuilder;
pub use handle::JoinHandle;
pub use signal::{Signal, SignalSet};

/// Thread identifier: the index of the thread's slot in the table.
///
/// Slot 0 is reserved, so a `Tid` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(NonZeroU16);

impl Tid {
    pub const fn new(raw: u16) -> Option<Self> {
        match NonZeroU16::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u16::try_from(index).ok().and_then(Self::new)
    }

    /// Slot index in the thread table.
    pub const fn index(self) -> usize {
        self.0.get() as usize
    }

    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state. Each status except `Running` and `None` corresponds to
/// exactly one scheduler queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Not in any queue: being created, or exited
    None = 0,
    Running = 1,
    Ready = 2,
    /// Parked until a wakeup or a timeout
    Suspend = 3,
    /// Parked until an explicit wakeup
    Sleep = 4,
}

/// Fixed-length thread name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadName {
    bytes: [u8; REAL_THREAD_NAME_LEN],
    len: u8,
}

impl ThreadName {
    /// Copy `name`, truncated at a character boundary to fit.
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(REAL_THREAD_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; REAL_THREAD_NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

impl fmt::Debug for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread control block.
pub struct Thread<A: Arch> {
    pub(crate) tid: Tid,
    pub(crate) name: ThreadName,
    pub(crate) status: ThreadStatus,
    /// Transition requested by the running thread, applied when it switches out
    pub(crate) to_status: ThreadStatus,
    pub(crate) priority: u8,
    pub(crate) time_slice: Jiffies,
    pub(crate) policy: ThreadPolicy,
    pub(crate) detach: DetachState,
    /// End of the current time slice
    pub(crate) expires: Jiffies,
    /// Exited, waiting to be reaped or joined
    pub(crate) zombie: bool,
    /// Thread parked in a join on this one
    pub(crate) joiner: Option<Tid>,
    pub(crate) signals: SignalSet,
    pub(crate) context: UnsafeCell<A::SavedContext>,
    /// `None` for a context adopted from boot code
    pub(crate) stack: Option<Stack>,
}

impl<A: Arch> Thread<A> {
    pub(crate) fn new(tid: Tid, name: &str, attr: &ThreadAttr, time_slice: Jiffies) -> Self {
        Self {
            tid,
            name: ThreadName::new(name),
            status: ThreadStatus::None,
            to_status: ThreadStatus::None,
            priority: attr.priority,
            time_slice,
            policy: attr.policy,
            detach: attr.detach,
            expires: 0,
            zombie: false,
            joiner: None,
            signals: SignalSet::new(),
            context: UnsafeCell::new(A::SavedContext::default()),
            stack: None,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    pub(crate) fn context_ptr(&self) -> *mut A::SavedContext {
        self.context.get()
    }

    /// Whether the stack canary is intact. Adopted contexts have no stack to check.
    pub(crate) fn stack_intact(&self) -> bool {
        self.stack.as_ref().map_or(true, Stack::check_canary)
    }
}

impl<A: Arch> fmt::Debug for Thread<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("priority", &self.priority)
            .field("expires", &self.expires)
            .field("signals", &self.signals.get())
            .field("zombie", &self.zombie)
            .finish()
    }
}
