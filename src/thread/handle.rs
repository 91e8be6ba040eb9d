use super::{ThreadStatus, Tid};
use crate::arch::Arch;
use crate::errors::KResult;
use crate::kernel::Kernel;
use crate::sched::Policy;

/// Owned permission to join a thread.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a joinable thread stays a zombie until joined"]
pub struct JoinHandle {
    pub(super) tid: Tid,
}

impl JoinHandle {
    /// Wait for the thread to exit and reclaim its slot and stack.
    pub fn join<A: Arch, P: Policy>(self, kernel: &Kernel<A, P>) -> KResult<()> {
        kernel.thread_join(self.tid)
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Whether the thread has not exited yet.
    pub fn is_alive<A: Arch, P: Policy>(&self, kernel: &Kernel<A, P>) -> bool {
        !matches!(
            kernel.thread_status(self.tid),
            Ok(ThreadStatus::None) | Err(_)
        )
    }
}
