use super::{JoinHandle, StackSpec, ThreadAttr, ThreadPolicy};
use crate::arch::Arch;
use crate::errors::KResult;
use crate::kernel::Kernel;
use crate::sched::Policy;
use crate::time::Jiffies;

use alloc::string::String;

/// Builder for joinable threads.
///
/// ```ignore
/// let handle = ThreadBuilder::new()
///     .name("sensor")
///     .priority(priority::NORMAL + 8)
///     .stack_size(4096)
///     .spawn(kernel, || poll_sensor())?;
/// handle.join(kernel)?;
/// ```
pub struct ThreadBuilder {
    attr: ThreadAttr,
    name: Option<String>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            attr: ThreadAttr::new().joinable(),
            name: None,
        }
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.attr.stack = StackSpec::Size(size);
        self
    }

    pub fn static_stack(mut self, memory: &'static mut [u8]) -> Self {
        self.attr.stack = StackSpec::Static(memory);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.attr.priority = priority;
        self
    }

    pub fn time_slice(mut self, ticks: Jiffies) -> Self {
        self.attr.time_slice = ticks;
        self
    }

    pub fn policy(mut self, policy: ThreadPolicy) -> Self {
        self.attr.policy = policy;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn spawn<A, P, F>(self, kernel: &'static Kernel<A, P>, f: F) -> KResult<JoinHandle>
    where
        A: Arch,
        P: Policy,
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.as_deref().unwrap_or("thread");
        let tid = kernel.kernel_thread_base_create(name, self.attr, f)?;
        Ok(JoinHandle { tid })
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
