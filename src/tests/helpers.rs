//! Boot and drive helpers shared by the scenarios.

use crate::arch::host::HostArch;
use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::sched::Policy;
use crate::thread::{ThreadAttr, Tid};
use alloc::boxed::Box;
use alloc::vec::Vec;

pub(super) type HostKernel<P> = Kernel<HostArch, P>;

/// Route kernel logs to the test output. Safe to call from every test.
pub(super) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Boot a fresh kernel and adopt the calling test thread at `priority`.
pub(super) fn boot<P: Policy>(priority: u8) -> (&'static HostKernel<P>, Tid) {
    boot_with(priority, ThreadAttr::new())
}

pub(super) fn boot_with<P: Policy>(priority: u8, attr: ThreadAttr) -> (&'static HostKernel<P>, Tid) {
    init_logging();
    let kernel: &'static HostKernel<P> =
        Box::leak(Box::new(Kernel::new(KernelConfig::DEFAULT).unwrap()));
    kernel.init().unwrap();
    let me = kernel
        .adopt_current("test", attr.with_priority(priority))
        .unwrap();
    (kernel, me)
}

/// Simulate timer interrupts, yielding after each one, until `done` holds.
///
/// # Returns
///
/// Whether `done` held within `max_ticks` ticks.
pub(super) fn drive<P: Policy>(
    kernel: &HostKernel<P>,
    max_ticks: u32,
    mut done: impl FnMut() -> bool,
) -> bool {
    for _ in 0..max_ticks {
        if done() {
            return true;
        }
        kernel.timer_interrupt();
        kernel.irq_exit();
        kernel.schedule_thread();
    }
    done()
}

/// Event log shared between threads of one scenario.
pub(super) struct Trace(spin::Mutex<Vec<&'static str>>);

impl Trace {
    pub(super) fn leak() -> &'static Self {
        Box::leak(Box::new(Self(spin::Mutex::new(Vec::new()))))
    }

    pub(super) fn push(&self, event: &'static str) {
        self.0.lock().push(event);
    }

    pub(super) fn events(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}
