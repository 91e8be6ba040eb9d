#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! Scheduler core of a small RTOS for single-core ARMv7 boards.
//!
//! The crate provides the thread table and thread state machine, jiffies and
//! software timers, a cooperative lock family (spinlock, mutex, semaphore),
//! wait queues with signal-based wakeup, a workqueue, and the built-in
//! kernel threads (idle, init, kthread, kworker).
//!
//! # Target Platform
//!
//! - **Architecture**: ARMv7-A, single core, bare metal
//! - **Hosted**: every other target runs the same kernel on `std` threads,
//!   one at a time, which is what the test suite uses
//!
//! # Features
//!
//! - `preempt`: priority scheduling with tick-driven preemption (default)
//! - `roll-poll`: cooperative scheduling in ready-list order
//! - neither: cooperative strict-priority scheduling
//! - `full-fpu`: save d8-d15 across context switches (default)
//! - `qemu-virt`: console address of the QEMU `virt` board
//!
//! # Quick Start
//!
//! ```ignore
//! use mrt_kernel::{Kernel, KernelConfig};
//! use spin::Lazy;
//!
//! static KERNEL: Lazy<Kernel> =
//!     Lazy::new(|| Kernel::new(KernelConfig::DEFAULT).expect("kernel tables"));
//!
//! fn setup(kernel: &'static Kernel) -> mrt_kernel::KResult<()> {
//!     kernel.spawn(|| loop { /* thread work */ })?;
//!     Ok(())
//! }
//!
//! fn kernel_main() -> ! {
//!     KERNEL.register_initcall("setup", setup).expect("initcall table");
//!     KERNEL.start_kernel()
//! }
//! ```
//!
//! # Architecture
//!
//! - [`arch`]: context switch and interrupt masking behind the [`Arch`] trait
//! - [`kernel`]: the [`Kernel`] context object that owns all scheduler state
//! - [`sched`]: thread table, queues and scheduling policies
//! - [`sync`]: locks, wait queues and the workqueue, written against
//!   [`SchedContext`]
//! - [`irq`]: soft IRQ dispatch and the system tick action

#[cfg(not(target_arch = "arm"))]
extern crate std;

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errors;
pub mod fatal;
pub mod irq;
pub mod kernel;
pub mod kthread;
pub mod logger;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
mod tests;

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    log::error!("panic: {}", info);
    fatal::dump();
    arch::armv7::halt()
}

// ============================================================================
// Public API
// ============================================================================

pub use arch::{Arch, DefaultArch, IrqFlags};
pub use config::{priority, KernelConfig};
pub use errors::{KResult, KernelError};
pub use kernel::Kernel;
pub use sched::{DefaultPolicy, Policy, Preemptive, PriorityPoll, RoundRobin, SchedContext};
pub use sync::{Mutex, Semaphore, SpinLock, WaitQueueHead, Work};
pub use thread::{JoinHandle, ThreadAttr, ThreadBuilder, ThreadStatus, Tid};
pub use time::{Jiffies, TimerId};
