//! Architecture abstraction layer for context switching and interrupt masking.
//!
//! The scheduler never looks at registers itself. Everything it needs from the
//! CPU goes through [`Arch`]:
//! - preparing a fresh context so that its first switch-in runs `entry(arg)`
//! - switching between two saved contexts
//! - masking and unmasking interrupts
//!
//! `armv7` is the real port. Every other target gets the hosted port in
//! `host`, which backs each kernel thread with a `std` thread.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// First function a new thread runs. `arg` comes from [`Arch::init_context`].
///
/// The hosted port retires the backing thread of an exited context by
/// unwinding out of [`Arch::context_switch_final`], so entries must allow it.
pub type ThreadEntry = extern "C-unwind" fn(arg: usize) -> !;

/// Interrupt state captured by [`Arch::irq_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "interrupt state must be handed back to irq_restore"]
pub struct IrqFlags(pub(crate) bool);

impl IrqFlags {
    /// Whether interrupts were enabled when the state was saved.
    pub fn were_enabled(self) -> bool {
        self.0
    }
}

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations involve inline assembly and raw stack manipulation. The
/// unsafe methods have preconditions that the scheduler upholds.
pub trait Arch: 'static {
    /// Everything needed to resume a thread that switched out.
    type SavedContext: Send + Sync + Default + fmt::Debug;

    /// Prepare `ctx` so that the first [`context_switch`](Arch::context_switch)
    /// into it calls `entry(arg)` on the stack ending at `stack_top`.
    ///
    /// # Safety
    ///
    /// - `stack_top` must be the 8-byte aligned end of a stack that stays
    ///   allocated until the thread is torn down
    /// - `ctx` must not currently be running
    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        entry: ThreadEntry,
        arg: usize,
        stack_top: *mut u8,
    );

    /// Save the running context into `prev` and resume `next`.
    ///
    /// Returns when some other thread switches back into `prev`.
    ///
    /// # Safety
    ///
    /// - both pointers must be valid for the whole call and not aliased
    /// - `prev` must describe the calling thread
    /// - must be called with interrupts disabled
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Resume `next` without saving the caller, which never runs again.
    ///
    /// # Safety
    ///
    /// Same as [`context_switch`](Arch::context_switch) for `next`.
    unsafe fn context_switch_final(next: *const Self::SavedContext) -> ! {
        let mut scratch = Self::SavedContext::default();
        // SAFETY: scratch lives on this stack, which is never resumed.
        unsafe { Self::context_switch(&mut scratch, next) };
        loop {
            Self::wait_for_interrupt();
        }
    }

    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Disable interrupts and return the previous state.
    #[inline]
    fn irq_save() -> IrqFlags {
        let flags = IrqFlags(Self::interrupts_enabled());
        Self::disable_interrupts();
        flags
    }

    /// Restore the state returned by [`irq_save`](Arch::irq_save).
    #[inline]
    fn irq_restore(flags: IrqFlags) {
        if flags.0 {
            Self::enable_interrupts();
        }
    }

    /// Idle the CPU until something happens.
    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}

/// A `spin::Mutex` that also masks interrupts while held.
///
/// Kernel state touched from interrupt context lives behind one of these, so
/// an interrupt can never spin on a lock its own CPU already holds.
pub struct IrqMutex<A: Arch, T> {
    inner: spin::Mutex<T>,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch, T> IrqMutex<A, T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
            _arch: PhantomData,
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, A, T> {
        let flags = A::irq_save();
        IrqMutexGuard {
            guard: Some(self.inner.lock()),
            flags,
            _arch: PhantomData,
        }
    }

    /// Take the lock only if it is free. Used on paths that must not spin,
    /// such as the fatal dump.
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, A, T>> {
        let flags = A::irq_save();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqMutexGuard {
                guard: Some(guard),
                flags,
                _arch: PhantomData,
            }),
            None => {
                A::irq_restore(flags);
                None
            }
        }
    }
}

pub struct IrqMutexGuard<'a, A: Arch, T> {
    guard: Option<spin::MutexGuard<'a, T>>,
    flags: IrqFlags,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch, T> Deref for IrqMutexGuard<'_, A, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The guard is only taken out in drop.
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!(),
        }
    }
}

impl<A: Arch, T> DerefMut for IrqMutexGuard<'_, A, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!(),
        }
    }
}

impl<A: Arch, T> Drop for IrqMutexGuard<'_, A, T> {
    fn drop(&mut self) {
        // Unlock before interrupts come back.
        drop(self.guard.take());
        A::irq_restore(self.flags);
    }
}

#[cfg(target_arch = "arm")]
pub mod armv7;

#[cfg(not(target_arch = "arm"))]
pub mod host;

#[cfg(target_arch = "arm")]
pub use armv7::Armv7Arch as DefaultArch;

#[cfg(not(target_arch = "arm"))]
pub use host::HostArch as DefaultArch;
