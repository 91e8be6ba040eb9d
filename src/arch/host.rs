//! Hosted port: kernel threads backed by `std` threads.
//!
//! Only one backing thread runs kernel code at a time. Each saved context owns
//! a baton; [`HostArch::context_switch`] hands the baton to `next` and blocks
//! until someone hands one back to `prev`. The backing thread of a fresh
//! context is spawned on its first switch-in.
//!
//! A backing thread whose context exits is retired: it unwinds out of
//! [`HostArch::context_switch_final`] and ends, so long runs do not pile up
//! parked OS threads.
//!
//! Interrupt masking is simulated with a per-backing-thread flag, since a
//! simulated "CPU" only ever runs one of them.

use super::{Arch, ThreadEntry};
use core::cell::Cell;
use core::fmt;
use std::boxed::Box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long a thread that did not come from this port waits for the CPU
/// before declaring the simulation deadlocked.
const STALL_DEADLINE: Duration = Duration::from_secs(30);

std::thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static SPAWNED_BY_PORT: Cell<bool> = const { Cell::new(false) };
}

/// Payload that ends the backing thread of an exited context.
struct Retired;

#[derive(Default)]
struct Baton {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    fn post(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let patient = SPAWNED_BY_PORT.with(Cell::get);
        let deadline = Instant::now() + STALL_DEADLINE;
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        while !*ready {
            if patient {
                ready = self.cv.wait(ready).unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                panic!("hosted kernel stalled: no thread switched back within {STALL_DEADLINE:?}");
            }
            ready = self
                .cv
                .wait_timeout(ready, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *ready = false;
    }
}

/// Saved context of the hosted port.
#[derive(Default)]
pub struct HostContext {
    baton: Arc<Baton>,
    /// Set by `init_context`, taken when the backing thread is spawned
    start: Mutex<Option<(ThreadEntry, usize)>>,
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .start
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false);
        f.debug_struct("HostContext")
            .field("baton", &Arc::as_ptr(&self.baton))
            .field("first_run_pending", &pending)
            .finish()
    }
}

/// The hosted architecture.
pub struct HostArch;

impl HostArch {
    fn launch(ctx: &HostContext) {
        let start = ctx
            .start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((entry, arg)) = start {
            let baton = ctx.baton.clone();
            let spawned = std::thread::Builder::new()
                .name("mrt-kthread".into())
                .spawn(move || {
                    SPAWNED_BY_PORT.with(|s| s.set(true));
                    IRQ_ENABLED.with(|f| f.set(false));
                    baton.wait();
                    let run = panic::catch_unwind(AssertUnwindSafe(|| entry(arg)));
                    if let Err(payload) = run {
                        if !payload.is::<Retired>() {
                            panic::resume_unwind(payload);
                        }
                    }
                });
            if let Err(err) = spawned {
                panic!("hosted kernel cannot spawn a backing thread: {err}");
            }
        }
    }
}

impl Arch for HostArch {
    type SavedContext = HostContext;

    unsafe fn init_context(
        ctx: &mut HostContext,
        entry: ThreadEntry,
        arg: usize,
        _stack_top: *mut u8,
    ) {
        *ctx.start.lock().unwrap_or_else(PoisonError::into_inner) = Some((entry, arg));
    }

    unsafe fn context_switch(prev: *mut HostContext, next: *const HostContext) {
        // SAFETY: the caller guarantees both contexts outlive the call.
        let (prev, next) = unsafe { (&*prev, &*next) };
        let prev_baton = prev.baton.clone();
        Self::launch(next);
        next.baton.post();
        prev_baton.wait();
    }

    unsafe fn context_switch_final(next: *const HostContext) -> ! {
        // SAFETY: the caller guarantees `next` outlives the call.
        let next = unsafe { &*next };
        Self::launch(next);
        next.baton.post();
        if cfg!(panic = "unwind") && SPAWNED_BY_PORT.with(Cell::get) {
            panic::resume_unwind(Box::new(Retired));
        }
        // Threads the port did not spawn, such as an adopted test thread,
        // are not ours to end.
        loop {
            std::thread::park();
        }
    }

    fn enable_interrupts() {
        IRQ_ENABLED.with(|f| f.set(true));
    }

    fn disable_interrupts() {
        IRQ_ENABLED.with(|f| f.set(false));
    }

    fn interrupts_enabled() -> bool {
        IRQ_ENABLED.with(Cell::get)
    }

    fn wait_for_interrupt() {
        std::thread::yield_now();
    }
}
