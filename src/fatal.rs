//! Fatal assertion path.
//!
//! [`kassert!`](crate::kassert) reports the failing site, lets the registered
//! kernel dump the current thread, then panics. On the target the panic
//! handler masks interrupts and halts.

use spin::Once;

/// Something that can describe the running thread when the kernel dies.
pub trait KernelDump: Sync {
    /// Log the current thread and its saved register context.
    fn dump_current(&self);
}

static DUMP_HOOK: Once<&'static dyn KernelDump> = Once::new();

/// Register the kernel whose state is dumped on a fatal error. Only the first
/// registration sticks.
pub fn set_dump_hook(kernel: &'static dyn KernelDump) {
    DUMP_HOOK.call_once(|| kernel);
}

pub(crate) fn dump() {
    if let Some(kernel) = DUMP_HOOK.get() {
        kernel.dump_current();
    }
}

#[cold]
#[track_caller]
pub fn assert_failed(file: &str, line: u32, module: &str, msg: core::fmt::Arguments<'_>) -> ! {
    log::error!("assertion failed at {}:{} in {}: {}", file, line, module, msg);
    dump();
    panic!("kernel assertion failed: {}", msg);
}

/// Check a kernel invariant. On failure, dump the current thread and halt.
#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {
        $crate::kassert!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal::assert_failed(file!(), line!(), module_path!(), format_args!($($arg)+));
        }
    };
}
