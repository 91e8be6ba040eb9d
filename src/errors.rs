//! Error handling for the kernel services.
//!
//! Every fallible kernel operation returns [`KResult`]. The variants mirror the
//! errno-style taxonomy that C callers of the kernel expect, see
//! [`KernelError::errno`].

use alloc::collections::TryReserveError;
use core::alloc::LayoutError;
use core::fmt;

/// Result type for kernel operations.
pub type KResult<T> = Result<T, KernelError>;

/// Error type shared by all kernel services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// The allocator could not satisfy a request
    NoMem,
    /// The referenced thread, timer or queue entry does not exist
    NotFound,
    /// The handle refers to a slot that has been torn down
    NoDev,
    /// The resource is held, or the object is already in the requested state
    Busy,
    /// The operation is not allowed from the calling context
    Forbid,
    /// A kernel invariant was found violated
    Fault,
    /// An argument is out of range
    Unvalid,
    /// A timed wait elapsed before its condition held
    TimedOut,
    /// An interruptible wait was cancelled by a kill signal
    Interrupted,
}

impl KernelError {
    /// Negative error number for C-style callers.
    pub const fn errno(self) -> i32 {
        match self {
            KernelError::NoMem => -12,
            KernelError::NotFound => -2,
            KernelError::NoDev => -19,
            KernelError::Busy => -16,
            KernelError::Forbid => -1,
            KernelError::Fault => -14,
            KernelError::Unvalid => -22,
            KernelError::TimedOut => -110,
            KernelError::Interrupted => -4,
        }
    }

    /// Map a negative error number back to an error, if it is one of ours.
    pub const fn from_errno(errno: i32) -> Option<Self> {
        Some(match errno {
            -12 => KernelError::NoMem,
            -2 => KernelError::NotFound,
            -19 => KernelError::NoDev,
            -16 => KernelError::Busy,
            -1 => KernelError::Forbid,
            -14 => KernelError::Fault,
            -22 => KernelError::Unvalid,
            -110 => KernelError::TimedOut,
            -4 => KernelError::Interrupted,
            _ => return None,
        })
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NoMem => "out of memory",
            KernelError::NotFound => "no such object",
            KernelError::NoDev => "object has been torn down",
            KernelError::Busy => "resource busy",
            KernelError::Forbid => "operation not permitted in this context",
            KernelError::Fault => "kernel state corrupted",
            KernelError::Unvalid => "invalid argument",
            KernelError::TimedOut => "timed out",
            KernelError::Interrupted => "interrupted by kill signal",
        };
        f.write_str(msg)
    }
}

impl From<TryReserveError> for KernelError {
    fn from(_: TryReserveError) -> Self {
        KernelError::NoMem
    }
}

impl From<LayoutError> for KernelError {
    fn from(_: LayoutError) -> Self {
        KernelError::Unvalid
    }
}
