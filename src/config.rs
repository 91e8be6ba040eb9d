//! Build-time limits and runtime kernel configuration.

use crate::time::Jiffies;

/// Number of slots in the fixed thread table. Slot 0 is reserved.
pub const REAL_THREAD_MAX_NUM: usize = 32;

/// Maximum stored length of a thread name, in bytes.
pub const REAL_THREAD_NAME_LEN: usize = 16;

/// Priority bands (0-255, higher = more important).
pub mod priority {
    /// The idle thread, runs only when nothing else is ready
    pub const IDLE: u8 = 0;
    /// Deferred-work thread
    pub const KWORKER: u8 = 32;
    /// The init thread
    pub const INIT: u8 = 64;
    /// Default for application threads
    pub const NORMAL: u8 = 128;
    /// Kernel housekeeping thread
    pub const KTHREAD: u8 = 192;
    /// Highest priority
    pub const REALTIME: u8 = 255;
}

/// Tunables of one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Tick frequency in Hz
    pub hz: u32,
    /// Default time slice, in jiffies
    pub preempt_period: Jiffies,
    /// Threads allowed beyond the fixed table
    pub overflow_threads: usize,
    /// Stack size used when a thread attribute does not name one
    pub default_stack_size: usize,
    /// Sleep period of the init thread between housekeeping rounds
    pub init_period_ms: u32,
    /// Longest time the worker sleeps before rechecking its queue
    pub kworker_poll_ms: u32,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        hz: 100,
        preempt_period: 10,
        overflow_threads: 32,
        default_stack_size: 8192,
        init_period_ms: 1000,
        kworker_poll_ms: 100,
    };

    pub const fn with_hz(mut self, hz: u32) -> Self {
        self.hz = hz;
        self
    }

    pub const fn with_preempt_period(mut self, ticks: Jiffies) -> Self {
        self.preempt_period = ticks;
        self
    }

    pub const fn with_overflow_threads(mut self, count: usize) -> Self {
        self.overflow_threads = count;
        self
    }

    pub const fn with_default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    pub const fn with_init_period_ms(mut self, ms: u32) -> Self {
        self.init_period_ms = ms;
        self
    }

    pub const fn with_kworker_poll_ms(mut self, ms: u32) -> Self {
        self.kworker_poll_ms = ms;
        self
    }

    /// Total number of threads the table can hold, excluding slot 0.
    pub const fn max_threads(&self) -> usize {
        REAL_THREAD_MAX_NUM - 1 + self.overflow_threads
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
