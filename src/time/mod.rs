//! Jiffies: the kernel's tick-granular notion of time.
//!
//! Jiffies are a 32-bit word that wraps. Ordering between two jiffies values is
//! only meaningful through [`time_after`] and friends, which stay correct across
//! the wrap as long as the two values are less than half the range apart.

use portable_atomic::{AtomicU32, Ordering};

pub mod timer;

pub use timer::{do_timer_event, TimerFn, TimerId, TimerList};

/// Tick count since boot, modulo 2^32.
pub type Jiffies = u32;

/// `true` if `a` is strictly later than `b`.
#[inline]
pub const fn time_after(a: Jiffies, b: Jiffies) -> bool {
    (b.wrapping_sub(a) as i32) < 0
}

/// `true` if `a` is strictly earlier than `b`.
#[inline]
pub const fn time_before(a: Jiffies, b: Jiffies) -> bool {
    time_after(b, a)
}

/// `true` if `a` is later than or equal to `b`.
#[inline]
pub const fn time_after_eq(a: Jiffies, b: Jiffies) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// `true` if `a` is earlier than or equal to `b`.
#[inline]
pub const fn time_before_eq(a: Jiffies, b: Jiffies) -> bool {
    time_after_eq(b, a)
}

/// Convert milliseconds to ticks at `hz`, rounding up so that a non-zero
/// delay never becomes zero ticks.
pub const fn msecs_to_jiffies(ms: u32, hz: u32) -> Jiffies {
    let ticks = (ms as u64 * hz as u64 + 999) / 1000;
    if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as Jiffies
    }
}

/// Convert ticks at `hz` to milliseconds.
pub const fn jiffies_to_msecs(ticks: Jiffies, hz: u32) -> u32 {
    if hz == 0 {
        return 0;
    }
    let ms = ticks as u64 * 1000 / hz as u64;
    if ms > u32::MAX as u64 {
        u32::MAX
    } else {
        ms as u32
    }
}

/// The system tick counter.
///
/// Only the tick interrupt advances it; everybody else reads.
pub struct JiffiesCounter {
    /// Current tick count
    ticks: AtomicU32,
    /// Number of times the counter wrapped back to zero
    wraps: AtomicU32,
}

impl JiffiesCounter {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Counter that starts at `start`. Used to exercise wraparound.
    pub const fn starting_at(start: Jiffies) -> Self {
        Self {
            ticks: AtomicU32::new(start),
            wraps: AtomicU32::new(0),
        }
    }

    /// Advance by one tick and return the new value.
    pub fn tick(&self) -> Jiffies {
        let cur = self.ticks.load(Ordering::Acquire);
        let next = if cur == Jiffies::MAX {
            self.wraps.fetch_add(1, Ordering::AcqRel);
            0
        } else {
            cur + 1
        };
        self.ticks.store(next, Ordering::Release);
        next
    }

    /// Current tick count.
    #[inline]
    pub fn get(&self) -> Jiffies {
        self.ticks.load(Ordering::Acquire)
    }

    /// How many times the counter rolled over.
    pub fn wraps(&self) -> u32 {
        self.wraps.load(Ordering::Acquire)
    }
}

impl Default for JiffiesCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware that raises the periodic tick interrupt.
///
/// Implemented by the architecture timer; the tick action acknowledges it on
/// every interrupt.
pub trait TickSource: Sync {
    /// Program the source to fire `hz` times per second and enable it.
    fn start(&self, hz: u32);

    /// Acknowledge the current tick and arm the next one.
    fn ack(&self);
}
