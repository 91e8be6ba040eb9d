//! Per-thread signal word.
//!
//! Wakers and killers set bits here without touching the scheduler queues; the
//! owning thread consumes them from its wait loop.

use bitflags::bitflags;
use portable_atomic::{AtomicU32, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signal: u32 {
        /// A waker signalled the wait queue this thread sleeps on
        const WAKEUP = 1 << 0;
        /// The thread has been asked to terminate
        const KILL = 1 << 1;
        /// Armed: the thread is in an uninterruptible wait
        const NORMAL = 1 << 2;
        /// Armed: the thread is in an interruptible wait
        const INTR = 1 << 3;

        /// Bits that report an event
        const PENDING = Self::WAKEUP.bits() | Self::KILL.bits();
        /// Bits that describe the kind of wait in progress
        const ARMED = Self::NORMAL.bits() | Self::INTR.bits();
    }
}

/// Atomic set of [`Signal`] bits.
#[derive(Debug, Default)]
pub struct SignalSet(AtomicU32);

impl SignalSet {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn raise(&self, signal: Signal) {
        self.0.fetch_or(signal.bits(), Ordering::Release);
    }

    pub fn clear(&self, signal: Signal) {
        self.0.fetch_and(!signal.bits(), Ordering::Release);
    }

    /// Clear the bits of `mask` and return those that were set.
    pub fn take(&self, mask: Signal) -> Signal {
        let old = self.0.fetch_and(!mask.bits(), Ordering::AcqRel);
        Signal::from_bits_truncate(old) & mask
    }

    pub fn get(&self) -> Signal {
        Signal::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn contains(&self, signal: Signal) -> bool {
        self.get().contains(signal)
    }

    pub fn intersects(&self, signal: Signal) -> bool {
        self.get().intersects(signal)
    }

    /// Raise WAKEUP if any bit of `armed` is set.
    ///
    /// # Returns
    ///
    /// Whether the wakeup was delivered.
    pub fn wake_if_armed(&self, armed: Signal) -> bool {
        let delivered = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if Signal::from_bits_truncate(bits).intersects(armed) {
                    Some(bits | Signal::WAKEUP.bits())
                } else {
                    None
                }
            });
        delivered.is_ok()
    }
}
