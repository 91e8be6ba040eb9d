//! ARM generic timer (CP15 physical timer) as the system tick source.

use crate::time::TickSource;
use core::arch::asm;
use portable_atomic::{AtomicU32, Ordering};

const CTL_ENABLE: u32 = 1 << 0;

/// Private peripheral interrupt of the non-secure physical timer.
pub const GENERIC_TIMER_PPI: u32 = 30;

pub struct GenericTimer {
    /// Counter ticks between two system ticks
    reload: AtomicU32,
}

impl GenericTimer {
    pub const fn new() -> Self {
        Self {
            reload: AtomicU32::new(0),
        }
    }

    /// Counter frequency in Hz, as programmed by the boot firmware.
    pub fn frequency() -> u32 {
        let freq: u32;
        // SAFETY: CNTFRQ is readable at PL1.
        unsafe { asm!("mrc p15, 0, {}, c14, c0, 0", out(reg) freq, options(nomem, nostack)) };
        freq
    }

    fn set_tval(ticks: u32) {
        // SAFETY: CNTP_TVAL is writable at PL1.
        unsafe { asm!("mcr p15, 0, {}, c14, c2, 0", in(reg) ticks, options(nomem, nostack)) };
    }

    fn set_ctl(ctl: u32) {
        // SAFETY: CNTP_CTL is writable at PL1.
        unsafe {
            asm!(
                "mcr p15, 0, {}, c14, c2, 1",
                "isb",
                in(reg) ctl,
                options(nomem, nostack)
            )
        };
    }
}

impl Default for GenericTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for GenericTimer {
    fn start(&self, hz: u32) {
        let reload = Self::frequency() / hz.max(1);
        self.reload.store(reload, Ordering::Release);
        Self::set_tval(reload);
        Self::set_ctl(CTL_ENABLE);
        log::info!("generic timer: {} Hz tick, reload {}", hz, reload);
    }

    fn ack(&self) {
        Self::set_tval(self.reload.load(Ordering::Acquire));
    }
}
