//! ARMv7-A architecture implementation.
//!
//! Kernel threads run in SVC mode. A context switch is a function call, so
//! only the AAPCS callee-saved state is kept: r4-r11, sp, lr, the IRQ mask
//! bit and, with `full-fpu`, d8-d15. Preemption reuses the same path: the IRQ
//! vector moves to SVC mode before calling into Rust, so the scheduler switches
//! away from inside the interrupt tail on the interrupted thread's own stack.

use super::{Arch, ThreadEntry};
use core::arch::{asm, global_asm};

pub mod timer;
pub mod uart_pl011;
pub mod vectors;

/// CPSR bits a fresh thread starts with: SVC mode, IRQs masked.
const CPSR_SVC_IRQ_MASKED: u32 = 0x13 | CPSR_I;
const CPSR_I: u32 = 1 << 7;

pub struct Armv7Arch;

/// Callee-saved register file of a switched-out thread.
#[repr(C, align(8))]
#[derive(Debug, Default)]
pub struct Armv7Context {
    /// r4-r11
    pub r: [u32; 8],
    pub sp: u32,
    pub lr: u32,
    pub cpsr: u32,
    _pad: u32,
    #[cfg(feature = "full-fpu")]
    pub d8_d15: [u64; 8],
}

// Offsets used by the assembly below.
const _: () = assert!(core::mem::offset_of!(Armv7Context, sp) == 32);
const _: () = assert!(core::mem::offset_of!(Armv7Context, lr) == 36);
const _: () = assert!(core::mem::offset_of!(Armv7Context, cpsr) == 40);
#[cfg(feature = "full-fpu")]
const _: () = assert!(core::mem::offset_of!(Armv7Context, d8_d15) == 48);

extern "C" {
    fn mrt_context_switch(prev: *mut Armv7Context, next: *const Armv7Context);
    fn mrt_thread_start() -> !;
}

// r0 = prev, r1 = next
#[cfg(not(feature = "full-fpu"))]
global_asm!(
    ".section .text.mrt_context_switch,\"ax\",%progbits",
    ".global mrt_context_switch",
    ".type mrt_context_switch, %function",
    ".arm",
    "mrt_context_switch:",
    "    stmia r0, {{r4-r11}}",
    "    str sp, [r0, #32]",
    "    str lr, [r0, #36]",
    "    mrs r2, cpsr",
    "    str r2, [r0, #40]",
    "    ldmia r1, {{r4-r11}}",
    "    ldr sp, [r1, #32]",
    "    ldr lr, [r1, #36]",
    "    ldr r2, [r1, #40]",
    "    mrs r3, cpsr",
    "    bic r3, r3, #0x80",
    "    and r2, r2, #0x80",
    "    orr r3, r3, r2",
    "    msr cpsr_c, r3",
    "    bx lr",
);

#[cfg(feature = "full-fpu")]
global_asm!(
    ".section .text.mrt_context_switch,\"ax\",%progbits",
    ".global mrt_context_switch",
    ".type mrt_context_switch, %function",
    ".arm",
    ".fpu vfpv3-d16",
    "mrt_context_switch:",
    "    stmia r0, {{r4-r11}}",
    "    str sp, [r0, #32]",
    "    str lr, [r0, #36]",
    "    mrs r2, cpsr",
    "    str r2, [r0, #40]",
    "    add r2, r0, #48",
    "    vstmia r2, {{d8-d15}}",
    "    ldmia r1, {{r4-r11}}",
    "    ldr sp, [r1, #32]",
    "    ldr lr, [r1, #36]",
    "    add r2, r1, #48",
    "    vldmia r2, {{d8-d15}}",
    "    ldr r2, [r1, #40]",
    "    mrs r3, cpsr",
    "    bic r3, r3, #0x80",
    "    and r2, r2, #0x80",
    "    orr r3, r3, r2",
    "    msr cpsr_c, r3",
    "    bx lr",
);

// First switch into a thread lands here with r4 = arg and r5 = entry.
global_asm!(
    ".section .text.mrt_thread_start,\"ax\",%progbits",
    ".global mrt_thread_start",
    ".type mrt_thread_start, %function",
    ".arm",
    "mrt_thread_start:",
    "    mov r0, r4",
    "    blx r5",
    "1:  wfe",
    "    b 1b",
);

impl Arch for Armv7Arch {
    type SavedContext = Armv7Context;

    unsafe fn init_context(
        ctx: &mut Armv7Context,
        entry: ThreadEntry,
        arg: usize,
        stack_top: *mut u8,
    ) {
        *ctx = Armv7Context::default();
        ctx.r[0] = arg as u32;
        ctx.r[1] = entry as usize as u32;
        ctx.sp = (stack_top as usize & !7) as u32;
        ctx.lr = mrt_thread_start as usize as u32;
        ctx.cpsr = CPSR_SVC_IRQ_MASKED;
    }

    unsafe fn context_switch(prev: *mut Armv7Context, next: *const Armv7Context) {
        // SAFETY: forwarded from the caller.
        unsafe { mrt_context_switch(prev, next) }
    }

    fn enable_interrupts() {
        // SAFETY: only changes the IRQ mask bit.
        unsafe { asm!("cpsie i", options(nomem, nostack)) };
    }

    fn disable_interrupts() {
        // SAFETY: only changes the IRQ mask bit.
        unsafe { asm!("cpsid i", options(nomem, nostack)) };
    }

    fn interrupts_enabled() -> bool {
        let cpsr: u32;
        // SAFETY: reading CPSR has no side effects.
        unsafe { asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags)) };
        cpsr & CPSR_I == 0
    }

    fn wait_for_interrupt() {
        // SAFETY: wfi resumes on the next interrupt, masked or not.
        unsafe { asm!("dsb", "wfi", options(nomem, nostack)) };
    }
}

/// Mask IRQ and FIQ and stop the CPU for good.
pub fn halt() -> ! {
    // SAFETY: masking both interrupt lines is always allowed in SVC mode.
    unsafe { asm!("cpsid if", options(nomem, nostack)) };
    loop {
        // SAFETY: wfe only waits.
        unsafe { asm!("wfe", options(nomem, nostack)) };
    }
}
