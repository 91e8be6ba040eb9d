//! ARMv7-A exception vectors.
//!
//! Only IRQ is handled. The IRQ entry stores the return state on the SVC stack
//! (`srsdb`), switches to SVC mode and calls [`mrt_do_irq`](crate::irq::mrt_do_irq)
//! with an 8-byte aligned stack. Running the handler in SVC mode means the
//! interrupt tail may call into the scheduler and switch threads like any
//! other kernel code. Every other exception parks the CPU.

use core::arch::{asm, global_asm};

#[cfg(not(feature = "full-fpu"))]
global_asm!(
    ".section .text.mrt_vectors,\"ax\",%progbits",
    ".arm",
    ".balign 32",
    ".global mrt_vector_table",
    "mrt_vector_table:",
    "    b mrt_unhandled_exception", // reset
    "    b mrt_unhandled_exception", // undefined
    "    b mrt_unhandled_exception", // svc
    "    b mrt_unhandled_exception", // prefetch abort
    "    b mrt_unhandled_exception", // data abort
    "    b mrt_unhandled_exception", // reserved
    "    b mrt_irq_vector",
    "    b mrt_unhandled_exception", // fiq
    "",
    "mrt_irq_vector:",
    "    sub lr, lr, #4",
    "    srsdb sp!, #0x13",
    "    cps #0x13",
    "    push {{r0-r3, r12, lr}}",
    "    and r1, sp, #4",
    "    sub sp, sp, r1",
    "    push {{r1, lr}}",
    "    bl mrt_do_irq",
    "    pop {{r1, lr}}",
    "    add sp, sp, r1",
    "    pop {{r0-r3, r12, lr}}",
    "    rfeia sp!",
    "",
    "mrt_unhandled_exception:",
    "    cpsid if",
    "1:  wfe",
    "    b 1b",
);

// Same entry, plus the caller-saved VFP state the handler may clobber.
#[cfg(feature = "full-fpu")]
global_asm!(
    ".section .text.mrt_vectors,\"ax\",%progbits",
    ".arm",
    ".fpu vfpv3-d16",
    ".balign 32",
    ".global mrt_vector_table",
    "mrt_vector_table:",
    "    b mrt_unhandled_exception",
    "    b mrt_unhandled_exception",
    "    b mrt_unhandled_exception",
    "    b mrt_unhandled_exception",
    "    b mrt_unhandled_exception",
    "    b mrt_unhandled_exception",
    "    b mrt_irq_vector",
    "    b mrt_unhandled_exception",
    "",
    "mrt_irq_vector:",
    "    sub lr, lr, #4",
    "    srsdb sp!, #0x13",
    "    cps #0x13",
    "    push {{r0-r3, r12, lr}}",
    "    vpush {{d0-d7}}",
    "    vmrs r0, fpscr",
    "    and r1, sp, #4",
    "    sub sp, sp, r1",
    "    push {{r0, r1}}",
    "    bl mrt_do_irq",
    "    pop {{r0, r1}}",
    "    add sp, sp, r1",
    "    vmsr fpscr, r0",
    "    vpop {{d0-d7}}",
    "    pop {{r0-r3, r12, lr}}",
    "    rfeia sp!",
    "",
    "mrt_unhandled_exception:",
    "    cpsid if",
    "1:  wfe",
    "    b 1b",
);

extern "C" {
    static mrt_vector_table: u8;
}

/// Point VBAR at the kernel vector table.
///
/// # Safety
///
/// Must run in a privileged mode, before IRQs are unmasked, and with an IRQ
/// stack mode stack pointer already set up by the boot code.
pub unsafe fn install() {
    // SAFETY: taking the address of a linker symbol.
    let base = unsafe { core::ptr::addr_of!(mrt_vector_table) } as usize;
    // SAFETY: the caller guarantees a privileged mode.
    unsafe {
        asm!(
            "mcr p15, 0, {0}, c12, c0, 0",
            "isb",
            in(reg) base,
            options(nostack)
        );
    }
}
