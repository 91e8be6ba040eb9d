//! PL011 UART used as the kernel console.
//!
//! Polled transmit only. The boot firmware (or QEMU) has already configured
//! the line; [`Pl011::init`] just enables the FIFOs and the transmitter.

use crate::logger::Console;
use core::ptr::{read_volatile, write_volatile};

/// UART0 of the QEMU `virt` board.
#[cfg(feature = "qemu-virt")]
pub const DEFAULT_BASE: usize = 0x0900_0000;
/// UART0 of the Versatile Express Cortex-A9 board.
#[cfg(not(feature = "qemu-virt"))]
pub const DEFAULT_BASE: usize = 0x1000_9000;

const DR: usize = 0x00;
const FR: usize = 0x18;
const LCRH: usize = 0x2C;
const CR: usize = 0x30;
const ICR: usize = 0x44;

const FR_TXFF: u32 = 1 << 5;

pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// # Safety
    ///
    /// `base` must be the address of a mapped PL011 register block.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    /// Enable FIFOs, 8N1 framing and the transmitter.
    pub fn init(&self) {
        // SAFETY: the register block was vouched for in `new`.
        unsafe {
            write_volatile(self.reg(CR), 0);
            write_volatile(self.reg(ICR), 0x7FF);
            write_volatile(self.reg(LCRH), (1 << 4) | (3 << 5));
            write_volatile(self.reg(CR), (1 << 0) | (1 << 8));
        }
    }

    pub fn send_byte(&self, byte: u8) {
        // SAFETY: the register block was vouched for in `new`.
        unsafe {
            while read_volatile(self.reg(FR)) & FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            write_volatile(self.reg(DR), byte as u32);
        }
    }
}

impl Console for Pl011 {
    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send_byte(b'\r');
            }
            self.send_byte(byte);
        }
    }
}
