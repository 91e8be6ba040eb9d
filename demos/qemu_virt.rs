//! Demo kernel for the QEMU `virt` board (Cortex-A15, GICv2).
//!
//! Two threads hand a semaphore back and forth while the kworker drains a
//! work item every second. The generic timer drives the tick, so the
//! preemptive policy switches threads at interrupt return.
//!
//! # Building
//!
//! ```bash
//! cargo build --release --example qemu_virt --features qemu-virt \
//!     --target armv7a-none-eabi
//! ```
//!
//! # Running
//!
//! ```bash
//! qemu-system-arm -M virt -cpu cortex-a15 -m 256M -nographic \
//!     -kernel target/armv7a-none-eabi/release/examples/qemu_virt
//! ```
//!
//! The board boot code is expected to set up the SVC and IRQ mode stacks,
//! clear `.bss` and call [`kernel_main`] in SVC mode with IRQs masked.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std, no_main)]

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    // Nothing to boot on a hosted target.
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod board {
    extern crate alloc;

    use mrt_kernel::arch::armv7::timer::{GenericTimer, GENERIC_TIMER_PPI};
    use mrt_kernel::arch::armv7::uart_pl011::{self, Pl011};
    use mrt_kernel::arch::armv7::vectors;
    use mrt_kernel::irq::{self, HwIrq, IrqChip, IrqController};
    use mrt_kernel::{
        priority, DefaultArch, KResult, Kernel, KernelConfig, Semaphore, ThreadAttr, TimerId, Work,
    };
    use spin::{Lazy, Once};

    /// Simple bump allocator for the heap.
    mod allocator {
        use core::alloc::{GlobalAlloc, Layout};
        use core::cell::UnsafeCell;
        use core::ptr::null_mut;
        use portable_atomic::{AtomicUsize, Ordering};

        const HEAP_SIZE: usize = 4 * 1024 * 1024;

        #[repr(C, align(16))]
        struct Heap {
            data: UnsafeCell<[u8; HEAP_SIZE]>,
            next: AtomicUsize,
        }

        unsafe impl Sync for Heap {}

        static HEAP: Heap = Heap {
            data: UnsafeCell::new([0; HEAP_SIZE]),
            next: AtomicUsize::new(0),
        };

        pub struct BumpAllocator;

        unsafe impl GlobalAlloc for BumpAllocator {
            unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
                loop {
                    let current = HEAP.next.load(Ordering::Relaxed);
                    let aligned = (current + layout.align() - 1) & !(layout.align() - 1);
                    let new_next = aligned + layout.size();
                    if new_next > HEAP_SIZE {
                        return null_mut();
                    }
                    if HEAP
                        .next
                        .compare_exchange(current, new_next, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        return unsafe { (HEAP.data.get() as *mut u8).add(aligned) };
                    }
                }
            }

            // Thread stacks are recycled by the kernel's stack pool, so the
            // bump heap only ever grows to the peak thread count.
            unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
        }

        #[global_allocator]
        static ALLOCATOR: BumpAllocator = BumpAllocator;
    }

    /// GICv2 distributor and CPU interface of the `virt` board.
    struct Gic {
        gicd: usize,
        gicc: usize,
    }

    const GICD_CTLR: usize = 0x000;
    const GICD_ISENABLER: usize = 0x100;
    const GICD_ICENABLER: usize = 0x180;
    const GICC_CTLR: usize = 0x000;
    const GICC_PMR: usize = 0x004;
    const GICC_IAR: usize = 0x00C;
    const GICC_EOIR: usize = 0x010;
    const SPURIOUS: HwIrq = 1023;

    impl Gic {
        fn write(addr: usize, value: u32) {
            // SAFETY: both register blocks are identity mapped on `virt`.
            unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
        }

        fn read(addr: usize) -> u32 {
            // SAFETY: as in `write`.
            unsafe { core::ptr::read_volatile(addr as *const u32) }
        }

        fn enable(&self) {
            Self::write(self.gicd + GICD_CTLR, 1);
            Self::write(self.gicc + GICC_PMR, 0xFF);
            Self::write(self.gicc + GICC_CTLR, 1);
        }

        fn bank(hwirq: HwIrq) -> (usize, u32) {
            ((hwirq as usize / 32) * 4, 1 << (hwirq % 32))
        }
    }

    impl IrqChip for Gic {
        fn ack(&self) -> Option<HwIrq> {
            let id = Self::read(self.gicc + GICC_IAR) & 0x3FF;
            (id != SPURIOUS).then_some(id)
        }

        fn eoi(&self, hwirq: HwIrq) {
            Self::write(self.gicc + GICC_EOIR, hwirq);
        }

        fn mask(&self, hwirq: HwIrq) {
            let (offset, bit) = Self::bank(hwirq);
            Self::write(self.gicd + GICD_ICENABLER + offset, bit);
        }

        fn unmask(&self, hwirq: HwIrq) {
            let (offset, bit) = Self::bank(hwirq);
            Self::write(self.gicd + GICD_ISENABLER + offset, bit);
        }
    }

    // SAFETY: DEFAULT_BASE is the PL011 of the board selected by `qemu-virt`.
    static UART: Pl011 = unsafe { Pl011::new(uart_pl011::DEFAULT_BASE) };
    static GIC: Gic = Gic {
        gicd: 0x0800_0000,
        gicc: 0x0801_0000,
    };
    static TIMER: GenericTimer = GenericTimer::new();
    static IRQS: IrqController<DefaultArch> = IrqController::new(&GIC);
    static KERNEL: Lazy<Kernel> = Lazy::new(|| match Kernel::new(KernelConfig::DEFAULT) {
        Ok(kernel) => kernel,
        Err(err) => panic!("kernel tables: {}", err),
    });

    static PING: Semaphore = Semaphore::new(1);
    static PONG: Semaphore = Semaphore::new(0);

    fn heartbeat(_data: usize) {
        log::info!("heartbeat at jiffies {}", KERNEL.jiffies());
    }

    static HEARTBEAT: Work = Work::new(heartbeat, 0);
    static HEARTBEAT_TIMER: Once<TimerId> = Once::new();

    fn ping_pong(kernel: &'static Kernel) -> KResult<()> {
        kernel.kernel_thread_base_create("ping", ThreadAttr::new(), move || {
            for round in 0u32.. {
                if PING.down(kernel).is_err() {
                    return;
                }
                log::info!("ping {}", round);
                PONG.up();
            }
        })?;
        kernel.kernel_thread_base_create("pong", ThreadAttr::new(), move || {
            for round in 0u32.. {
                if PONG.down(kernel).is_err() {
                    return;
                }
                log::info!("pong {}", round);
                if kernel.schedule_delay_ms(500).is_err() {
                    return;
                }
                PING.up();
            }
        })?;
        Ok(())
    }

    fn heartbeat_timer(kernel: &Kernel, _data: usize) {
        if let Err(err) = kernel.schedule_work(&HEARTBEAT) {
            log::warn!("heartbeat: {}", err);
        }
        if let Some(&id) = HEARTBEAT_TIMER.get() {
            let _ = kernel.mod_timer(id, kernel.jiffies().wrapping_add(kernel.config().hz));
        }
    }

    fn start_heartbeat(kernel: &'static Kernel) -> KResult<()> {
        let id = *HEARTBEAT_TIMER.try_call_once(|| kernel.setup_timer(heartbeat_timer, 0))?;
        kernel.add_timer(id, kernel.jiffies().wrapping_add(kernel.config().hz))
    }

    /// Kernel entry point, called by the board boot code.
    #[no_mangle]
    pub extern "C" fn kernel_main() -> ! {
        UART.init();
        if mrt_kernel::logger::init(&UART, log::LevelFilter::Info).is_err() {
            UART.send_byte(b'!');
        }
        log::info!("mrt-kernel demo on QEMU virt");

        // SAFETY: SVC mode, IRQs still masked, stacks set up by the boot code.
        unsafe { vectors::install() };
        GIC.enable();
        irq::install_global(&IRQS);

        let kernel: &'static Kernel = &KERNEL;
        if let Err(err) = kernel.install_tick(&IRQS, GENERIC_TIMER_PPI, &TIMER) {
            log::error!("tick: {}", err);
        }
        for (name, call) in [
            ("ping-pong", ping_pong as fn(&'static Kernel) -> KResult<()>),
            ("heartbeat", start_heartbeat),
        ] {
            if let Err(err) = kernel.register_initcall(name, call) {
                log::error!("initcall {}: {}", name, err);
            }
        }
        log::info!("idle priority {}, starting", priority::IDLE);
        kernel.start_kernel()
    }
}
