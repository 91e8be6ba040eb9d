//! Interrupt dispatch.
//!
//! The interrupt-controller driver is a collaborator behind [`IrqChip`]. This
//! module maps hardware interrupt numbers to soft IRQ numbers, keeps a short
//! chain of actions per soft IRQ, and runs the interrupt tail once all
//! pending interrupts have been handled. The tail is where the scheduler
//! consumes a pending reschedule request.

use crate::arch::{Arch, IrqMutex};
use crate::errors::{KResult, KernelError};
use crate::time::TickSource;
use alloc::vec::Vec;
use portable_atomic::{AtomicU32, Ordering};
use spin::Once;

/// Interrupt number as the controller reports it.
pub type HwIrq = u32;

/// Index of a mapped interrupt in the dispatch table.
pub type SoftIrq = usize;

/// Handlers that can share one interrupt line.
pub const MAX_SHARED_ACTIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The device was not the source
    None,
    Handled,
}

/// Interrupt controller driver.
pub trait IrqChip: Sync {
    /// Acknowledge the highest priority pending interrupt, `None` if nothing
    /// (or only a spurious interrupt) is pending.
    fn ack(&self) -> Option<HwIrq>;

    /// Signal end of interrupt for `hwirq`.
    fn eoi(&self, hwirq: HwIrq);

    fn mask(&self, hwirq: HwIrq);

    fn unmask(&self, hwirq: HwIrq);
}

/// One action in a soft IRQ chain.
pub trait IrqHandler: Sync {
    fn handle_irq(&self, irq: SoftIrq) -> IrqReturn;
}

/// Runs after every interrupt has been handled.
pub trait IrqTail: Sync {
    fn irq_exit(&self);
}

/// The tick action of a kernel: advance time and run expired timers.
pub trait TickHandler: Sync {
    fn tick(&self);
}

/// Action for the system tick interrupt.
pub struct SystemTick {
    ticker: &'static dyn TickHandler,
    source: &'static dyn TickSource,
}

impl SystemTick {
    pub const fn new(ticker: &'static dyn TickHandler, source: &'static dyn TickSource) -> Self {
        Self { ticker, source }
    }
}

impl IrqHandler for SystemTick {
    fn handle_irq(&self, _irq: SoftIrq) -> IrqReturn {
        self.source.ack();
        self.ticker.tick();
        IrqReturn::Handled
    }
}

#[derive(Clone, Copy)]
struct IrqAction {
    name: &'static str,
    handler: &'static dyn IrqHandler,
}

struct IrqDesc {
    hwirq: HwIrq,
    actions: [Option<IrqAction>; MAX_SHARED_ACTIONS],
    count: u32,
}

fn same_handler(a: &'static dyn IrqHandler, b: &'static dyn IrqHandler) -> bool {
    core::ptr::eq(a as *const dyn IrqHandler as *const (), b as *const dyn IrqHandler as *const ())
}

/// Soft IRQ table on top of an interrupt controller.
pub struct IrqController<A: Arch> {
    chip: &'static dyn IrqChip,
    descs: IrqMutex<A, Vec<IrqDesc>>,
    tail: Once<&'static dyn IrqTail>,
    unhandled: AtomicU32,
}

impl<A: Arch> IrqController<A> {
    pub const fn new(chip: &'static dyn IrqChip) -> Self {
        Self {
            chip,
            descs: IrqMutex::new(Vec::new()),
            tail: Once::new(),
            unhandled: AtomicU32::new(0),
        }
    }

    /// Soft IRQ number for `hwirq`, creating the mapping if needed.
    pub fn map_irq(&self, hwirq: HwIrq) -> KResult<SoftIrq> {
        let mut descs = self.descs.lock();
        if let Some(soft) = descs.iter().position(|d| d.hwirq == hwirq) {
            return Ok(soft);
        }
        descs.try_reserve(1)?;
        descs.push(IrqDesc {
            hwirq,
            actions: [None; MAX_SHARED_ACTIONS],
            count: 0,
        });
        log::debug!("irq: hw {} -> soft {}", hwirq, descs.len() - 1);
        Ok(descs.len() - 1)
    }

    /// Append `handler` to the chain of `irq`. The line is unmasked when its
    /// first action is registered.
    pub fn request_irq(
        &self,
        irq: SoftIrq,
        name: &'static str,
        handler: &'static dyn IrqHandler,
    ) -> KResult<()> {
        let mut descs = self.descs.lock();
        let desc = descs.get_mut(irq).ok_or(KernelError::NotFound)?;
        let first = desc.actions.iter().all(Option::is_none);
        let slot = desc
            .actions
            .iter_mut()
            .find(|a| a.is_none())
            .ok_or(KernelError::Busy)?;
        *slot = Some(IrqAction { name, handler });
        if first {
            self.chip.unmask(desc.hwirq);
        }
        log::debug!("irq {}: registered {}", irq, name);
        Ok(())
    }

    /// Remove `handler` from the chain of `irq`, masking the line when the
    /// chain becomes empty.
    pub fn free_irq(&self, irq: SoftIrq, handler: &'static dyn IrqHandler) -> KResult<()> {
        let mut descs = self.descs.lock();
        let desc = descs.get_mut(irq).ok_or(KernelError::NotFound)?;
        let pos = desc
            .actions
            .iter()
            .position(|a| matches!(a, Some(a) if same_handler(a.handler, handler)))
            .ok_or(KernelError::NotFound)?;
        // Keep the chain contiguous so dispatch order is registration order.
        desc.actions[pos..].rotate_left(1);
        desc.actions[MAX_SHARED_ACTIONS - 1] = None;
        if desc.actions.iter().all(Option::is_none) {
            self.chip.mask(desc.hwirq);
        }
        Ok(())
    }

    /// Install the interrupt tail. Only the first call has an effect.
    pub fn set_tail(&self, tail: &'static dyn IrqTail) {
        self.tail.call_once(|| tail);
    }

    /// How often `irq` fired.
    pub fn irq_count(&self, irq: SoftIrq) -> Option<u32> {
        self.descs.lock().get(irq).map(|d| d.count)
    }

    /// Interrupts nobody claimed.
    pub fn unhandled_count(&self) -> u32 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Handle everything pending at the controller, then run the tail.
    ///
    /// # Returns
    ///
    /// The number of interrupts acknowledged.
    pub fn do_irq(&self) -> usize {
        let mut taken = 0;
        while let Some(hwirq) = self.chip.ack() {
            taken += 1;
            let chain = {
                let mut descs = self.descs.lock();
                match descs.iter().position(|d| d.hwirq == hwirq) {
                    Some(soft) => {
                        descs[soft].count = descs[soft].count.wrapping_add(1);
                        Some((soft, descs[soft].actions))
                    }
                    None => None,
                }
            };

            let mut handled = false;
            if let Some((soft, actions)) = chain {
                for action in actions.iter().flatten() {
                    if action.handler.handle_irq(soft) == IrqReturn::Handled {
                        handled = true;
                    }
                }
            }
            if !handled {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                log::warn!("irq: hw {} not handled", hwirq);
            }
            self.chip.eoi(hwirq);
        }

        if let Some(tail) = self.tail.get() {
            tail.irq_exit();
        }
        taken
    }
}

/// Type-erased entry point for the vector code.
pub trait IrqDispatch: Sync {
    fn dispatch(&self);
}

impl<A: Arch> IrqDispatch for IrqController<A> {
    fn dispatch(&self) {
        self.do_irq();
    }
}

static GLOBAL_IRQ: Once<&'static dyn IrqDispatch> = Once::new();

/// Make `controller` the target of [`mrt_do_irq`].
pub fn install_global(controller: &'static dyn IrqDispatch) {
    GLOBAL_IRQ.call_once(|| controller);
}

/// Called by the IRQ vector, in SVC mode with IRQs masked.
#[no_mangle]
pub extern "C" fn mrt_do_irq() {
    match GLOBAL_IRQ.get() {
        Some(controller) => controller.dispatch(),
        None => log::error!("irq before a controller was installed"),
    }
}
