//! Stack pool allocator for thread stacks.
//!
//! Stacks come in a few size classes. Stacks of torn-down threads go back to
//! a per-class free list and are handed out again before new memory is
//! requested from the allocator. Every stack carries a canary word at its low
//! end so that overflows are caught at the next context switch.

use crate::errors::{KResult, KernelError};
use alloc::alloc::{alloc, dealloc, Layout};
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Pattern written at the lowest word of every stack.
pub const STACK_CANARY: u32 = 0x57AC_C0DE;

/// Stack alignment required by the AAPCS at public interfaces.
pub const STACK_ALIGN: usize = 8;

/// Smallest stack a thread may be given.
pub const MIN_STACK_SIZE: usize = 512;

/// Stack size classes for the pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSizeClass {
    /// 2 KiB
    Small = 2048,
    /// 8 KiB
    Medium = 8192,
    /// 32 KiB
    Large = 32768,
    /// 128 KiB
    ExtraLarge = 131072,
}

impl StackSizeClass {
    const ALL: [StackSizeClass; 4] = [
        StackSizeClass::Small,
        StackSizeClass::Medium,
        StackSizeClass::Large,
        StackSizeClass::ExtraLarge,
    ];

    pub fn size(self) -> usize {
        self as usize
    }

    /// Smallest class that holds `requested_size` bytes, if any.
    pub fn for_size(requested_size: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|c| requested_size <= c.size())
    }

    fn index(self) -> usize {
        match self {
            StackSizeClass::Small => 0,
            StackSizeClass::Medium => 1,
            StackSizeClass::Large => 2,
            StackSizeClass::ExtraLarge => 3,
        }
    }
}

/// Memory a thread runs on.
pub struct Stack {
    /// Lowest usable address
    memory: NonNull<u8>,
    size: usize,
    /// Pool class of an allocated stack, `None` for caller-provided memory
    class: Option<StackSizeClass>,
}

// SAFETY: a Stack is the unique owner of its memory.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Wrap caller-provided memory. The slice is trimmed to 8-byte alignment.
    pub fn from_static(memory: &'static mut [u8]) -> KResult<Self> {
        let start = memory.as_mut_ptr() as usize;
        let aligned = (start + STACK_ALIGN - 1) & !(STACK_ALIGN - 1);
        let end = (start + memory.len()) & !(STACK_ALIGN - 1);
        if end <= aligned || end - aligned < MIN_STACK_SIZE {
            return Err(KernelError::Unvalid);
        }
        let memory = NonNull::new(aligned as *mut u8).ok_or(KernelError::Unvalid)?;
        Ok(Self {
            memory,
            size: end - aligned,
            class: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn size_class(&self) -> Option<StackSizeClass> {
        self.class
    }

    /// Lowest address of the stack.
    pub fn base(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Initial stack pointer: the aligned end of the memory.
    pub fn top(&self) -> *mut u8 {
        // SAFETY: `size` bytes starting at `memory` belong to this stack.
        unsafe { self.memory.as_ptr().add(self.size) }
    }

    pub fn install_canary(&self) {
        // SAFETY: the base is 8-byte aligned and inside the stack.
        unsafe { (self.memory.as_ptr() as *mut u32).write_volatile(STACK_CANARY) };
    }

    /// `false` once the thread has written past the low end of its stack.
    pub fn check_canary(&self) -> bool {
        // SAFETY: as in `install_canary`.
        unsafe { (self.memory.as_ptr() as *const u32).read_volatile() == STACK_CANARY }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Some(class) = self.class {
            if let Ok(layout) = Layout::from_size_align(class.size(), STACK_ALIGN) {
                // SAFETY: allocated with this layout in `StackPool::allocate_new`.
                unsafe { dealloc(self.memory.as_ptr(), layout) };
            }
        }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.memory)
            .field("size", &self.size)
            .field("class", &self.class)
            .finish()
    }
}

/// Pool-based allocator for thread stacks.
pub struct StackPool {
    free_stacks: [Mutex<Vec<Stack>>; 4],
    stats: StackPoolStats,
}

#[derive(Debug, Default)]
struct StackPoolStats {
    /// Stacks obtained from the allocator
    allocated: AtomicUsize,
    /// Allocations served from a free list
    reused: AtomicUsize,
    /// Stacks currently owned by threads
    in_use: AtomicUsize,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPoolCounters {
    pub allocated: usize,
    pub reused: usize,
    pub in_use: usize,
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            free_stacks: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            stats: StackPoolStats {
                allocated: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            },
        }
    }

    /// Get a stack of at least `size` bytes, with its canary installed.
    ///
    /// # Returns
    ///
    /// `Unvalid` if no class is large enough, `NoMem` if the allocator fails.
    pub fn allocate(&self, size: usize) -> KResult<Stack> {
        let class = StackSizeClass::for_size(size.max(MIN_STACK_SIZE)).ok_or(KernelError::Unvalid)?;

        let stack = match self.free_stacks[class.index()].lock().pop() {
            Some(stack) => {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                stack
            }
            None => self.allocate_new(class)?,
        };
        stack.install_canary();
        self.stats.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(stack)
    }

    fn allocate_new(&self, class: StackSizeClass) -> KResult<Stack> {
        let layout = Layout::from_size_align(class.size(), STACK_ALIGN)?;
        // SAFETY: the layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) }).ok_or(KernelError::NoMem)?;
        self.stats.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(Stack {
            memory,
            size: class.size(),
            class: Some(class),
        })
    }

    /// Hand back the stack of a torn-down thread.
    pub fn release(&self, stack: Stack) {
        let Some(class) = stack.class else {
            return;
        };
        self.stats.in_use.fetch_sub(1, Ordering::Relaxed);
        let mut free = self.free_stacks[class.index()].lock();
        if free.try_reserve(1).is_ok() {
            free.push(stack);
        }
    }

    pub fn counters(&self) -> StackPoolCounters {
        StackPoolCounters {
            allocated: self.stats.allocated.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            in_use: self.stats.in_use.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec;

    #[test]
    fn test_size_class_for_size() {
        assert_eq!(StackSizeClass::for_size(100), Some(StackSizeClass::Small));
        assert_eq!(StackSizeClass::for_size(2048), Some(StackSizeClass::Small));
        assert_eq!(StackSizeClass::for_size(2049), Some(StackSizeClass::Medium));
        assert_eq!(StackSizeClass::for_size(131072), Some(StackSizeClass::ExtraLarge));
        assert_eq!(StackSizeClass::for_size(131073), None);
    }

    #[test]
    fn test_pool_reuses_released_stacks() {
        let pool = StackPool::new();
        let stack = pool.allocate(4000).unwrap();
        assert_eq!(stack.size_class(), Some(StackSizeClass::Medium));
        assert_eq!(stack.top() as usize % STACK_ALIGN, 0);
        let base = stack.base();
        pool.release(stack);

        let again = pool.allocate(8192).unwrap();
        assert_eq!(again.base(), base);
        assert_eq!(
            pool.counters(),
            StackPoolCounters {
                allocated: 1,
                reused: 1,
                in_use: 1
            }
        );
        assert_eq!(pool.allocate(1 << 20).unwrap_err(), KernelError::Unvalid);
    }

    #[test]
    fn test_canary_detects_overflow() {
        let pool = StackPool::new();
        let stack = pool.allocate(1024).unwrap();
        assert!(stack.check_canary());
        unsafe { (stack.base() as *mut u8).write(0) };
        assert!(!stack.check_canary());
    }

    #[test]
    fn test_static_stack_is_aligned_and_not_pooled() {
        let memory: &'static mut [u8] = Box::leak(vec![0u8; 4099].into_boxed_slice());
        let stack = Stack::from_static(memory).unwrap();
        assert_eq!(stack.base() as usize % STACK_ALIGN, 0);
        assert_eq!(stack.top() as usize % STACK_ALIGN, 0);
        assert!(stack.size() >= 4096 - STACK_ALIGN);
        assert_eq!(stack.size_class(), None);

        let tiny: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
        assert_eq!(Stack::from_static(tiny).unwrap_err(), KernelError::Unvalid);
    }
}
