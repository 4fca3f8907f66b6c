//! Allocator context shared between the host and the runtime
//!
//! The runtime allocates every object through a single `lua_Alloc` entry point
//! registered at `lua_newstate`. That entry point is [`allocate`], always, for
//! the whole life of the instance. What it forwards to lives in an
//! [`AllocatorContext`]: a heap-pinned object holding the host's allocation
//! capability plus usage statistics.
//!
//! ```text
//! ┌─────────────┐   lua_Alloc    ┌──────────────────────────┐
//! │  runtime    │ ─────────────► │ allocate (fixed identity) │
//! └─────────────┘                └────────────┬─────────────┘
//!                                             │ ud
//!                                ┌────────────▼─────────────┐
//!                                │ AllocatorContext (Box)   │
//!                                │  inner: dyn GlobalAlloc  │  ← swappable
//!                                │  in_use / peak / count   │
//!                                │  limit                   │
//!                                └──────────────────────────┘
//! ```
//!
//! The context is created before the runtime instance and freed exactly once,
//! after `lua_close` has returned every block.

use libc::{c_void, size_t};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::{Cell, RefCell};
use std::ptr;

/// Alignment of every block handed to the runtime
///
/// Matches the strictest fundamental alignment the C runtime may rely on.
pub const BLOCK_ALIGN: usize = 16;

/// Snapshot of the allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently allocated by the runtime
    pub in_use: usize,
    /// Highest value `in_use` has reached
    pub peak: usize,
    /// Number of successful allocations and growths (lifetime counter)
    pub allocations: u64,
    /// Number of requests refused because of the memory limit
    pub refused: u64,
}

/// Host allocation capability bound to one runtime instance
pub struct AllocatorContext {
    inner: RefCell<Box<dyn GlobalAlloc>>,
    in_use: Cell<usize>,
    peak: Cell<usize>,
    allocations: Cell<u64>,
    refused: Cell<u64>,
    limit: Cell<Option<usize>>,
}

impl AllocatorContext {
    pub fn new(inner: Box<dyn GlobalAlloc>) -> Self {
        Self {
            inner: RefCell::new(inner),
            in_use: Cell::new(0),
            peak: Cell::new(0),
            allocations: Cell::new(0),
            refused: Cell::new(0),
            limit: Cell::new(None),
        }
    }

    /// Context forwarding to the system allocator
    pub fn system() -> Self {
        Self::new(Box::new(System))
    }

    /// Replace the forwarded-to capability
    ///
    /// # Safety
    /// Blocks allocated through the previous capability will be released
    /// through the new one, so both must be able to free each other's memory
    /// (for example, two wrappers around the system allocator). Must not be
    /// called while an allocation is in flight.
    pub unsafe fn swap(&self, inner: Box<dyn GlobalAlloc>) -> Box<dyn GlobalAlloc> {
        std::mem::replace(&mut *self.inner.borrow_mut(), inner)
    }

    pub fn set_limit(&self, limit: Option<usize>) {
        self.limit.set(limit);
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit.get()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            in_use: self.in_use.get(),
            peak: self.peak.get(),
            allocations: self.allocations.get(),
            refused: self.refused.get(),
        }
    }

    /// Whether growing from `osize` to `nsize` bytes stays within the limit
    fn admits(&self, osize: usize, nsize: usize) -> bool {
        match self.limit.get() {
            Some(limit) if nsize > osize => {
                self.in_use.get() - osize + nsize <= limit
            }
            _ => true,
        }
    }

    fn record(&self, osize: usize, nsize: usize) {
        let in_use = self.in_use.get() - osize + nsize;
        self.in_use.set(in_use);
        if in_use > self.peak.get() {
            self.peak.set(in_use);
        }
        if nsize > 0 {
            self.allocations.set(self.allocations.get() + 1);
        }
    }

    /// Serve one `lua_Alloc` request
    ///
    /// # Safety
    /// `block` must be null or a block of `osize` bytes previously returned by
    /// this context.
    unsafe fn realloc(&self, block: *mut u8, osize: usize, nsize: usize) -> *mut u8 {
        let inner = self.inner.borrow();
        if nsize == 0 {
            if !block.is_null() {
                // SAFETY: the runtime hands back exactly the size it was given.
                unsafe {
                    inner.dealloc(block, Layout::from_size_align_unchecked(osize, BLOCK_ALIGN))
                };
                self.record(osize, 0);
            }
            return ptr::null_mut();
        }

        // The runtime passes no meaningful osize for fresh blocks.
        let osize = if block.is_null() { 0 } else { osize };
        if !self.admits(osize, nsize) {
            self.refused.set(self.refused.get() + 1);
            tracing::warn!(
                requested = nsize,
                in_use = self.in_use.get(),
                limit = ?self.limit.get(),
                "memory limit refused allocation"
            );
            return ptr::null_mut();
        }

        let Ok(layout) = Layout::from_size_align(nsize, BLOCK_ALIGN) else {
            return ptr::null_mut();
        };
        let result = if block.is_null() {
            unsafe { inner.alloc(layout) }
        } else {
            unsafe {
                inner.realloc(
                    block,
                    Layout::from_size_align_unchecked(osize, BLOCK_ALIGN),
                    nsize,
                )
            }
        };
        if !result.is_null() {
            self.record(osize, nsize);
        }
        result
    }
}

/// The `lua_Alloc` entry point registered with every instance
///
/// # Safety
/// `ud` must point to the live [`AllocatorContext`] the instance was created
/// with.
pub(crate) unsafe extern "C-unwind" fn allocate(
    ud: *mut c_void,
    block: *mut c_void,
    osize: size_t,
    nsize: size_t,
) -> *mut c_void {
    debug_assert!(!ud.is_null(), "allocate: missing allocator context");
    let context = unsafe { &*(ud as *const AllocatorContext) };
    unsafe { context.realloc(block as *mut u8, osize, nsize) as *mut c_void }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ctx: &AllocatorContext, block: *mut c_void, osize: usize, nsize: usize) -> *mut c_void {
        unsafe { allocate(ctx as *const _ as *mut c_void, block, osize, nsize) }
    }

    #[test]
    fn test_alloc_grow_free_updates_stats() {
        let ctx = AllocatorContext::system();

        let block = request(&ctx, ptr::null_mut(), 0, 64);
        assert!(!block.is_null());
        assert_eq!(ctx.stats().in_use, 64);

        let block = request(&ctx, block, 64, 256);
        assert!(!block.is_null());
        assert_eq!(ctx.stats().in_use, 256);
        assert_eq!(ctx.stats().peak, 256);

        let freed = request(&ctx, block, 256, 0);
        assert!(freed.is_null());
        let stats = ctx.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.peak, 256);
        assert_eq!(stats.allocations, 2);
    }

    #[test]
    fn test_limit_refuses_growth_but_allows_shrink() {
        let ctx = AllocatorContext::system();
        ctx.set_limit(Some(100));

        let block = request(&ctx, ptr::null_mut(), 0, 80);
        assert!(!block.is_null());

        assert!(request(&ctx, ptr::null_mut(), 0, 40).is_null());
        assert_eq!(ctx.stats().refused, 1);

        let block = request(&ctx, block, 80, 16);
        assert!(!block.is_null());
        assert_eq!(ctx.stats().in_use, 16);

        request(&ctx, block, 16, 0);
        assert_eq!(ctx.stats().in_use, 0);
    }

    #[test]
    fn test_swap_keeps_serving_requests() {
        let ctx = AllocatorContext::system();
        let block = request(&ctx, ptr::null_mut(), 0, 32);
        let previous = unsafe { ctx.swap(Box::new(System)) };
        drop(previous);
        let block = request(&ctx, block, 32, 48);
        assert!(!block.is_null());
        request(&ctx, block, 48, 0);
        assert_eq!(ctx.stats().in_use, 0);
    }
}
