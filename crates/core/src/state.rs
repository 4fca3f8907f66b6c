//! Runtime instances and execution-context handles
//!
//! Two types cover the lifecycle:
//!
//! - [`Lua`] owns one runtime instance: its main thread and its pinned
//!   [`AllocatorContext`]. Dropping it closes the instance and then frees the
//!   context, exactly once, in that order.
//! - [`State`] is a borrowed handle to one execution context (the main thread
//!   or a coroutine). Native callbacks receive a `&State`; [`Lua`] derefs to
//!   its main thread's `State`.
//!
//! Every stack operation in this crate is a method on `State`, split across
//! the component modules (`stack`, `value`, `call`, ...).

use crate::alloc::{self, AllocatorContext, MemoryStats};
use crate::call::CFunction;
use crate::config::Config;
use crate::error::{CallError, Result};
use moonstack_sys as ffi;
use std::alloc::GlobalAlloc;
use std::ffi::{CStr, c_void};
use std::ops::Deref;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

/// Handle to one execution context
///
/// Only ever used behind a reference created from a live `lua_State` pointer.
/// All methods take `&self`: the stack is foreign memory, and exclusive access
/// is a caller discipline (one native thread per context at a time).
#[repr(transparent)]
pub struct State(ffi::lua_State);

impl State {
    /// Borrow a runtime pointer as a `State`
    ///
    /// # Safety
    /// `l` must be a live `lua_State` for the whole lifetime `'a`.
    #[inline]
    pub unsafe fn from_ptr<'a>(l: *mut ffi::lua_State) -> &'a State {
        debug_assert!(!l.is_null(), "State::from_ptr: null lua_State");
        unsafe { &*(l as *const State) }
    }

    /// The raw runtime pointer, for calling into `moonstack_sys` directly
    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self as *const State as *mut ffi::lua_State
    }

    /// The allocator context of the instance this context belongs to
    pub fn allocator(&self) -> &AllocatorContext {
        let mut ud: *mut c_void = ptr::null_mut();
        let f = unsafe { ffi::lua_getallocf(self.as_ptr(), &mut ud) };
        debug_assert!(
            f.is_some_and(|f| std::ptr::fn_addr_eq(f, alloc::allocate as ffi::lua_Alloc)),
            "allocation entry point changed identity"
        );
        debug_assert!(!ud.is_null());
        unsafe { &*(ud as *const AllocatorContext) }
    }

    /// Allocator statistics for the whole instance
    pub fn memory_stats(&self) -> MemoryStats {
        self.allocator().stats()
    }

    /// Change (or remove) the instance's memory limit
    pub fn set_memory_limit(&self, limit: Option<usize>) {
        self.allocator().set_limit(limit);
    }

    /// Install the handler for errors raised outside any protected call
    ///
    /// Returns the previous handler. When the handler returns, the runtime
    /// terminates the process; only a non-local exit avoids that.
    pub fn at_panic(&self, handler: CFunction) -> Option<CFunction> {
        unsafe { ffi::lua_atpanic(self.as_ptr(), Some(handler)) }
    }

    /// Open all standard libraries into the globals table
    pub fn open_libs(&self) -> Result<(), CallError> {
        unsafe extern "C-unwind" fn open(l: *mut ffi::lua_State) -> c_int {
            unsafe { ffi::luaL_openlibs(l) };
            0
        }
        self.protected_call_native(open, ptr::null_mut())
    }

    /// Control the garbage collector
    pub fn gc(&self, option: GcOption) -> i32 {
        let (what, data) = match option {
            GcOption::Stop => (ffi::LUA_GCSTOP, 0),
            GcOption::Restart => (ffi::LUA_GCRESTART, 0),
            GcOption::Collect => (ffi::LUA_GCCOLLECT, 0),
            GcOption::Count => (ffi::LUA_GCCOUNT, 0),
            GcOption::CountBytes => (ffi::LUA_GCCOUNTB, 0),
            GcOption::Step(size) => (ffi::LUA_GCSTEP, size),
            GcOption::SetPause(percent) => (ffi::LUA_GCSETPAUSE, percent),
            GcOption::SetStepMultiplier(percent) => (ffi::LUA_GCSETSTEPMUL, percent),
        };
        unsafe { ffi::lua_gc(self.as_ptr(), what, data) }
    }

    /// Bytes in use according to the collector
    pub fn gc_bytes(&self) -> usize {
        let kilobytes = self.gc(GcOption::Count) as usize;
        let remainder = self.gc(GcOption::CountBytes) as usize;
        kilobytes * 1024 + remainder
    }
}

/// Garbage-collector requests understood by [`State::gc`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOption {
    Stop,
    Restart,
    /// Full collection cycle
    Collect,
    /// Memory in use, in kilobytes
    Count,
    /// Remainder of memory in use modulo 1024
    CountBytes,
    /// Incremental step; returns 1 when a cycle finished
    Step(i32),
    /// Set the pause; returns the previous value
    SetPause(i32),
    /// Set the step multiplier; returns the previous value
    SetStepMultiplier(i32),
}

/// An owned runtime instance
pub struct Lua {
    main: NonNull<ffi::lua_State>,
    context: NonNull<AllocatorContext>,
}

impl Lua {
    /// Create an instance with the default configuration
    pub fn new() -> Result<Lua> {
        Self::with_config(&Config::default())
    }

    /// Create an instance that allocates through the system allocator
    pub fn with_config(config: &Config) -> Result<Lua> {
        Self::with_allocator(AllocatorContext::system(), config)
    }

    /// Create an instance bound to a caller-supplied allocator context
    pub fn with_allocator(context: AllocatorContext, config: &Config) -> Result<Lua> {
        let context = NonNull::from(Box::leak(Box::new(context)));
        let raw = unsafe { ffi::lua_newstate(alloc::allocate, context.as_ptr() as *mut c_void) };
        let Some(main) = NonNull::new(raw) else {
            // SAFETY: the runtime never saw the context.
            drop(unsafe { Box::from_raw(context.as_ptr()) });
            return Err(CallError::OutOfMemory.into());
        };
        let lua = Lua { main, context };
        tracing::debug!(state = ?main.as_ptr(), "runtime instance opened");

        lua.at_panic(config.panic_handler.unwrap_or(log_panic));
        if config.open_stdlib {
            lua.open_libs()?;
        }
        if let Some(slots) = config.stack_reserve {
            lua.check_stack(slots)?;
        }
        if let Some(percent) = config.gc_pause {
            lua.gc(GcOption::SetPause(percent));
        }
        if let Some(percent) = config.gc_step_multiplier {
            lua.gc(GcOption::SetStepMultiplier(percent));
        }
        lua.set_memory_limit(config.memory_limit);
        Ok(lua)
    }

    /// Replace the allocation capability the instance forwards to
    ///
    /// The registered entry point keeps its identity; only the capability
    /// behind it changes. Returns the previous capability.
    ///
    /// # Safety
    /// See [`AllocatorContext::swap`]: the new capability must be able to
    /// release blocks obtained from the old one.
    pub unsafe fn set_allocator(&self, inner: Box<dyn GlobalAlloc>) -> Box<dyn GlobalAlloc> {
        tracing::debug!("swapping allocation capability");
        let previous = unsafe { self.allocator().swap(inner) };
        debug_assert!(ptr::eq(self.allocator(), self.context.as_ptr()));
        previous
    }
}

impl Deref for Lua {
    type Target = State;

    fn deref(&self) -> &State {
        unsafe { State::from_ptr(self.main.as_ptr()) }
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.main.as_ptr()) };
        // SAFETY: created by Box::leak in with_allocator; the runtime has
        // returned every block, and nothing else frees the context.
        drop(unsafe { Box::from_raw(self.context.as_ptr()) });
        tracing::debug!("runtime instance closed");
    }
}

/// Default panic handler: report the unprotected error, then let the runtime
/// terminate the process
unsafe extern "C-unwind" fn log_panic(l: *mut ffi::lua_State) -> c_int {
    let message = unsafe {
        let s = ffi::lua_tostring(l, -1);
        if s.is_null() {
            "error object is not a string".to_string()
        } else {
            CStr::from_ptr(s).to_string_lossy().into_owned()
        }
    };
    tracing::error!(%message, "unprotected error in call to Lua API");
    eprintln!("PANIC: unprotected error in call to Lua API ({})", message);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_has_empty_stack() {
        let lua = Lua::new().unwrap();
        assert_eq!(lua.top(), 0);
    }

    #[test]
    fn test_allocator_tracks_instance_memory() {
        let lua = Lua::with_config(&Config::new().with_stdlib(false)).unwrap();
        let stats = lua.memory_stats();
        assert!(stats.in_use > 0);
        assert!(stats.peak >= stats.in_use);
        assert_eq!(stats.in_use, lua.gc_bytes());
    }

    #[test]
    fn test_gc_collect_does_not_grow_usage() {
        let lua = Lua::new().unwrap();
        for _ in 0..100 {
            lua.new_table();
        }
        lua.set_top(0);
        let before = lua.gc_bytes();
        lua.gc(GcOption::Collect);
        assert!(lua.gc_bytes() <= before);
    }

    #[test]
    fn test_set_allocator_keeps_entry_point() {
        let lua = Lua::new().unwrap();
        let previous = unsafe { lua.set_allocator(Box::new(std::alloc::System)) };
        drop(previous);
        lua.push_str("still allocating");
        assert_eq!(lua.to_str(-1).unwrap(), "still allocating");
    }

    #[test]
    fn test_config_stack_reserve() {
        let lua = Lua::with_config(&Config::new().with_stack_reserve(500)).unwrap();
        for i in 0..500 {
            lua.push_integer(i);
        }
        assert_eq!(lua.top(), 500);
    }
}
