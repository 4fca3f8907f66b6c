//! Coroutines driven from the host
//!
//! A coroutine is an execution context with its own stack that shares the
//! globals of its instance. The host starts and continues it with
//! [`State::resume`]; native functions running inside it suspend it by
//! returning [`State::yield_now`].
//!
//! Once its body has returned a coroutine stays dead, even while its results
//! are still on its stack: instances keep a weak set of finished threads in
//! the registry.
//!
//! ```rust,ignore
//! let co = lua.new_thread();
//! co.get_global("producer")?;
//! while let Resumed::Yielded = co.resume(0)? {
//!     let item = co.to_integer(-1)?;
//!     co.set_top(0);
//! }
//! ```

use crate::error::{CallError, Status};
use crate::stack::REGISTRY_INDEX;
use crate::state::State;
use libc::c_void;
use moonstack_sys as ffi;
use std::fmt;
use std::ptr;

/// Its address keys the registry's set of finished coroutines
static FINISHED_KEY: u8 = 0;

/// Outcome of a successful [`State::resume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumed {
    /// The body returned; its results are on the coroutine's stack
    Finished,
    /// The body yielded; the yielded values are on the coroutine's stack
    Yielded,
}

/// Lifecycle state of a coroutine, as seen from another context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// It is the context asking
    Running,
    /// Not started, or yielded
    Suspended,
    /// Active, but resumed another coroutine
    Normal,
    /// Finished or failed
    Dead,
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoroutineStatus::Running => "running",
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        })
    }
}

impl State {
    /// Push a new coroutine and return a handle to it
    ///
    /// The handle is valid while the thread value is reachable; keep it on a
    /// stack or in a [`Reference`](crate::Reference).
    pub fn new_thread(&self) -> &State {
        let thread = unsafe { ffi::lua_newthread(self.as_ptr()) };
        tracing::debug!(thread = ?thread, "coroutine created");
        unsafe { State::from_ptr(thread) }
    }

    /// Start or continue this coroutine with the top `nargs` values
    ///
    /// To start it, push the body function and its arguments. To continue it
    /// after a yield, pop the yielded values and push the values `yield`
    /// should return. On failure the error object is on this stack and the
    /// coroutine is dead.
    pub fn resume(&self, nargs: i32) -> Result<Resumed, CallError> {
        debug_assert!(nargs >= 0 && nargs <= self.top(), "resume: bad argument count {nargs}");
        let unstarted = self.status() == Status::Ok && self.get_stack(0).is_none();
        if unstarted && (self.top() <= nargs || self.has_finished()) {
            self.push_str("cannot resume dead coroutine");
            return Err(CallError::Runtime);
        }
        let code = unsafe { ffi::lua_resume(self.as_ptr(), nargs) };
        match Status::from_raw(code) {
            Status::Ok => {
                self.mark_finished();
                Ok(Resumed::Finished)
            }
            Status::Yield => Ok(Resumed::Yielded),
            status => {
                let err = CallError::from_status(status);
                tracing::debug!(error = %err, "coroutine failed");
                Err(err)
            }
        }
    }

    /// Suspend the running coroutine, handing back the top `nresults` values
    ///
    /// Only valid as the return expression of a native function:
    /// `return Ok(unsafe { state.yield_now(n) })`.
    ///
    /// # Safety
    /// This context must be a coroutine whose native function was called
    /// directly by the coroutine body or by `resume`, with no protected call
    /// or metamethod in between. Otherwise the runtime raises an error that
    /// jumps over the calling Rust frames, as with [`call`](Self::call).
    pub unsafe fn yield_now(&self, nresults: i32) -> i32 {
        debug_assert!(!self.is_main_thread(), "yield_now: main thread cannot yield");
        debug_assert!(
            self.status() == Status::Ok && self.get_stack(0).is_some(),
            "yield_now: coroutine is not running"
        );
        debug_assert!(
            (0..=self.top()).contains(&nresults),
            "yield_now: {nresults} values requested, {} available",
            self.top()
        );
        unsafe { ffi::lua_yield(self.as_ptr(), nresults) }
    }

    /// Pop `n` values from this context and push them onto `to`
    ///
    /// Both contexts must belong to the same instance.
    pub fn xmove(&self, to: &State, n: i32) {
        debug_assert!(
            ptr::eq(self.allocator(), to.allocator()),
            "xmove: contexts of different instances"
        );
        debug_assert!((0..=self.top()).contains(&n), "xmove: bad count {n}");
        unsafe { ffi::lua_xmove(self.as_ptr(), to.as_ptr(), n) }
    }

    /// Status of this context: `Ok`, `Yield`, or the error that killed it
    pub fn status(&self) -> Status {
        Status::from_raw(unsafe { ffi::lua_status(self.as_ptr()) })
    }

    /// Status of coroutine `co` as seen from this context
    pub fn coroutine_status(&self, co: &State) -> CoroutineStatus {
        if ptr::eq(self, co) {
            return CoroutineStatus::Running;
        }
        match co.status() {
            Status::Yield => CoroutineStatus::Suspended,
            Status::Ok => {
                if co.get_stack(0).is_some() {
                    CoroutineStatus::Normal
                } else if co.top() == 0 || co.has_finished() {
                    CoroutineStatus::Dead
                } else {
                    CoroutineStatus::Suspended
                }
            }
            _ => CoroutineStatus::Dead,
        }
    }

    /// Whether this is the main thread of its instance
    pub fn is_main_thread(&self) -> bool {
        let main = self.push_thread();
        self.pop(1);
        main
    }

    /// Push the weak-keyed set of finished coroutines, creating it on first use
    fn push_finished_set(&self) {
        let key = ptr::addr_of!(FINISHED_KEY) as *mut c_void;
        self.push_light_userdata(key);
        self.raw_get(REGISTRY_INDEX);
        if self.is_table(-1) {
            return;
        }
        self.pop(1);
        self.new_table();
        self.create_table(0, 1);
        self.push_str("k");
        self.raw_set_field(-2, "__mode");
        self.set_metatable(-2);
        self.push_light_userdata(key);
        self.push_value(-2);
        self.raw_set(REGISTRY_INDEX);
    }

    fn has_finished(&self) -> bool {
        if self.check_stack(5).is_err() {
            return false;
        }
        self.push_finished_set();
        self.push_thread();
        self.raw_get(-2);
        let finished = self.coerce_boolean(-1);
        self.pop(2);
        finished
    }

    fn mark_finished(&self) {
        if self.check_stack(5).is_err() {
            tracing::warn!("no stack room to record a finished coroutine");
            return;
        }
        self.push_finished_set();
        self.push_thread();
        self.push_boolean(true);
        self.raw_set(-3);
        self.pop(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lua;

    #[test]
    fn test_new_thread_is_distinct() {
        let lua = Lua::new().unwrap();
        let co = lua.new_thread();
        assert!(!ptr::eq(co, &*lua));
        assert!(lua.is_thread(-1));
        assert!(lua.is_main_thread());
        assert!(!co.is_main_thread());
        assert_eq!(co.top(), 0);
    }

    #[test]
    fn test_threads_share_globals() {
        let lua = Lua::new().unwrap();
        lua.push_integer(5);
        lua.set_global("shared").unwrap();
        let co = lua.new_thread();
        co.get_global("shared").unwrap();
        assert_eq!(co.to_integer(-1).unwrap(), 5);
    }

    #[test]
    fn test_xmove_between_contexts() {
        let lua = Lua::new().unwrap();
        let co = lua.new_thread();
        lua.push_integer(1);
        lua.push_integer(2);
        lua.xmove(co, 2);
        assert_eq!(lua.top(), 1);
        assert_eq!(co.top(), 2);
        assert_eq!(co.to_integer(-1).unwrap(), 2);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CoroutineStatus::Suspended.to_string(), "suspended");
        assert_eq!(CoroutineStatus::Dead.to_string(), "dead");
    }

    #[test]
    fn test_resuming_dead_coroutine_fails() {
        let lua = Lua::new().unwrap();
        let co = lua.new_thread();
        assert_eq!(lua.coroutine_status(co), CoroutineStatus::Dead);
        assert_eq!(co.resume(0), Err(CallError::Runtime));
        assert_eq!(co.to_str(-1).unwrap(), "cannot resume dead coroutine");
    }

    #[test]
    fn test_finished_set_is_shared_and_weak() {
        let lua = Lua::new().unwrap();
        let co = lua.new_thread();
        co.mark_finished();
        assert!(co.has_finished());
        assert!(!lua.has_finished());
        assert_eq!(co.top(), 0);

        lua.pop(1);
        lua.gc(crate::GcOption::Collect);
        lua.push_finished_set();
        lua.push_nil();
        assert_eq!(lua.next(-2), Ok(false));
    }
}
