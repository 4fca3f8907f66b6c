//! Calls into the runtime and native callbacks out of it
//!
//! # Calling
//!
//! Push the function, then its arguments, then call:
//!
//! ```rust,ignore
//! lua.get_global("string")?;
//! lua.get_field(-1, "rep")?;
//! lua.push_str("ab");
//! lua.push_integer(3);
//! lua.protected_call(2, 1, None)?; // "ababab" on top
//! ```
//!
//! A failed protected call leaves exactly one value, the error object, in
//! place of the function and its arguments, and is reported as a
//! [`CallError`]. The unprotected [`State::call`] is `unsafe`: its errors jump
//! over Rust frames.
//!
//! # Native functions
//!
//! The runtime reports errors with a non-local jump, which must never cross a
//! Rust frame that still owns something. Native functions therefore never
//! raise directly: they return `Result<i32>` through [`entry`] (or the
//! [`native_fn!`](crate::native_fn) macro), and the error is raised only after
//! every Rust value of the callback has been dropped. Panics are caught at the
//! same point and turned into runtime errors.
//!
//! ```rust,ignore
//! moonstack::native_fn! {
//!     fn add(state) {
//!         let a = state.check_number(1)?;
//!         let b = state.check_number(2)?;
//!         state.push_number(a + b);
//!         Ok(1)
//!     }
//! }
//! ```

use crate::error::{CallError, Error, Result, Status, format_panic_payload};
use crate::stack::MULTRET;
use crate::state::State;
use libc::c_void;
use moonstack_sys as ffi;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

/// Signature of a native function callable from the runtime
///
/// Receives its arguments at stack indices `1..=top`, pushes its results and
/// returns how many there are.
pub type CFunction = ffi::lua_CFunction;

impl State {
    /// Call the function below the top `nargs` values, in protected mode
    ///
    /// On success the function and arguments are replaced by `nresults`
    /// results (all of them for [`MULTRET`]). On failure they are replaced by
    /// the error object, or by the value returned from the message handler at
    /// stack index `handler`.
    pub fn protected_call(
        &self,
        nargs: i32,
        nresults: i32,
        handler: Option<i32>,
    ) -> Result<(), CallError> {
        debug_assert!(nargs >= 0, "protected_call: negative argument count");
        debug_assert!(
            nresults >= 0 || nresults == MULTRET,
            "protected_call: bad result count {nresults}"
        );
        debug_assert!(
            nargs < self.top(),
            "protected_call: stack holds {} values, needs {} and a function",
            self.top(),
            nargs
        );
        let errfunc = match handler {
            Some(index) => {
                let index = self.abs_index(index);
                self.check_index(index);
                debug_assert!(
                    index < self.top() - nargs,
                    "protected_call: message handler must sit below the function"
                );
                index
            }
            None => 0,
        };
        let code = unsafe { ffi::lua_pcall(self.as_ptr(), nargs, nresults, errfunc) };
        self.call_outcome(code)
    }

    /// Call the function below the top `nargs` values, unprotected
    ///
    /// An error raised by the callee jumps straight to the innermost enclosing
    /// protected call; with none, the panic handler runs and the process ends.
    /// Inside native functions prefer [`protected_call`](Self::protected_call)
    /// and `?`: the error object is re-raised unchanged by [`entry`].
    ///
    /// # Safety
    /// Same contract as [`raise`](Self::raise): no Rust frame between here and
    /// the landing point may own a value with a destructor.
    pub unsafe fn call(&self, nargs: i32, nresults: i32) {
        debug_assert!(nargs >= 0 && nargs < self.top(), "call: bad argument count {nargs}");
        debug_assert!(nresults >= 0 || nresults == MULTRET, "call: bad result count {nresults}");
        unsafe { ffi::lua_call(self.as_ptr(), nargs, nresults) }
    }

    /// Run `f` in protected mode with a light userdata as its only argument
    ///
    /// `f` may raise errors freely. Results are discarded; on failure the
    /// error object is left on top of the stack.
    pub fn protected_call_native(&self, f: CFunction, ud: *mut c_void) -> Result<(), CallError> {
        let code = unsafe { ffi::lua_cpcall(self.as_ptr(), f, ud) };
        self.call_outcome(code)
    }

    /// Raise the value on top of the stack as an error
    ///
    /// # Safety
    /// Never returns: control jumps to the innermost protected call. No Rust
    /// frame between here and that call may own a value with a destructor,
    /// and there must be a protected call to land in.
    pub unsafe fn raise(&self) -> ! {
        debug_assert!(self.top() >= 1, "raise: no error value on the stack");
        unsafe { ffi::lua_error(self.as_ptr()) }
    }

    fn call_outcome(&self, code: c_int) -> Result<(), CallError> {
        match Status::from_raw(code) {
            Status::Ok => Ok(()),
            status => {
                let err = CallError::from_status(status);
                tracing::trace!(error = %err, "protected call failed");
                Err(err)
            }
        }
    }
}

/// Run a native function body, raising its error (or panic) in the runtime
///
/// The body's `Ok(n)` is the number of results it pushed. An `Err` is turned
/// into an error object:
///
/// - [`Error::Message`] is prefixed with the caller's position;
/// - [`Error::Argument`] is formatted as `bad argument #n to 'name' (...)`;
/// - errors whose value is already on the stack ([`Error::Call`],
///   [`Error::Load`], [`Error::Raised`]) are re-raised unchanged;
/// - anything else is raised as its message, with the position prefix.
///
/// # Safety
/// `l` must be the state the runtime passed to the native function, and the
/// return value must be returned to the runtime directly.
pub unsafe fn entry<F>(l: *mut ffi::lua_State, body: F) -> c_int
where
    F: FnOnce(&State) -> Result<i32>,
{
    let state = unsafe { State::from_ptr(l) };
    match panic::catch_unwind(AssertUnwindSafe(|| body(state))) {
        Ok(Ok(nresults)) => {
            // Negative counts come from yield_now.
            debug_assert!(
                nresults <= state.top(),
                "native function returned {nresults} results with {} on the stack",
                state.top()
            );
            return nresults;
        }
        Ok(Err(err)) => push_error(state, err),
        Err(payload) => {
            let message = format_panic_payload(&payload);
            tracing::warn!(%message, "panic in native function");
            state.push_str(&format!("panic in native function: {message}"));
        }
    }
    // Every Rust value of the callback is gone; the jump is safe from here.
    unsafe { ffi::lua_error(l) }
}

fn push_error(state: &State, err: Error) {
    if err.value_on_stack() {
        return;
    }
    let message = match err {
        Error::Argument { position, message } => state.argument_message(position, &message),
        other => format!("{}{}", state.where_(1), other),
    };
    state.push_str(&message);
}

/// Define a native function whose body returns `Result<i32>`
///
/// Expands to an `unsafe extern "C-unwind" fn` that can be pushed with
/// [`State::push_function`] and that routes errors through [`entry`].
#[macro_export]
macro_rules! native_fn {
    ($(#[$meta:meta])* $vis:vis fn $name:ident($state:ident) $body:block) => {
        $(#[$meta])*
        $vis unsafe extern "C-unwind" fn $name(
            l: *mut $crate::sys::lua_State,
        ) -> ::std::os::raw::c_int {
            unsafe {
                $crate::call::entry(l, |$state: &$crate::State| -> $crate::Result<i32> { $body })
            }
        }
    };
}
