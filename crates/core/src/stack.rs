//! Stack index resolution and stack shape
//!
//! Every execution context owns a stack of tagged values, addressed by index:
//!
//! ```text
//!   index   top-relative
//!   ┌───┐
//!   │ 4 │   -1   ← top
//!   │ 3 │   -2
//!   │ 2 │   -3
//!   │ 1 │   -4   ← bottom
//!   └───┘
//! ```
//!
//! Positive indices count from the bottom, negative ones from the top. Index 0
//! is never valid. Below both ranges sits a disjoint pseudo-index space for the
//! registry, the environment and globals tables, and the upvalues of the
//! running closure; pseudo-indices are never checked against the stack depth.
//!
//! The runtime only validates indices in checked builds of its own, so every
//! index-taking operation here runs the check itself with `debug_assert!`. An
//! invalid index is an embedder bug, not a runtime condition.

use crate::error::StackError;
use crate::state::State;
use moonstack_sys as ffi;
use std::fmt::Write;

/// Hard limit on stack depth for native frames
pub const MAX_STACK: i32 = ffi::LUAI_MAXCSTACK;

/// Slots every native function may use without calling `check_stack`
pub const MIN_STACK: i32 = ffi::LUA_MINSTACK;

/// Highest upvalue number a closure can address
pub const MAX_UPVALUES: i32 = ffi::LUAI_MAXUPVALUES;

/// Registry table pseudo-index
pub const REGISTRY_INDEX: i32 = ffi::LUA_REGISTRYINDEX;

/// Environment table of the running function
pub const ENVIRON_INDEX: i32 = ffi::LUA_ENVIRONINDEX;

/// Globals table pseudo-index
pub const GLOBALS_INDEX: i32 = ffi::LUA_GLOBALSINDEX;

/// Value for `nresults` that keeps every result
pub const MULTRET: i32 = ffi::LUA_MULTRET;

/// Reserved table a pseudo-index denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    Registry,
    Environment,
    Globals,
    /// Upvalue `n` (1-based) of the running closure
    Upvalue(u8),
}

impl Pseudo {
    /// The raw index for this pseudo slot
    pub fn index(self) -> i32 {
        match self {
            Pseudo::Registry => REGISTRY_INDEX,
            Pseudo::Environment => ENVIRON_INDEX,
            Pseudo::Globals => GLOBALS_INDEX,
            Pseudo::Upvalue(n) => upvalue_index(i32::from(n)),
        }
    }
}

/// Classification of a stack index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A real stack position, counted from the bottom (1-based)
    Real(usize),
    Pseudo(Pseudo),
    Invalid,
}

/// Pseudo-index of upvalue `n` of the running closure
///
/// # Panics
///
/// Panics in debug builds unless `1 <= n <= 255`.
#[inline]
pub fn upvalue_index(n: i32) -> i32 {
    debug_assert!(
        (1..=MAX_UPVALUES).contains(&n),
        "upvalue_index: {n} outside 1..={MAX_UPVALUES}"
    );
    ffi::lua_upvalueindex(n)
}

/// Classify `index` against a stack of depth `top`
///
/// This is the whole index protocol, independent of any live state.
pub fn resolve(index: i32, top: i32) -> Slot {
    if index == 0 {
        return Slot::Invalid;
    }
    if index <= REGISTRY_INDEX {
        return match index {
            REGISTRY_INDEX => Slot::Pseudo(Pseudo::Registry),
            ENVIRON_INDEX => Slot::Pseudo(Pseudo::Environment),
            GLOBALS_INDEX => Slot::Pseudo(Pseudo::Globals),
            _ => {
                let n = GLOBALS_INDEX - index;
                if (1..=MAX_UPVALUES).contains(&n) {
                    Slot::Pseudo(Pseudo::Upvalue(n as u8))
                } else {
                    Slot::Invalid
                }
            }
        };
    }
    let position = if index < 0 { top + index + 1 } else { index };
    if (1..=top).contains(&position) {
        Slot::Real(position as usize)
    } else {
        Slot::Invalid
    }
}

impl State {
    /// Number of values on the stack; also the index of the top value
    #[inline]
    pub fn top(&self) -> i32 {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Classify an index against the current stack
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `index` lies below the upvalue range.
    pub fn resolve_index(&self, index: i32) -> Slot {
        debug_assert!(
            index > REGISTRY_INDEX || index >= GLOBALS_INDEX - MAX_UPVALUES,
            "index {index} is below the upvalue range"
        );
        resolve(index, self.top())
    }

    /// Whether `index` names an existing slot or a pseudo-index
    #[inline]
    pub fn is_valid_index(&self, index: i32) -> bool {
        !matches!(resolve(index, self.top()), Slot::Invalid)
    }

    /// Whether `index` may be passed to a query
    ///
    /// Queries also accept positive indices above the top; they observe
    /// [`Type::None`](crate::Type::None) there.
    #[inline]
    pub fn is_acceptable_index(&self, index: i32) -> bool {
        index > 0 || self.is_valid_index(index)
    }

    #[inline]
    pub(crate) fn check_index(&self, index: i32) {
        debug_assert!(
            self.is_valid_index(index),
            "invalid stack index {index} (top is {})",
            self.top()
        );
    }

    #[inline]
    pub(crate) fn check_acceptable(&self, index: i32) {
        debug_assert!(
            self.is_acceptable_index(index),
            "unacceptable stack index {index} (top is {})",
            self.top()
        );
    }

    /// Convert a top-relative index into an absolute one
    ///
    /// Pseudo-indices and positive indices are returned unchanged.
    pub fn abs_index(&self, index: i32) -> i32 {
        if index > 0 || index <= REGISTRY_INDEX {
            index
        } else {
            self.top() + index + 1
        }
    }

    /// Make room for `extra` more values
    ///
    /// Fails with `StackOverflow`, leaving the stack untouched, if the stack
    /// would exceed [`MAX_STACK`]. Never shrinks the stack.
    pub fn check_stack(&self, extra: i32) -> Result<(), StackError> {
        debug_assert!(extra >= 0, "check_stack: negative size {extra}");
        if extra > MAX_STACK - self.top() {
            return Err(StackError::StackOverflow);
        }
        if unsafe { ffi::lua_checkstack(self.as_ptr(), extra) } == 0 {
            return Err(StackError::OutOfMemory);
        }
        Ok(())
    }

    /// Set the top; growing fills new slots with nil, shrinking discards
    ///
    /// Accepts `0` to empty the stack.
    pub fn set_top(&self, index: i32) {
        debug_assert!(
            index >= 0 || self.is_valid_index(index),
            "set_top: invalid index {index}"
        );
        unsafe { ffi::lua_settop(self.as_ptr(), index) }
    }

    /// Pop `n` values
    pub fn pop(&self, n: i32) {
        debug_assert!(
            (0..=self.top()).contains(&n),
            "pop: cannot pop {n} values from a stack of {}",
            self.top()
        );
        unsafe { ffi::lua_pop(self.as_ptr(), n) }
    }

    /// Push a copy of the value at `index`
    pub fn push_value(&self, index: i32) {
        self.check_index(index);
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) }
    }

    /// Remove the value at `index`, shifting the values above it down
    pub fn remove(&self, index: i32) {
        self.check_real(index);
        unsafe { ffi::lua_remove(self.as_ptr(), index) }
    }

    /// Move the top value into `index`, shifting the values above it up
    pub fn insert(&self, index: i32) {
        self.check_real(index);
        unsafe { ffi::lua_insert(self.as_ptr(), index) }
    }

    /// Pop the top value into `index` without shifting
    pub fn replace(&self, index: i32) {
        self.check_index(index);
        debug_assert!(self.top() >= 1, "replace: empty stack");
        unsafe { ffi::lua_replace(self.as_ptr(), index) }
    }

    /// Render every slot, bottom first, for diagnostics
    ///
    /// Does not modify the stack; strings are shown without converting
    /// numbers in place.
    pub fn stack_dump(&self) -> String {
        let top = self.top();
        let mut out = String::new();
        for index in 1..=top {
            if index > 1 {
                out.push_str(", ");
            }
            let _ = write!(out, "[{index}] {}", self.to_value(index));
        }
        if top == 0 {
            out.push_str("<empty>");
        }
        out
    }

    fn check_real(&self, index: i32) {
        debug_assert!(
            matches!(self.resolve_index(index), Slot::Real(_)),
            "index {index} must name a real stack slot (top is {})",
            self.top()
        );
    }
}
