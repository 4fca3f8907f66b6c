//! Typed access to stack values
//!
//! Each scalar kind has a push operation and two ways to read it back:
//!
//! - **strict** (`to_*`): succeeds only when the slot holds exactly that kind,
//!   and otherwise reports the type that was actually found as a
//!   [`TypeError`] variant;
//! - **coercing** (`coerce_*`): follows the runtime's own conversion rules
//!   (numeric strings become numbers, anything becomes a boolean by
//!   truthiness, numbers become strings) and falls back to `0`, `false` or
//!   an empty string when no conversion exists.
//!
//! Table access comes in two families. `get_table`/`set_table` and the
//! field/global helpers honour metamethods, so they may run arbitrary code in
//! the runtime and raise errors. They run in protected mode and report a
//! [`CallError`], with their operands consumed and the error object left on
//! top of the stack. The same holds for `concat`, `equal`, `less_than` and
//! `next`. The `raw_*` operations never dispatch metamethods and never
//! re-enter the runtime.
//!
//! # Iteration
//!
//! [`State::next`] walks a table with the key kept on the stack:
//!
//! ```rust,ignore
//! lua.push_nil(); // first key
//! while lua.next(t)? {
//!     // key at -2, value at -1
//!     lua.pop(1); // keep the key for the next round
//! }
//! ```
//!
//! Never call [`State::coerce_bytes`] or [`State::coerce_string`] on the key
//! during a traversal unless it is known to be a string: the coercion rewrites
//! a number key in place and the next call to `next` loses its position.

use crate::call::CFunction;
use crate::error::{CallError, Result, TypeError};
use crate::stack::MULTRET;
use crate::state::State;
use libc::{c_char, c_void, size_t};
use moonstack_sys as ffi;
use std::fmt;
use std::os::raw::c_int;
use std::ptr;

/// Integer type of the runtime (`lua_Integer`)
pub type Integer = ffi::lua_Integer;

/// Number type of the runtime (`lua_Number`)
pub type Number = ffi::lua_Number;

/// Type tag of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value at this position (above the top)
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl Type {
    pub(crate) fn from_raw(tag: c_int) -> Type {
        match tag {
            ffi::LUA_TNIL => Type::Nil,
            ffi::LUA_TBOOLEAN => Type::Boolean,
            ffi::LUA_TLIGHTUSERDATA => Type::LightUserdata,
            ffi::LUA_TNUMBER => Type::Number,
            ffi::LUA_TSTRING => Type::String,
            ffi::LUA_TTABLE => Type::Table,
            ffi::LUA_TFUNCTION => Type::Function,
            ffi::LUA_TUSERDATA => Type::Userdata,
            ffi::LUA_TTHREAD => Type::Thread,
            _ => Type::None,
        }
    }

    /// The runtime's name for this type, as `type()` reports it
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::LightUserdata | Type::Userdata => "userdata",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
            Type::Thread => "thread",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owned snapshot of one stack slot
///
/// Scalars carry their payload. Collectable values carry only their identity,
/// which stays meaningful only while the value is reachable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Nil,
    Boolean(bool),
    LightUserdata(*mut c_void),
    Number(Number),
    String(Vec<u8>),
    Table(*const c_void),
    Function(*const c_void),
    Userdata(*mut c_void),
    Thread(*const c_void),
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::None => Type::None,
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::LightUserdata(_) => Type::LightUserdata,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::Userdata(_) => Type::Userdata,
            Value::Thread(_) => Type::Thread,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::LightUserdata(p) => write!(f, "userdata: {p:p}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Value::Table(p) => write!(f, "table: {p:p}"),
            Value::Function(p) => write!(f, "function: {p:p}"),
            Value::Userdata(p) => write!(f, "userdata: {p:p}"),
            Value::Thread(p) => write!(f, "thread: {p:p}"),
        }
    }
}

/// Alignment the runtime guarantees for userdata payloads
pub const USERDATA_ALIGN: usize = 8;

impl State {
    // ----- type queries -----

    /// Type of the value at `index`; [`Type::None`] above the top
    pub fn type_of(&self, index: i32) -> Type {
        self.check_acceptable(index);
        Type::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    pub fn type_name(&self, index: i32) -> &'static str {
        self.type_of(index).name()
    }

    pub fn is_none(&self, index: i32) -> bool {
        self.type_of(index) == Type::None
    }

    pub fn is_nil(&self, index: i32) -> bool {
        self.type_of(index) == Type::Nil
    }

    pub fn is_none_or_nil(&self, index: i32) -> bool {
        matches!(self.type_of(index), Type::None | Type::Nil)
    }

    pub fn is_boolean(&self, index: i32) -> bool {
        self.type_of(index) == Type::Boolean
    }

    /// Whether the value is a number or a string convertible to one
    pub fn is_number(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_isnumber(self.as_ptr(), index) != 0 }
    }

    /// Whether the value is a string or a number (always convertible)
    pub fn is_string(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_isstring(self.as_ptr(), index) != 0 }
    }

    pub fn is_table(&self, index: i32) -> bool {
        self.type_of(index) == Type::Table
    }

    pub fn is_function(&self, index: i32) -> bool {
        self.type_of(index) == Type::Function
    }

    /// Whether the value is a native (C ABI) function
    pub fn is_cfunction(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_iscfunction(self.as_ptr(), index) != 0 }
    }

    /// Whether the value is a full or light userdata
    pub fn is_userdata(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_isuserdata(self.as_ptr(), index) != 0 }
    }

    pub fn is_light_userdata(&self, index: i32) -> bool {
        self.type_of(index) == Type::LightUserdata
    }

    pub fn is_thread(&self, index: i32) -> bool {
        self.type_of(index) == Type::Thread
    }

    fn expect_type(&self, index: i32, expected: Type) -> Result<(), TypeError> {
        let found = self.type_of(index);
        if found == expected {
            Ok(())
        } else {
            Err(TypeError::mismatch(expected, found))
        }
    }

    // ----- push -----

    pub fn push_nil(&self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    pub fn push_boolean(&self, b: bool) {
        unsafe { ffi::lua_pushboolean(self.as_ptr(), c_int::from(b)) }
    }

    pub fn push_integer(&self, n: Integer) {
        unsafe { ffi::lua_pushinteger(self.as_ptr(), n) }
    }

    pub fn push_number(&self, n: Number) {
        unsafe { ffi::lua_pushnumber(self.as_ptr(), n) }
    }

    /// Push a copy of `bytes`; embedded zeros are kept
    pub fn push_bytes(&self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(
                self.as_ptr(),
                bytes.as_ptr() as *const c_char,
                bytes.len() as size_t,
            )
        }
    }

    pub fn push_str(&self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_light_userdata(&self, p: *mut c_void) {
        unsafe { ffi::lua_pushlightuserdata(self.as_ptr(), p) }
    }

    /// Push a native function with no upvalues
    pub fn push_function(&self, f: CFunction) {
        self.push_closure(f, 0);
    }

    /// Push a native closure capturing the top `n` values as upvalues
    ///
    /// Inside the closure they are addressed with
    /// [`upvalue_index`](crate::stack::upvalue_index).
    pub fn push_closure(&self, f: CFunction, n: i32) {
        debug_assert!(
            (0..=crate::stack::MAX_UPVALUES).contains(&n),
            "push_closure: {n} upvalues"
        );
        debug_assert!(n <= self.top(), "push_closure: only {} values", self.top());
        unsafe { ffi::lua_pushcclosure(self.as_ptr(), f, n) }
    }

    /// Push this execution context as a thread value
    ///
    /// Returns true if it is the main thread of its instance.
    pub fn push_thread(&self) -> bool {
        unsafe { ffi::lua_pushthread(self.as_ptr()) == 1 }
    }

    /// Push a scalar snapshot back onto the stack
    ///
    /// Returns false, pushing nothing, for [`Value::None`] and for collectable
    /// values, which cannot be recreated from their identity.
    pub fn push_value_of(&self, value: &Value) -> bool {
        match value {
            Value::Nil => self.push_nil(),
            Value::Boolean(b) => self.push_boolean(*b),
            Value::LightUserdata(p) => self.push_light_userdata(*p),
            Value::Number(n) => self.push_number(*n),
            Value::String(bytes) => self.push_bytes(bytes),
            Value::None
            | Value::Table(_)
            | Value::Function(_)
            | Value::Userdata(_)
            | Value::Thread(_) => return false,
        }
        true
    }

    // ----- strict reads -----

    pub fn to_boolean(&self, index: i32) -> Result<bool, TypeError> {
        self.expect_type(index, Type::Boolean)?;
        Ok(unsafe { ffi::lua_toboolean(self.as_ptr(), index) != 0 })
    }

    /// The number at `index`, truncated to an integer
    pub fn to_integer(&self, index: i32) -> Result<Integer, TypeError> {
        self.expect_type(index, Type::Number)?;
        Ok(unsafe { ffi::lua_tointeger(self.as_ptr(), index) })
    }

    pub fn to_number(&self, index: i32) -> Result<Number, TypeError> {
        self.expect_type(index, Type::Number)?;
        Ok(unsafe { ffi::lua_tonumber(self.as_ptr(), index) })
    }

    /// A copy of the string at `index`; numbers are rejected
    pub fn to_bytes(&self, index: i32) -> Result<Vec<u8>, TypeError> {
        self.expect_type(index, Type::String)?;
        Ok(unsafe { self.read_string(index) }.unwrap_or_default())
    }

    /// The string at `index`, which must be valid UTF-8
    pub fn to_str(&self, index: i32) -> Result<String> {
        let bytes = self.to_bytes(index)?;
        std::str::from_utf8(&bytes)?;
        // Validated just above.
        Ok(String::from_utf8(bytes).unwrap_or_default())
    }

    pub fn to_light_userdata(&self, index: i32) -> Result<*mut c_void, TypeError> {
        self.expect_type(index, Type::LightUserdata)?;
        Ok(unsafe { ffi::lua_touserdata(self.as_ptr(), index) })
    }

    /// Payload address of a full userdata (or the pointer of a light one)
    pub fn to_userdata(&self, index: i32) -> Result<*mut c_void, TypeError> {
        match self.type_of(index) {
            Type::Userdata | Type::LightUserdata => {
                Ok(unsafe { ffi::lua_touserdata(self.as_ptr(), index) })
            }
            found => Err(TypeError::mismatch(Type::Userdata, found)),
        }
    }

    /// The thread at `index`, as a handle to its execution context
    pub fn to_thread(&self, index: i32) -> Result<&State, TypeError> {
        self.expect_type(index, Type::Thread)?;
        let thread = unsafe { ffi::lua_tothread(self.as_ptr(), index) };
        Ok(unsafe { State::from_ptr(thread) })
    }

    /// The native function at `index`; `None` for anything else, including
    /// functions defined in the runtime's own language
    pub fn to_cfunction(&self, index: i32) -> Option<CFunction> {
        self.check_acceptable(index);
        unsafe { ffi::lua_tocfunction(self.as_ptr(), index) }
    }

    /// Identity of a collectable value; null for scalars
    pub fn to_pointer(&self, index: i32) -> *const c_void {
        self.check_acceptable(index);
        unsafe { ffi::lua_topointer(self.as_ptr(), index) }
    }

    // ----- coercing reads -----

    /// Truthiness: false only for `nil`, `false` and no value
    pub fn coerce_boolean(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_toboolean(self.as_ptr(), index) != 0 }
    }

    /// Numbers and numeric strings, truncated; `0` otherwise
    pub fn coerce_integer(&self, index: i32) -> Integer {
        self.check_acceptable(index);
        unsafe { ffi::lua_tointeger(self.as_ptr(), index) }
    }

    /// Numbers and numeric strings; `0.0` otherwise
    pub fn coerce_number(&self, index: i32) -> Number {
        self.check_acceptable(index);
        unsafe { ffi::lua_tonumber(self.as_ptr(), index) }
    }

    /// Strings and numbers as bytes; empty otherwise
    ///
    /// A number is converted **in place**: the slot holds a string afterwards.
    pub fn coerce_bytes(&self, index: i32) -> Vec<u8> {
        self.check_acceptable(index);
        unsafe { self.read_string(index) }.unwrap_or_default()
    }

    /// Like [`coerce_bytes`](Self::coerce_bytes), decoded lossily as UTF-8
    pub fn coerce_string(&self, index: i32) -> String {
        String::from_utf8_lossy(&self.coerce_bytes(index)).into_owned()
    }

    /// Read a string or number slot through `lua_tolstring`
    ///
    /// # Safety
    /// Converts numbers in place; callers decide whether that is acceptable.
    unsafe fn read_string(&self, index: i32) -> Option<Vec<u8>> {
        let mut len: size_t = 0;
        let data = unsafe { ffi::lua_tolstring(self.as_ptr(), index, &mut len) };
        if data.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
        Some(bytes.to_vec())
    }

    /// Snapshot of the value at `index`, without converting anything
    pub fn to_value(&self, index: i32) -> Value {
        match self.type_of(index) {
            Type::None => Value::None,
            Type::Nil => Value::Nil,
            Type::Boolean => Value::Boolean(self.coerce_boolean(index)),
            Type::LightUserdata => {
                Value::LightUserdata(unsafe { ffi::lua_touserdata(self.as_ptr(), index) })
            }
            Type::Number => Value::Number(self.coerce_number(index)),
            Type::String => Value::String(self.coerce_bytes(index)),
            Type::Table => Value::Table(self.to_pointer(index)),
            Type::Function => Value::Function(self.to_pointer(index)),
            Type::Userdata => Value::Userdata(unsafe { ffi::lua_touserdata(self.as_ptr(), index) }),
            Type::Thread => Value::Thread(self.to_pointer(index)),
        }
    }

    // ----- tables -----

    /// Push a new table with preallocated array and hash parts
    pub fn create_table(&self, narr: i32, nrec: i32) {
        debug_assert!(narr >= 0 && nrec >= 0, "create_table: negative size");
        unsafe { ffi::lua_createtable(self.as_ptr(), narr, nrec) }
    }

    pub fn new_table(&self) {
        self.create_table(0, 0);
    }

    /// Pop a key and push `t[key]`, honouring `__index`
    pub fn get_table(&self, index: i32) -> Result<(), CallError> {
        let t = self.abs_index(index);
        self.check_index(t);
        debug_assert!(self.top() >= 1, "get_table: needs a key");
        self.push_value(t);
        self.insert(-2);
        self.protect(get_table_protected, 2, 1)
    }

    /// Pop a value and a key and perform `t[key] = value`, honouring
    /// `__newindex`
    pub fn set_table(&self, index: i32) -> Result<(), CallError> {
        let t = self.abs_index(index);
        self.check_index(t);
        debug_assert!(self.top() >= 2, "set_table: needs key and value");
        self.push_value(t);
        self.insert(-3);
        self.protect(set_table_protected, 3, 0)
    }

    /// Push `t[name]`, honouring `__index`
    pub fn get_field(&self, index: i32, name: &str) -> Result<(), CallError> {
        let t = self.abs_index(index);
        self.check_index(t);
        self.push_str(name);
        self.get_table(t)
    }

    /// Pop a value and perform `t[name] = value`, honouring `__newindex`
    pub fn set_field(&self, index: i32, name: &str) -> Result<(), CallError> {
        let t = self.abs_index(index);
        self.check_index(t);
        self.push_str(name);
        self.insert(-2);
        self.set_table(t)
    }

    /// Push the global `name`
    pub fn get_global(&self, name: &str) -> Result<(), CallError> {
        self.get_field(crate::stack::GLOBALS_INDEX, name)
    }

    /// Pop a value into the global `name`
    pub fn set_global(&self, name: &str) -> Result<(), CallError> {
        self.set_field(crate::stack::GLOBALS_INDEX, name)
    }

    /// Run `f` over the top `nargs` values in protected mode
    fn protect(&self, f: CFunction, nargs: i32, nresults: i32) -> Result<(), CallError> {
        self.push_function(f);
        self.insert(-(nargs + 1));
        self.protected_call(nargs, nresults, None)
    }

    /// Pop a key and push `t[key]` without metamethods
    pub fn raw_get(&self, index: i32) {
        self.check_table(index);
        unsafe { ffi::lua_rawget(self.as_ptr(), index) }
    }

    /// Pop a value and a key and assign without metamethods
    pub fn raw_set(&self, index: i32) {
        self.check_table(index);
        debug_assert!(self.top() >= 2, "raw_set: needs key and value");
        debug_assert!(
            !self.is_nil(-2)
                && !(self.type_of(-2) == Type::Number && self.coerce_number(-2).is_nan()),
            "raw_set: key is nil or NaN"
        );
        unsafe { ffi::lua_rawset(self.as_ptr(), index) }
    }

    /// Push `t[name]` without metamethods
    pub fn raw_get_field(&self, index: i32, name: &str) {
        let t = self.abs_index(index);
        self.push_str(name);
        self.raw_get(t);
    }

    /// Pop a value into `t[name]` without metamethods
    pub fn raw_set_field(&self, index: i32, name: &str) {
        let t = self.abs_index(index);
        self.push_str(name);
        self.insert(-2);
        self.raw_set(t);
    }

    /// Push `t[n]` without metamethods
    pub fn raw_get_index(&self, index: i32, n: i32) {
        self.check_table(index);
        unsafe { ffi::lua_rawgeti(self.as_ptr(), index, n) }
    }

    /// Pop a value into `t[n]` without metamethods
    pub fn raw_set_index(&self, index: i32, n: i32) {
        self.check_table(index);
        debug_assert!(self.top() >= 1, "raw_set_index: needs a value");
        unsafe { ffi::lua_rawseti(self.as_ptr(), index, n) }
    }

    /// Raw length: border of a table, byte length of a string or number,
    /// payload size of a userdata, 0 otherwise
    pub fn raw_len(&self, index: i32) -> usize {
        self.check_index(index);
        unsafe { ffi::lua_objlen(self.as_ptr(), index) }
    }

    /// Advance a traversal of the table at `index`
    ///
    /// Pops a key (nil to start). Pushes the next key and its value and returns
    /// true, or pushes nothing and returns false once the table is exhausted.
    /// A key that is not in the table is an error.
    pub fn next(&self, index: i32) -> Result<bool, CallError> {
        let t = self.abs_index(index);
        self.check_table(t);
        debug_assert!(self.top() >= 1, "next: needs a key on the stack");
        let base = self.top() - 1;
        self.push_value(t);
        self.insert(-2);
        self.protect(next_protected, 2, MULTRET)?;
        Ok(self.top() > base)
    }

    fn check_table(&self, index: i32) {
        self.check_index(index);
        debug_assert!(
            self.type_of(index) == Type::Table,
            "index {index} holds a {}, not a table",
            self.type_name(index)
        );
    }

    // ----- operators -----

    /// Pop `n` values and push their concatenation, honouring `__concat`
    ///
    /// `n == 0` pushes the empty string; `n == 1` leaves the value as is.
    pub fn concat(&self, n: i32) -> Result<(), CallError> {
        self.check_concat(n);
        self.protect(concat_protected, n, 1)
    }

    /// [`concat`](Self::concat) without protection, for operands known to be
    /// strings or numbers
    ///
    /// # Safety
    /// Same contract as [`call`](Self::call): a failure here (memory, or a
    /// non-string operand) jumps over the calling Rust frames.
    pub(crate) unsafe fn concat_unprotected(&self, n: i32) {
        self.check_concat(n);
        unsafe { ffi::lua_concat(self.as_ptr(), n) }
    }

    fn check_concat(&self, n: i32) {
        debug_assert!(
            (0..=self.top()).contains(&n),
            "concat: {n} values requested, {} available",
            self.top()
        );
    }

    /// Equality honouring `__eq`; false if either index is not valid
    pub fn equal(&self, a: i32, b: i32) -> Result<bool, CallError> {
        self.compare(a, b, equal_protected)
    }

    /// Primitive equality, no metamethods
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        self.check_acceptable(a);
        self.check_acceptable(b);
        unsafe { ffi::lua_rawequal(self.as_ptr(), a, b) != 0 }
    }

    /// `a < b` honouring `__lt`; false if either index is not valid
    pub fn less_than(&self, a: i32, b: i32) -> Result<bool, CallError> {
        self.compare(a, b, less_than_protected)
    }

    fn compare(&self, a: i32, b: i32, f: CFunction) -> Result<bool, CallError> {
        self.check_acceptable(a);
        self.check_acceptable(b);
        if self.is_none(a) || self.is_none(b) {
            return Ok(false);
        }
        let (a, b) = (self.abs_index(a), self.abs_index(b));
        self.push_value(a);
        self.push_value(b);
        self.protect(f, 2, 1)?;
        let outcome = self.coerce_boolean(-1);
        self.pop(1);
        Ok(outcome)
    }

    // ----- metatables, environments, userdata -----

    /// Push the metatable of the value at `index`, if it has one
    pub fn get_metatable(&self, index: i32) -> bool {
        self.check_acceptable(index);
        unsafe { ffi::lua_getmetatable(self.as_ptr(), index) != 0 }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `index`
    pub fn set_metatable(&self, index: i32) {
        self.check_index(index);
        debug_assert!(
            matches!(self.type_of(-1), Type::Table | Type::Nil),
            "set_metatable: top is a {}",
            self.type_name(-1)
        );
        unsafe { ffi::lua_setmetatable(self.as_ptr(), index) };
    }

    /// Push the environment table of the value at `index`
    pub fn get_fenv(&self, index: i32) {
        self.check_index(index);
        unsafe { ffi::lua_getfenv(self.as_ptr(), index) }
    }

    /// Pop a table and make it the environment of the function, thread or
    /// userdata at `index`; false if the value cannot have one
    pub fn set_fenv(&self, index: i32) -> bool {
        self.check_index(index);
        debug_assert!(self.is_table(-1), "set_fenv: top is not a table");
        unsafe { ffi::lua_setfenv(self.as_ptr(), index) != 0 }
    }

    /// Push a new full userdata of `size` bytes and return its payload
    ///
    /// The payload is aligned to [`USERDATA_ALIGN`] and uninitialised.
    pub fn new_userdata(&self, size: usize) -> *mut c_void {
        let block = unsafe { ffi::lua_newuserdata(self.as_ptr(), size as size_t) };
        debug_assert!(!block.is_null());
        block
    }

    /// Push a full userdata holding `value` and return a pointer to it
    ///
    /// Restricted to `Copy` types: the collector frees the block without
    /// running destructors.
    ///
    /// # Panics
    ///
    /// Panics if `T` needs more alignment than the runtime guarantees.
    pub fn push_userdata<T: Copy + 'static>(&self, value: T) -> *mut T {
        assert!(
            std::mem::align_of::<T>() <= USERDATA_ALIGN,
            "push_userdata: alignment {} exceeds {USERDATA_ALIGN}",
            std::mem::align_of::<T>()
        );
        let block = self.new_userdata(std::mem::size_of::<T>()) as *mut T;
        unsafe { ptr::write(block, value) };
        block
    }
}

// Bodies run by `State::protect`. Operands sit at 1..=top of their own frame.

unsafe extern "C-unwind" fn get_table_protected(l: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_gettable(l, 1) };
    1
}

unsafe extern "C-unwind" fn set_table_protected(l: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_settable(l, 1) };
    0
}

unsafe extern "C-unwind" fn next_protected(l: *mut ffi::lua_State) -> c_int {
    if unsafe { ffi::lua_next(l, 1) } != 0 { 2 } else { 0 }
}

unsafe extern "C-unwind" fn concat_protected(l: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_concat(l, ffi::lua_gettop(l)) };
    1
}

unsafe extern "C-unwind" fn equal_protected(l: *mut ffi::lua_State) -> c_int {
    unsafe {
        let eq = ffi::lua_equal(l, 1, 2);
        ffi::lua_pushboolean(l, eq);
    }
    1
}

unsafe extern "C-unwind" fn less_than_protected(l: *mut ffi::lua_State) -> c_int {
    unsafe {
        let lt = ffi::lua_lessthan(l, 1, 2);
        ffi::lua_pushboolean(l, lt);
    }
    1
}
