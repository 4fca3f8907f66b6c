//! moonstack: a typed layer over the Lua 5.1 value stack
//!
//! The embedded runtime exchanges every value with the host through a stack
//! of slots addressed by integer index. This crate keeps the stack model and
//! adds what the raw interface leaves to convention:
//!
//! - index resolution and stack growth that report misuse instead of
//!   corrupting memory;
//! - strict and coercing typed accessors, with one error variant per type
//!   actually found;
//! - protected calls and loads whose status codes become typed errors;
//! - native callbacks that return `Result` and never unwind through the
//!   runtime while Rust values are alive;
//! - references, coroutines, string buffers and debug introspection.
//!
//! # Modules
//!
//! - `state`: [`Lua`] (an owned instance) and [`State`] (a context handle)
//! - `alloc`: the pinned allocator context and memory limits
//! - `stack`: index resolution and stack reshaping
//! - `value`: typed push/read, tables, comparisons, userdata
//! - `call`: protected calls and the native-function trampoline
//! - `load`: chunk loading from memory, readers and files; dumping
//! - `reference`: integer handles to values held in a table
//! - `coroutine`: host-driven coroutines
//! - `buffer`: incremental string building on the stack
//! - `debug`: activation records, hooks, tracebacks
//! - `auxlib`: argument checks and library registration
//! - `config`: instance settings, also readable from TOML
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use moonstack::{Lua, native_fn};
//!
//! native_fn! {
//!     fn greet(state) {
//!         let name = state.check_string(1)?;
//!         state.push_str(&format!("hello, {name}"));
//!         Ok(1)
//!     }
//! }
//!
//! let lua = Lua::new()?;
//! lua.push_function(greet);
//! lua.set_global("greet")?;
//! lua.do_string("return greet('moon')")?;
//! assert_eq!(lua.to_str(-1)?, "hello, moon");
//! ```

pub mod alloc;
pub mod auxlib;
pub mod buffer;
pub mod call;
pub mod config;
pub mod coroutine;
pub mod debug;
pub mod error;
pub mod load;
pub mod reference;
pub mod stack;
pub mod state;
pub mod value;

/// Raw bindings, for what this crate does not wrap
pub use moonstack_sys as sys;

pub use alloc::{AllocatorContext, MemoryStats};
pub use buffer::Buffer;
pub use call::{CFunction, entry};
pub use config::Config;
pub use coroutine::{CoroutineStatus, Resumed};
pub use debug::{DebugInfo, Hook, HookEvent, HookMask, Selector};
pub use error::{CallError, Error, LoadError, Result, StackError, Status, TypeError};
pub use reference::Reference;
pub use stack::{
    ENVIRON_INDEX, GLOBALS_INDEX, MAX_STACK, MIN_STACK, MULTRET, Pseudo, REGISTRY_INDEX, Slot,
    upvalue_index,
};
pub use state::{GcOption, Lua, State};
pub use value::{Integer, Number, Type, Value};
