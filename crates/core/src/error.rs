//! Error Handling
//!
//! Every failure that can cross the foreign boundary is translated into one of
//! the typed errors below before it reaches the host. Raw status codes from the
//! runtime never leak past this module.
//!
//! The taxonomy:
//! - [`TypeError`]: a strict accessor found a value of another type
//! - [`CallError`]: a protected call failed
//! - [`LoadError`]: a chunk failed to load
//! - [`StackError`]: the stack could not grow
//!
//! [`Error`] wraps all of them and adds the variants used by native callbacks
//! to raise errors back into the runtime.
//!
//! Errors that originate in the runtime (`CallError`, `LoadError`) carry no
//! payload: the error object is left on the stack, exactly where the runtime
//! put it.

use crate::value::Type;
use moonstack_sys as ffi;
use std::os::raw::c_int;
use thiserror::Error;

/// Status vocabulary shared by calls, loads and coroutines
///
/// `Ok` and `Yield` are success states. Every other variant is a failure whose
/// error object sits on top of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Yield,
    RuntimeError,
    SyntaxError,
    MemoryError,
    ErrorHandlerFailure,
    FileError,
}

impl Status {
    /// Translate a raw runtime status code
    ///
    /// Unknown codes are a contract violation of the runtime; they are
    /// reported as runtime errors.
    pub(crate) fn from_raw(code: c_int) -> Status {
        match code {
            0 => Status::Ok,
            ffi::LUA_YIELD => Status::Yield,
            ffi::LUA_ERRRUN => Status::RuntimeError,
            ffi::LUA_ERRSYNTAX => Status::SyntaxError,
            ffi::LUA_ERRMEM => Status::MemoryError,
            ffi::LUA_ERRERR => Status::ErrorHandlerFailure,
            ffi::LUA_ERRFILE => Status::FileError,
            other => {
                debug_assert!(false, "unknown runtime status code {other}");
                Status::RuntimeError
            }
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, Status::Ok | Status::Yield)
    }
}

/// A strict accessor observed a value of the wrong type
///
/// There is one variant per observed type tag. Any given accessor can produce
/// at most nine of them: the variant for its own type is unreachable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TypeError {
    #[error("{expected} expected, got no value")]
    None { expected: Type },
    #[error("{expected} expected, got nil")]
    Nil { expected: Type },
    #[error("{expected} expected, got boolean")]
    Boolean { expected: Type },
    #[error("{expected} expected, got userdata")]
    LightUserdata { expected: Type },
    #[error("{expected} expected, got number")]
    Number { expected: Type },
    #[error("{expected} expected, got string")]
    String { expected: Type },
    #[error("{expected} expected, got table")]
    Table { expected: Type },
    #[error("{expected} expected, got function")]
    Function { expected: Type },
    #[error("{expected} expected, got userdata")]
    Userdata { expected: Type },
    #[error("{expected} expected, got thread")]
    Thread { expected: Type },
}

impl TypeError {
    /// Build the error for a value of type `found` where `expected` was wanted
    pub fn mismatch(expected: Type, found: Type) -> TypeError {
        // No wildcard arm: a new Type variant must be handled here.
        match found {
            Type::None => TypeError::None { expected },
            Type::Nil => TypeError::Nil { expected },
            Type::Boolean => TypeError::Boolean { expected },
            Type::LightUserdata => TypeError::LightUserdata { expected },
            Type::Number => TypeError::Number { expected },
            Type::String => TypeError::String { expected },
            Type::Table => TypeError::Table { expected },
            Type::Function => TypeError::Function { expected },
            Type::Userdata => TypeError::Userdata { expected },
            Type::Thread => TypeError::Thread { expected },
        }
    }

    /// The type that was actually found
    pub fn found(&self) -> Type {
        match self {
            TypeError::None { .. } => Type::None,
            TypeError::Nil { .. } => Type::Nil,
            TypeError::Boolean { .. } => Type::Boolean,
            TypeError::LightUserdata { .. } => Type::LightUserdata,
            TypeError::Number { .. } => Type::Number,
            TypeError::String { .. } => Type::String,
            TypeError::Table { .. } => Type::Table,
            TypeError::Function { .. } => Type::Function,
            TypeError::Userdata { .. } => Type::Userdata,
            TypeError::Thread { .. } => Type::Thread,
        }
    }

    /// The type the accessor asked for
    pub fn expected(&self) -> Type {
        match *self {
            TypeError::None { expected }
            | TypeError::Nil { expected }
            | TypeError::Boolean { expected }
            | TypeError::LightUserdata { expected }
            | TypeError::Number { expected }
            | TypeError::String { expected }
            | TypeError::Table { expected }
            | TypeError::Function { expected }
            | TypeError::Userdata { expected }
            | TypeError::Thread { expected } => expected,
        }
    }
}

/// A protected call failed; the error object is on top of the stack
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    #[error("runtime error")]
    Runtime,
    #[error("memory allocation error")]
    OutOfMemory,
    #[error("error while running the message handler")]
    ErrorHandlerFailure,
}

impl CallError {
    /// Map an error status from `lua_pcall`, `lua_cpcall` or `lua_resume`
    pub(crate) fn from_status(status: Status) -> CallError {
        match status {
            Status::MemoryError => CallError::OutOfMemory,
            Status::ErrorHandlerFailure => CallError::ErrorHandlerFailure,
            // Calls never report syntax or file errors, and Ok/Yield are
            // filtered out by the callers.
            Status::RuntimeError
            | Status::SyntaxError
            | Status::FileError
            | Status::Ok
            | Status::Yield => CallError::Runtime,
        }
    }
}

/// A chunk failed to load; the error message is on top of the stack
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    #[error("syntax error during pre-compilation")]
    InvalidSyntax,
    #[error("runtime error")]
    Runtime,
    #[error("memory allocation error")]
    OutOfMemory,
    #[error("cannot open or read the file")]
    FileOpenOrRead,
}

impl LoadError {
    pub(crate) fn from_status(status: Status) -> LoadError {
        match status {
            Status::SyntaxError => LoadError::InvalidSyntax,
            Status::MemoryError => LoadError::OutOfMemory,
            Status::FileError => LoadError::FileOpenOrRead,
            Status::RuntimeError
            | Status::ErrorHandlerFailure
            | Status::Ok
            | Status::Yield => LoadError::Runtime,
        }
    }
}

/// The stack could not be grown
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    #[error("not enough memory to grow the stack")]
    OutOfMemory,
    #[error("stack overflow")]
    StackOverflow,
}

/// Any error produced by this crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("invalid UTF-8 in string value: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A native function was called with a bad argument
    #[error("bad argument #{position} ({message})")]
    Argument { position: i32, message: String },

    /// Raise a string error from a native function
    #[error("{0}")]
    Message(String),

    /// The error value has already been pushed onto the stack
    #[error("error value raised from the stack")]
    Raised,
}

impl Error {
    /// Whether the error object is already on top of the stack
    ///
    /// Runtime-originated failures leave their error value behind; re-raising
    /// them must not push anything new.
    pub(crate) fn value_on_stack(&self) -> bool {
        matches!(self, Error::Call(_) | Error::Load(_) | Error::Raised)
    }
}

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(Status::from_raw(0), Status::Ok);
        assert_eq!(Status::from_raw(ffi::LUA_YIELD), Status::Yield);
        assert_eq!(Status::from_raw(ffi::LUA_ERRFILE), Status::FileError);
        assert!(!Status::Yield.is_error());
        assert!(Status::MemoryError.is_error());
    }

    #[test]
    fn test_type_error_round_trips_found_type() {
        let all = [
            Type::None,
            Type::Nil,
            Type::Boolean,
            Type::LightUserdata,
            Type::Number,
            Type::String,
            Type::Table,
            Type::Function,
            Type::Userdata,
            Type::Thread,
        ];
        for found in all {
            let err = TypeError::mismatch(Type::Number, found);
            assert_eq!(err.found(), found);
            assert_eq!(err.expected(), Type::Number);
        }
    }

    #[test]
    fn test_type_error_message() {
        let err = TypeError::mismatch(Type::Number, Type::String);
        assert_eq!(err.to_string(), "number expected, got string");
    }

    #[test]
    fn test_call_error_mapping() {
        assert_eq!(
            CallError::from_status(Status::MemoryError),
            CallError::OutOfMemory
        );
        assert_eq!(
            CallError::from_status(Status::ErrorHandlerFailure),
            CallError::ErrorHandlerFailure
        );
        assert_eq!(
            CallError::from_status(Status::RuntimeError),
            CallError::Runtime
        );
    }

    #[test]
    fn test_load_error_mapping() {
        assert_eq!(
            LoadError::from_status(Status::SyntaxError),
            LoadError::InvalidSyntax
        );
        assert_eq!(
            LoadError::from_status(Status::FileError),
            LoadError::FileOpenOrRead
        );
    }

    #[test]
    fn test_format_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("panic message");
        assert_eq!(format_panic_payload(&payload), "panic message");

        let payload: Box<dyn std::any::Any + Send> = Box::new("owned panic".to_string());
        assert_eq!(format_panic_payload(&payload), "owned panic");
    }

    #[test]
    fn test_value_on_stack() {
        assert!(Error::Raised.value_on_stack());
        assert!(Error::from(CallError::Runtime).value_on_stack());
        assert!(!Error::Message("boom".into()).value_on_stack());
    }
}
