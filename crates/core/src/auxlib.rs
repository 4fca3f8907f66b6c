//! Argument checking and library helpers for native functions
//!
//! The `check_*` and `opt_*` helpers return [`Error::Argument`], which
//! [`entry`](crate::call::entry) turns into the familiar
//! `bad argument #1 to 'f' (number expected, got nil)` message.

use crate::call::CFunction;
use crate::debug::Selector;
use crate::error::{CallError, Error, Result};
use crate::stack::REGISTRY_INDEX;
use crate::state::State;
use crate::value::{Integer, Number, Type};
use libc::c_void;

/// Registry key of the table of loaded modules
const LOADED: &str = "_LOADED";

impl State {
    /// `"chunk:line: "` for the function at `level`, or an empty string when
    /// the position is unknown
    pub fn where_(&self, level: i32) -> String {
        if let Some(mut info) = self.get_stack(level) {
            if self.get_info(Selector::new().source().line(), &mut info) {
                if let Some(line) = info.current_line() {
                    return format!("{}:{}: ", info.short_src(), line);
                }
            }
        }
        String::new()
    }

    /// Text of an argument error raised from the running native function
    pub(crate) fn argument_message(&self, position: i32, message: &str) -> String {
        let mut position = position;
        let mut name = String::from("?");
        if let Some(mut info) = self.get_stack(0) {
            if self.get_info(Selector::new().name(), &mut info) {
                if info.name_what() == "method" {
                    position -= 1;
                    if position == 0 {
                        return format!(
                            "{}calling '{}' on bad self ({message})",
                            self.where_(1),
                            info.name().unwrap_or("?")
                        );
                    }
                }
                if let Some(n) = info.name() {
                    name = n.to_string();
                }
            }
        }
        format!(
            "{}bad argument #{position} to '{name}' ({message})",
            self.where_(1)
        )
    }

    /// An argument error for `position`
    pub fn arg_error(&self, position: i32, message: impl Into<String>) -> Error {
        Error::Argument {
            position,
            message: message.into(),
        }
    }

    /// An argument error for a value of the wrong type
    pub fn type_error(&self, position: i32, expected: &str) -> Error {
        self.arg_error(
            position,
            format!("{expected} expected, got {}", self.type_name(position)),
        )
    }

    pub fn arg_check(&self, condition: bool, position: i32, message: &str) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(self.arg_error(position, message))
        }
    }

    pub fn check_type(&self, position: i32, expected: Type) -> Result<()> {
        if self.type_of(position) == expected {
            Ok(())
        } else {
            Err(self.type_error(position, expected.name()))
        }
    }

    /// Any value, including nil, but not an absent argument
    pub fn check_any(&self, position: i32) -> Result<()> {
        if self.is_none(position) {
            Err(self.arg_error(position, "value expected"))
        } else {
            Ok(())
        }
    }

    /// A number or numeric string, truncated to an integer
    pub fn check_integer(&self, position: i32) -> Result<Integer> {
        let n = self.coerce_integer(position);
        if n == 0 && !self.is_number(position) {
            return Err(self.type_error(position, Type::Number.name()));
        }
        Ok(n)
    }

    pub fn check_number(&self, position: i32) -> Result<Number> {
        let n = self.coerce_number(position);
        if n == 0.0 && !self.is_number(position) {
            return Err(self.type_error(position, Type::Number.name()));
        }
        Ok(n)
    }

    /// A string or number, as bytes; numbers are converted in place
    pub fn check_bytes(&self, position: i32) -> Result<Vec<u8>> {
        if !self.is_string(position) {
            return Err(self.type_error(position, Type::String.name()));
        }
        Ok(self.coerce_bytes(position))
    }

    /// Like [`check_bytes`](Self::check_bytes), requiring valid UTF-8
    pub fn check_string(&self, position: i32) -> Result<String> {
        let bytes = self.check_bytes(position)?;
        String::from_utf8(bytes).map_err(|_| self.arg_error(position, "invalid UTF-8"))
    }

    pub fn opt_integer(&self, position: i32, default: Integer) -> Result<Integer> {
        if self.is_none_or_nil(position) {
            Ok(default)
        } else {
            self.check_integer(position)
        }
    }

    pub fn opt_number(&self, position: i32, default: Number) -> Result<Number> {
        if self.is_none_or_nil(position) {
            Ok(default)
        } else {
            self.check_number(position)
        }
    }

    pub fn opt_string(&self, position: i32, default: &str) -> Result<String> {
        if self.is_none_or_nil(position) {
            Ok(default.to_string())
        } else {
            self.check_string(position)
        }
    }

    /// Index of the argument's value in `options`
    pub fn check_option(
        &self,
        position: i32,
        default: Option<&str>,
        options: &[&str],
    ) -> Result<usize> {
        let name = match default {
            Some(d) if self.is_none_or_nil(position) => d.to_string(),
            _ => self.check_string(position)?,
        };
        options
            .iter()
            .position(|o| *o == name)
            .ok_or_else(|| self.arg_error(position, format!("invalid option '{name}'")))
    }

    /// Grow the stack for a native function, failing with a runtime error
    pub fn ensure_stack(&self, extra: i32, message: &str) -> Result<()> {
        self.check_stack(extra)
            .map_err(|_| Error::Message(format!("stack overflow ({message})")))
    }

    // ----- metatables by name -----

    /// Create the registry metatable `name` and push it
    ///
    /// Returns false, pushing the existing table, if the name is taken.
    pub fn new_metatable(&self, name: &str) -> bool {
        self.raw_get_field(REGISTRY_INDEX, name);
        if !self.is_nil(-1) {
            return false;
        }
        self.pop(1);
        self.new_table();
        self.push_value(-1);
        self.raw_set_field(REGISTRY_INDEX, name);
        true
    }

    /// Push the registry metatable `name` (nil if there is none)
    pub fn get_named_metatable(&self, name: &str) {
        self.raw_get_field(REGISTRY_INDEX, name);
    }

    /// The userdata at `position` if its metatable is the registry's `name`
    pub fn test_userdata(&self, position: i32, name: &str) -> Option<*mut c_void> {
        if self.type_of(position) != Type::Userdata {
            return None;
        }
        if !self.get_metatable(position) {
            return None;
        }
        self.get_named_metatable(name);
        let matches = self.raw_equal(-1, -2);
        self.pop(2);
        matches.then(|| self.to_userdata(position).ok()).flatten()
    }

    pub fn check_userdata(&self, position: i32, name: &str) -> Result<*mut c_void> {
        self.test_userdata(position, name)
            .ok_or_else(|| self.type_error(position, name))
    }

    // ----- libraries -----

    /// Set each function into the table on top of the stack, without
    /// metamethods
    pub fn set_functions(&self, functions: &[(&str, CFunction)]) {
        debug_assert!(self.is_table(-1), "set_functions: top is not a table");
        for &(name, f) in functions {
            self.push_function(f);
            self.raw_set_field(-2, name);
        }
    }

    /// Push a new table holding `functions`
    pub fn new_lib(&self, functions: &[(&str, CFunction)]) {
        self.create_table(0, functions.len() as i32);
        self.set_functions(functions);
    }

    /// Register `functions` as the module `name` and leave its table on top
    ///
    /// Reuses `package.loaded[name]` or the global `name` when either is a
    /// table; otherwise creates the table and stores it in both places.
    /// Fails only if the globals table has metamethods that raise; the
    /// error object is then on top of the stack.
    pub fn register(&self, name: &str, functions: &[(&str, CFunction)]) -> Result<(), CallError> {
        debug_assert!(!name.contains('.'), "register: nested module names unsupported");
        let base = self.top();
        self.raw_get_field(REGISTRY_INDEX, LOADED);
        if !self.is_table(-1) {
            self.pop(1);
            self.new_table();
            self.push_value(-1);
            self.raw_set_field(REGISTRY_INDEX, LOADED);
        }
        self.raw_get_field(-1, name);
        if !self.is_table(-1) {
            self.pop(1);
            if let Err(e) = self.register_global(name, functions.len() as i32) {
                self.replace(base + 1);
                self.set_top(base + 1);
                return Err(e);
            }
            self.push_value(-1);
            self.raw_set_field(-3, name);
        }
        self.remove(-2);
        self.set_functions(functions);
        Ok(())
    }

    /// Push the global table `name`, creating it if needed
    fn register_global(&self, name: &str, nrec: i32) -> Result<(), CallError> {
        self.get_global(name)?;
        if !self.is_table(-1) {
            self.pop(1);
            self.create_table(0, nrec);
            self.push_value(-1);
            self.set_global(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lua;

    crate::native_fn! {
        fn double(state) {
            let n = state.check_integer(1)?;
            state.push_integer(n * 2);
            Ok(1)
        }
    }

    #[test]
    fn test_check_integer_accepts_numeric_strings() {
        let lua = Lua::new().unwrap();
        lua.push_str("21");
        assert_eq!(lua.check_integer(1).unwrap(), 21);
        lua.push_str("x");
        assert!(matches!(
            lua.check_integer(2),
            Err(Error::Argument { position: 2, .. })
        ));
    }

    #[test]
    fn test_opt_defaults() {
        let lua = Lua::new().unwrap();
        lua.push_nil();
        assert_eq!(lua.opt_integer(1, 5).unwrap(), 5);
        assert_eq!(lua.opt_number(2, 1.5).unwrap(), 1.5);
        assert_eq!(lua.opt_string(3, "x").unwrap(), "x");
    }

    #[test]
    fn test_check_option() {
        let lua = Lua::new().unwrap();
        lua.push_str("count");
        let options = ["collect", "count", "step"];
        assert_eq!(lua.check_option(1, None, &options).unwrap(), 1);
        assert_eq!(lua.check_option(2, Some("step"), &options).unwrap(), 2);
    }

    #[test]
    fn test_argument_error_message_from_script() {
        let lua = Lua::new().unwrap();
        lua.push_function(double);
        lua.set_global("double").unwrap();
        let err = lua.do_string("return double('x')").unwrap_err();
        assert!(matches!(err, Error::Call(_)));
        let message = lua.to_str(-1).unwrap();
        assert_eq!(
            message,
            "[string \"return double('x')\"]:1: bad argument #1 to 'double' (number expected, got string)"
        );
    }

    #[test]
    fn test_new_metatable_is_idempotent() {
        let lua = Lua::new().unwrap();
        assert!(lua.new_metatable("Point"));
        assert!(!lua.new_metatable("Point"));
        assert!(lua.raw_equal(-1, -2));
    }

    #[test]
    fn test_check_userdata_by_metatable() {
        let lua = Lua::new().unwrap();
        let p = lua.push_userdata(7u32);
        lua.new_metatable("Counter");
        lua.set_metatable(-2);
        assert_eq!(lua.check_userdata(-1, "Counter").unwrap() as *mut u32, p);
        assert!(lua.test_userdata(-1, "Other").is_none());
        assert_eq!(lua.top(), 1);
    }

    #[test]
    fn test_register_creates_global_module() {
        let lua = Lua::new().unwrap();
        lua.register("mathx", &[("double", double)]).unwrap();
        lua.pop(1);
        lua.do_string("result = mathx.double(4)").unwrap();
        lua.get_global("result").unwrap();
        assert_eq!(lua.to_integer(-1).unwrap(), 8);
    }
}
