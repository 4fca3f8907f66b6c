//! Introspection of active functions
//!
//! Activation records are obtained by level with [`State::get_stack`] (level 0
//! is the running function, 1 its caller, and so on) and filled on demand with
//! [`State::get_info`]. A [`Selector`] says which fields to fill.
//!
//! String fields are copied out of the runtime when `get_info` returns, so a
//! [`DebugInfo`] stays readable after the function it describes is gone.
//! Operations that go back to the activation itself (`get_info` without
//! [`Selector::from_stack`], `get_local`, `set_local`) first check that the
//! record's frame is still live at its level and refuse a stale record.

use crate::state::State;
use libc::c_char;
use moonstack_sys as ffi;
use std::ffi::{CStr, CString};
use std::fmt::Write;
use std::ops::BitOr;
use std::os::raw::c_int;

/// Hook callback installed with [`State::set_hook`]
///
/// Receives the thread and the activation record of the event; wrap the
/// record with [`DebugInfo::from_raw`] to inspect it.
pub type Hook = ffi::lua_Hook;

/// Events a hook is called for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HookMask(c_int);

impl HookMask {
    pub const CALL: HookMask = HookMask(ffi::LUA_MASKCALL);
    pub const RETURN: HookMask = HookMask(ffi::LUA_MASKRET);
    pub const LINE: HookMask = HookMask(ffi::LUA_MASKLINE);
    /// Every `count` instructions
    pub const COUNT: HookMask = HookMask(ffi::LUA_MASKCOUNT);

    pub const fn empty() -> HookMask {
        HookMask(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: HookMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> c_int {
        self.0
    }
}

impl BitOr for HookMask {
    type Output = HookMask;

    fn bitor(self, rhs: HookMask) -> HookMask {
        HookMask(self.0 | rhs.0)
    }
}

/// The event that triggered a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
    Line,
    Count,
    /// Return from a function that made a tail call
    TailReturn,
}

/// Which fields [`State::get_info`] fills
///
/// Renders to the runtime's option string (`"nSl"`, `">f"`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selector {
    from_stack: bool,
    name: bool,
    source: bool,
    line: bool,
    upvalues: bool,
    function: bool,
    valid_lines: bool,
}

impl Selector {
    pub const fn new() -> Self {
        Selector {
            from_stack: false,
            name: false,
            source: false,
            line: false,
            upvalues: false,
            function: false,
            valid_lines: false,
        }
    }

    /// Describe the function on top of the stack instead of an activation
    /// record; the function is popped (`>`)
    pub const fn from_stack(mut self) -> Self {
        self.from_stack = true;
        self
    }

    /// `name` and `namewhat` (`n`)
    pub const fn name(mut self) -> Self {
        self.name = true;
        self
    }

    /// `source`, `short_src`, `what` and the defining lines (`S`)
    pub const fn source(mut self) -> Self {
        self.source = true;
        self
    }

    /// `currentline` (`l`)
    pub const fn line(mut self) -> Self {
        self.line = true;
        self
    }

    /// `nups` (`u`)
    pub const fn upvalues(mut self) -> Self {
        self.upvalues = true;
        self
    }

    /// Push the function itself (`f`)
    pub const fn function(mut self) -> Self {
        self.function = true;
        self
    }

    /// Push a table whose keys are the lines holding code (`L`)
    pub const fn valid_lines(mut self) -> Self {
        self.valid_lines = true;
        self
    }

    /// Number of values `get_info` pushes with this selector
    pub fn pushes(&self) -> i32 {
        i32::from(self.function) + i32::from(self.valid_lines)
    }

    pub fn render(&self) -> String {
        let flags = [
            (self.from_stack, '>'),
            (self.name, 'n'),
            (self.source, 'S'),
            (self.line, 'l'),
            (self.upvalues, 'u'),
            (self.function, 'f'),
            (self.valid_lines, 'L'),
        ];
        flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, c)| *c)
            .collect()
    }
}

/// An activation record and the fields filled into it so far
#[derive(Clone)]
pub struct DebugInfo {
    raw: ffi::lua_Debug,
    level: Option<i32>,
    name: Option<String>,
    name_what: String,
    what: String,
    source: Option<String>,
}

impl Default for DebugInfo {
    fn default() -> Self {
        DebugInfo {
            raw: ffi::lua_Debug::default(),
            level: None,
            name: None,
            name_what: String::new(),
            what: String::new(),
            source: None,
        }
    }
}

impl std::fmt::Debug for DebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugInfo")
            .field("name", &self.name)
            .field("name_what", &self.name_what)
            .field("what", &self.what)
            .field("short_src", &self.short_src())
            .field("current_line", &self.current_line())
            .finish()
    }
}

impl DebugInfo {
    /// Copy the record a hook was called with
    ///
    /// # Safety
    /// `ar` must be the record passed to the hook currently running.
    pub unsafe fn from_raw(ar: *const ffi::lua_Debug) -> DebugInfo {
        let mut raw = unsafe { *ar };
        // Only the event, line and activation are set before a hook runs.
        raw.name = std::ptr::null();
        raw.namewhat = std::ptr::null();
        raw.what = std::ptr::null();
        raw.source = std::ptr::null();
        raw.short_src = [0; ffi::LUA_IDSIZE];
        // A hook runs on top of the frame that triggered it.
        DebugInfo {
            raw,
            level: Some(0),
            ..DebugInfo::default()
        }
    }

    fn capture_strings(&mut self) {
        self.name = owned(self.raw.name);
        self.name_what = owned(self.raw.namewhat).unwrap_or_default();
        self.what = owned(self.raw.what).unwrap_or_default();
        self.source = owned(self.raw.source);
    }

    /// The event of a hook record
    pub fn event(&self) -> Option<HookEvent> {
        match self.raw.event {
            ffi::LUA_HOOKCALL => Some(HookEvent::Call),
            ffi::LUA_HOOKRET => Some(HookEvent::Return),
            ffi::LUA_HOOKLINE => Some(HookEvent::Line),
            ffi::LUA_HOOKCOUNT => Some(HookEvent::Count),
            ffi::LUA_HOOKTAILRET => Some(HookEvent::TailReturn),
            _ => None,
        }
    }

    /// A reasonable name for the function, if one was found
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// How the name was found: `global`, `local`, `method`, `field`,
    /// `upvalue` or empty
    pub fn name_what(&self) -> &str {
        &self.name_what
    }

    /// `Lua`, `C`, `main` or `tail`
    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Printable version of `source`, for messages
    pub fn short_src(&self) -> String {
        let bytes: Vec<u8> = self
            .raw
            .short_src
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Line being executed; `None` when unknown (native functions)
    pub fn current_line(&self) -> Option<i32> {
        (self.raw.currentline > 0).then_some(self.raw.currentline)
    }

    pub fn upvalue_count(&self) -> i32 {
        self.raw.nups
    }

    pub fn line_defined(&self) -> Option<i32> {
        (self.raw.linedefined > 0).then_some(self.raw.linedefined)
    }

    pub fn last_line_defined(&self) -> Option<i32> {
        (self.raw.lastlinedefined > 0).then_some(self.raw.lastlinedefined)
    }
}

fn owned(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
    }
}

const TRACEBACK_HEAD: i32 = 12;
const TRACEBACK_TAIL: i32 = 10;

impl State {
    /// The activation record at `level`, or `None` past the deepest level
    pub fn get_stack(&self, level: i32) -> Option<DebugInfo> {
        debug_assert!(level >= 0, "get_stack: negative level");
        let mut info = DebugInfo::default();
        let found = unsafe { ffi::lua_getstack(self.as_ptr(), level, &mut info.raw) };
        if found == 0 {
            return None;
        }
        info.level = Some(level);
        Some(info)
    }

    /// Whether `info` still describes the activation at its level
    fn is_live(&self, info: &DebugInfo) -> bool {
        let Some(level) = info.level else {
            return false;
        };
        let mut current = ffi::lua_Debug::default();
        (unsafe { ffi::lua_getstack(self.as_ptr(), level, &mut current) }) != 0
            && current.activation() == info.raw.activation()
    }

    /// Fill the fields named by `selector`
    ///
    /// Without [`Selector::from_stack`], `info` must come from
    /// [`get_stack`](Self::get_stack) or a hook, and its frame must still be
    /// running. Returns false on an invalid selector or a stale record; the
    /// record's contents are then unspecified.
    pub fn get_info(&self, selector: Selector, info: &mut DebugInfo) -> bool {
        if selector.from_stack {
            debug_assert!(self.is_function(-1), "get_info: top is not a function");
        } else if !self.is_live(info) {
            return false;
        }
        let what = match CString::new(selector.render()) {
            Ok(what) => what,
            Err(_) => return false,
        };
        let ok = unsafe { ffi::lua_getinfo(self.as_ptr(), what.as_ptr(), &mut info.raw) } != 0;
        if ok {
            info.capture_strings();
        }
        ok
    }

    /// Describe the function at `index` without disturbing the stack
    /// (apart from what the selector pushes)
    pub fn function_info(&self, index: i32, selector: Selector) -> Option<DebugInfo> {
        debug_assert!(self.is_function(index), "function_info: not a function");
        self.push_value(index);
        let mut info = DebugInfo::default();
        self.get_info(selector.from_stack(), &mut info).then_some(info)
    }

    /// Push local `n` (1-based) of an activation and return its name
    ///
    /// Pushes nothing and returns `None` when there is no such local or the
    /// activation has returned.
    pub fn get_local(&self, info: &DebugInfo, n: i32) -> Option<String> {
        if !self.is_live(info) {
            return None;
        }
        owned(unsafe { ffi::lua_getlocal(self.as_ptr(), &info.raw, n) })
    }

    /// Pop a value into local `n` of an activation and return its name
    ///
    /// Pops the value even when there is no such local or the activation has
    /// returned.
    pub fn set_local(&self, info: &DebugInfo, n: i32) -> Option<String> {
        if !self.is_live(info) {
            self.pop(1);
            return None;
        }
        let name = owned(unsafe { ffi::lua_setlocal(self.as_ptr(), &info.raw, n) });
        if name.is_none() {
            self.pop(1);
        }
        name
    }

    /// Push upvalue `n` of the function at `index` and return its name
    ///
    /// Upvalues of native functions have an empty name.
    pub fn get_upvalue(&self, index: i32, n: i32) -> Option<String> {
        self.check_index(index);
        owned(unsafe { ffi::lua_getupvalue(self.as_ptr(), index, n) })
    }

    /// Pop a value into upvalue `n` of the function at `index`
    ///
    /// Pops the value even when there is no such upvalue.
    pub fn set_upvalue(&self, index: i32, n: i32) -> Option<String> {
        let index = self.abs_index(index);
        self.check_index(index);
        let name = owned(unsafe { ffi::lua_setupvalue(self.as_ptr(), index, n) });
        if name.is_none() {
            self.pop(1);
        }
        name
    }

    /// Install `hook` for the events in `mask`, or remove it
    ///
    /// Hooks belong to one thread. An empty mask or `None` disables hooking.
    pub fn set_hook(&self, hook: Option<Hook>, mask: HookMask, count: i32) {
        debug_assert!(
            !mask.contains(HookMask::COUNT) || count > 0,
            "set_hook: count hook needs a positive count"
        );
        unsafe { ffi::lua_sethook(self.as_ptr(), hook, mask.bits(), count) };
    }

    pub fn hook(&self) -> Option<Hook> {
        unsafe { ffi::lua_gethook(self.as_ptr()) }
    }

    pub fn hook_mask(&self) -> HookMask {
        HookMask(unsafe { ffi::lua_gethookmask(self.as_ptr()) })
    }

    pub fn hook_count(&self) -> i32 {
        unsafe { ffi::lua_gethookcount(self.as_ptr()) }
    }

    /// Render the call stack from `level` upwards
    ///
    /// Long stacks keep the first and last frames and elide the middle.
    pub fn traceback(&self, level: i32) -> String {
        let mut out = String::from("stack traceback:");
        let mut level = level;
        let mut first_part = true;
        let selector = Selector::new().name().source().line();
        while let Some(mut info) = self.get_stack(level) {
            level += 1;
            if level > TRACEBACK_HEAD && first_part {
                if self.get_stack(level + TRACEBACK_TAIL).is_none() {
                    first_part = false;
                } else {
                    out.push_str("\n\t...");
                    while self.get_stack(level + TRACEBACK_TAIL).is_some() {
                        level += 1;
                    }
                }
                continue;
            }
            if !self.get_info(selector, &mut info) {
                break;
            }
            let _ = write!(out, "\n\t{}:", info.short_src());
            if let Some(line) = info.current_line() {
                let _ = write!(out, "{line}:");
            }
            if !info.name_what().is_empty() {
                let _ = write!(out, " in function '{}'", info.name().unwrap_or("?"));
            } else if info.what() == "main" {
                out.push_str(" in main chunk");
            } else if info.what() == "C" || info.what() == "tail" {
                out.push_str(" ?");
            } else {
                let _ = write!(
                    out,
                    " in function <{}:{}>",
                    info.short_src(),
                    info.line_defined().unwrap_or(0)
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lua;

    #[test]
    fn test_selector_render() {
        assert_eq!(Selector::new().render(), "");
        assert_eq!(Selector::new().name().source().line().render(), "nSl");
        assert_eq!(Selector::new().function().from_stack().render(), ">f");
        assert_eq!(Selector::new().function().valid_lines().pushes(), 2);
    }

    #[test]
    fn test_hook_mask() {
        let mask = HookMask::CALL | HookMask::LINE;
        assert!(mask.contains(HookMask::CALL));
        assert!(!mask.contains(HookMask::COUNT));
        assert!(HookMask::empty().is_empty());
    }

    #[test]
    fn test_no_activation_outside_calls() {
        let lua = Lua::new().unwrap();
        assert!(lua.get_stack(0).is_none());
        assert_eq!(lua.traceback(0), "stack traceback:");
    }

    #[test]
    fn test_function_info_of_native_function() {
        crate::native_fn! {
            fn noop(state) {
                let _ = state;
                Ok(0)
            }
        }
        let lua = Lua::new().unwrap();
        lua.push_function(noop);
        let info = lua
            .function_info(-1, Selector::new().source().upvalues())
            .unwrap();
        assert_eq!(info.what(), "C");
        assert_eq!(info.short_src(), "[C]");
        assert_eq!(info.current_line(), None);
        assert_eq!(info.upvalue_count(), 0);
        assert_eq!(lua.top(), 1);
    }

    #[test]
    fn test_hook_state_round_trip() {
        unsafe extern "C-unwind" fn hook(_l: *mut ffi::lua_State, _ar: *mut ffi::lua_Debug) {}
        let lua = Lua::new().unwrap();
        assert!(lua.hook().is_none());
        lua.set_hook(Some(hook), HookMask::COUNT, 100);
        assert!(lua.hook().is_some());
        assert_eq!(lua.hook_mask(), HookMask::COUNT);
        assert_eq!(lua.hook_count(), 100);
        lua.set_hook(None, HookMask::empty(), 0);
        assert!(lua.hook().is_none());
    }
}
