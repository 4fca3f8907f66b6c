//! Activation records, locals, upvalues and hooks

use moonstack::sys;
use moonstack::{DebugInfo, HookEvent, HookMask, Lua, Selector, native_fn};
use serial_test::serial;
use std::cell::RefCell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

native_fn! {
    /// Report who called us and from where
    fn whereami(state) {
        let mut own = state.get_stack(0).expect("running function");
        state.get_info(Selector::new().name().source(), &mut own);
        let mut caller = state.get_stack(1).expect("calling chunk");
        state.get_info(Selector::new().source().line(), &mut caller);
        state.push_str(own.name().unwrap_or("?"));
        state.push_str(own.what());
        state.push_str(&caller.short_src());
        state.push_integer(caller.current_line().unwrap_or(-1) as isize);
        Ok(4)
    }
}

native_fn! {
    /// Name and value of the caller's first local
    fn first_local(state) {
        let caller = state.get_stack(1).expect("caller");
        match state.get_local(&caller, 1) {
            Some(name) => {
                state.push_str(&name);
                state.insert(-2);
                Ok(2)
            }
            None => Ok(0),
        }
    }
}

thread_local! {
    static KEPT: RefCell<Option<DebugInfo>> = const { RefCell::new(None) };
}

native_fn! {
    /// Keep the caller's activation record past the call
    fn keep_caller(state) {
        let caller = state.get_stack(1).expect("caller");
        assert!(state.get_local(&caller, 1).is_some());
        state.pop(1);
        KEPT.with(|kept| *kept.borrow_mut() = Some(caller));
        Ok(0)
    }
}

#[test]
fn test_info_for_native_and_script_frames() {
    let lua = Lua::new().unwrap();
    lua.push_function(whereami);
    lua.set_global("whereami").unwrap();
    lua.load_bytes(b"\n\nlocal a, b, c, d = whereami()\nreturn a, b, c, d", "=probe")
        .unwrap();
    lua.protected_call(0, 4, None).unwrap();
    assert_eq!(lua.to_str(1).unwrap(), "whereami");
    assert_eq!(lua.to_str(2).unwrap(), "C");
    assert_eq!(lua.to_str(3).unwrap(), "probe");
    assert_eq!(lua.to_integer(4).unwrap(), 3);
}

#[test]
fn test_reading_a_local() {
    let lua = Lua::new().unwrap();
    lua.push_function(first_local);
    lua.set_global("first_local").unwrap();
    assert_eq!(
        lua.do_string("local answer = 42\nlocal name, value = first_local()\nreturn name, value")
            .unwrap(),
        2
    );
    assert_eq!(lua.to_str(-2).unwrap(), "answer");
    assert_eq!(lua.to_integer(-1).unwrap(), 42);
}

#[test]
fn test_returned_activation_is_refused() {
    let lua = Lua::new().unwrap();
    lua.push_function(keep_caller);
    lua.set_global("keep_caller").unwrap();
    lua.do_string("local x = 1\nkeep_caller()").unwrap();
    let mut stale = KEPT.with(|kept| kept.borrow_mut().take()).unwrap();

    let top = lua.top();
    assert_eq!(lua.get_local(&stale, 1), None);
    assert!(!lua.get_info(Selector::new().source(), &mut stale));
    lua.push_integer(5);
    assert_eq!(lua.set_local(&stale, 1), None);
    assert_eq!(lua.top(), top);
}

#[test]
fn test_script_upvalues() {
    let lua = Lua::new().unwrap();
    lua.do_string("local secret = 9\nfunction peek() return secret end")
        .unwrap();
    lua.get_global("peek").unwrap();
    assert_eq!(lua.get_upvalue(-1, 1).as_deref(), Some("secret"));
    assert_eq!(lua.to_integer(-1).unwrap(), 9);
    lua.pop(1);
    assert_eq!(lua.get_upvalue(-1, 2), None);

    lua.push_integer(10);
    assert_eq!(lua.set_upvalue(-2, 1).as_deref(), Some("secret"));
    lua.protected_call(0, 1, None).unwrap();
    assert_eq!(lua.to_integer(-1).unwrap(), 10);
}

#[test]
fn test_function_info_lines() {
    let lua = Lua::new().unwrap();
    lua.do_string("\nfunction f()\n  return 1\nend").unwrap();
    lua.get_global("f").unwrap();
    let info = lua.function_info(-1, Selector::new().source()).unwrap();
    assert_eq!(info.what(), "Lua");
    assert_eq!(info.line_defined(), Some(2));
    assert_eq!(info.last_line_defined(), Some(4));
}

static COUNTED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C-unwind" fn count_hook(_l: *mut sys::lua_State, _ar: *mut sys::lua_Debug) {
    COUNTED.fetch_add(1, Ordering::Relaxed);
}

#[test]
#[serial]
fn test_count_hook_fires() {
    COUNTED.store(0, Ordering::Relaxed);
    let lua = Lua::new().unwrap();
    lua.set_hook(Some(count_hook), HookMask::COUNT, 1);
    lua.do_string("local s = 0 for i = 1, 100 do s = s + i end")
        .unwrap();
    lua.set_hook(None, HookMask::empty(), 0);
    assert!(COUNTED.load(Ordering::Relaxed) >= 100);

    let after = COUNTED.load(Ordering::Relaxed);
    lua.do_string("local s = 0 for i = 1, 100 do s = s + i end")
        .unwrap();
    assert_eq!(COUNTED.load(Ordering::Relaxed), after);
}

static LINES: Mutex<Vec<i32>> = Mutex::new(Vec::new());

unsafe extern "C-unwind" fn line_hook(_l: *mut sys::lua_State, ar: *mut sys::lua_Debug) {
    let info = unsafe { DebugInfo::from_raw(ar) };
    if info.event() == Some(HookEvent::Line) {
        if let (Some(line), Ok(mut lines)) = (info.current_line(), LINES.lock()) {
            lines.push(line);
        }
    }
}

#[test]
#[serial]
fn test_line_hook_sees_each_line() {
    LINES.lock().unwrap().clear();
    let lua = Lua::new().unwrap();
    lua.set_hook(Some(line_hook), HookMask::LINE, 0);
    lua.do_string("local a = 1\nlocal b = 2\nlocal c = a + b")
        .unwrap();
    lua.set_hook(None, HookMask::empty(), 0);
    assert_eq!(*LINES.lock().unwrap(), vec![1, 2, 3]);
}
