//! Host-driven coroutines

use moonstack::{CallError, CoroutineStatus, Lua, Resumed, Status, native_fn};

native_fn! {
    /// Yield every argument to the host
    fn pause(state) {
        Ok(unsafe { state.yield_now(state.top()) })
    }
}

#[test]
fn test_script_generator() {
    let lua = Lua::new().unwrap();
    lua.do_string(
        "function gen(n)
            for i = 1, n do coroutine.yield(i) end
            return 'done'
        end",
    )
    .unwrap();

    let co = lua.new_thread();
    co.get_global("gen").unwrap();
    co.push_integer(3);
    assert_eq!(lua.coroutine_status(co), CoroutineStatus::Suspended);

    let mut yielded = Vec::new();
    let mut nargs = 1;
    loop {
        match co.resume(nargs).unwrap() {
            Resumed::Yielded => {
                assert_eq!(co.status(), Status::Yield);
                assert_eq!(lua.coroutine_status(co), CoroutineStatus::Suspended);
                yielded.push(co.to_integer(-1).unwrap());
                co.set_top(0);
                nargs = 0;
            }
            Resumed::Finished => break,
        }
    }
    assert_eq!(yielded, vec![1, 2, 3]);
    assert_eq!(co.to_str(-1).unwrap(), "done");
    co.set_top(0);
    assert_eq!(lua.coroutine_status(co), CoroutineStatus::Dead);
}

#[test]
fn test_native_yield_receives_resume_arguments() {
    let lua = Lua::new().unwrap();
    lua.push_function(pause);
    lua.set_global("pause").unwrap();
    lua.do_string("function worker() local x = pause(10) return x * 2 end")
        .unwrap();

    let co = lua.new_thread();
    co.get_global("worker").unwrap();
    assert_eq!(co.resume(0).unwrap(), Resumed::Yielded);
    assert_eq!(co.top(), 1);
    assert_eq!(co.to_integer(-1).unwrap(), 10);

    co.set_top(0);
    co.push_integer(21);
    assert_eq!(co.resume(1).unwrap(), Resumed::Finished);
    assert_eq!(co.to_integer(-1).unwrap(), 42);
}

#[test]
fn test_error_kills_coroutine() {
    let lua = Lua::new().unwrap();
    let co = lua.new_thread();
    co.load_string("error('inside')").unwrap();
    assert_eq!(co.resume(0), Err(CallError::Runtime));
    assert!(co.to_str(-1).unwrap().ends_with("inside"));
    assert_eq!(co.status(), Status::RuntimeError);
    assert_eq!(lua.coroutine_status(co), CoroutineStatus::Dead);
}

#[test]
fn test_running_and_normal_status() {
    native_fn! {
        fn probe(state) {
            // The main thread is the only argument.
            let host = state.to_thread(1)?;
            let own = state.coroutine_status(state);
            let seen_from_host = host.coroutine_status(state);
            state.push_str(&own.to_string());
            state.push_str(&seen_from_host.to_string());
            Ok(2)
        }
    }

    let lua = Lua::new().unwrap();
    let co = lua.new_thread();
    co.push_function(probe);
    lua.push_thread();
    lua.xmove(co, 1);
    assert_eq!(co.resume(1).unwrap(), Resumed::Finished);
    assert_eq!(co.to_str(-2).unwrap(), "running");
    assert_eq!(co.to_str(-1).unwrap(), "normal");
}

#[test]
fn test_finished_coroutine_holding_results_stays_dead() {
    let lua = Lua::new().unwrap();
    let co = lua.new_thread();
    co.load_string("return function() return 99 end").unwrap();
    assert_eq!(co.resume(0).unwrap(), Resumed::Finished);
    assert_eq!(co.top(), 1);
    assert!(co.is_function(-1));
    assert_eq!(lua.coroutine_status(co), CoroutineStatus::Dead);

    assert_eq!(co.resume(0), Err(CallError::Runtime));
    assert_eq!(co.to_str(-1).unwrap(), "cannot resume dead coroutine");
    assert_eq!(co.top(), 2);
}
