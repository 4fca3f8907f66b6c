//! Allocator context, memory limits and configuration

use moonstack::{AllocatorContext, CallError, Config, Error, GcOption, Lua, Status};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_memory_limit_surfaces_as_out_of_memory() {
    init_logging();
    let lua = Lua::new().unwrap();
    let base = lua.memory_stats().in_use;
    lua.set_memory_limit(Some(base + 256 * 1024));

    let err = lua
        .do_string("local t = {} for i = 1, 1e7 do t[i] = i end")
        .unwrap_err();
    assert!(matches!(err, Error::Call(CallError::OutOfMemory)));
    assert_eq!(lua.top(), 1);
    assert_eq!(lua.to_str(-1).unwrap(), "not enough memory");
    assert!(lua.memory_stats().refused > 0);

    // A failed protected call does not change the thread status; the call's
    // own result is the only record of the failure.
    assert_eq!(lua.status(), Status::Ok);

    lua.set_memory_limit(None);
    lua.pop(1);
    lua.gc(GcOption::Collect);
    assert_eq!(lua.do_string("return 1 + 1").unwrap(), 1);
}

#[test]
fn test_limit_never_blocks_freeing() {
    let lua = Lua::new().unwrap();
    lua.do_string("big = string.rep('x', 100000)").unwrap();
    let used = lua.memory_stats().in_use;
    lua.set_memory_limit(Some(used / 2));
    lua.push_nil();
    lua.set_global("big").unwrap();
    lua.gc(GcOption::Collect);
    assert!(lua.memory_stats().in_use < used);
}

static CUSTOM_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

struct Counting;

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        CUSTOM_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        CUSTOM_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[test]
fn test_custom_allocator_is_used() {
    let before = CUSTOM_ALLOCATIONS.load(Ordering::Relaxed);
    let context = AllocatorContext::new(Box::new(Counting));
    let lua = Lua::with_allocator(context, &Config::new()).unwrap();
    lua.do_string("local t = {} for i = 1, 100 do t[i] = tostring(i) end")
        .unwrap();
    assert!(CUSTOM_ALLOCATIONS.load(Ordering::Relaxed) > before);
    drop(lua);
}

#[test]
fn test_config_from_toml() {
    let config = Config::from_toml_str(
        "open_stdlib = false\n\
         stack_reserve = 50\n\
         gc_pause = 150\n",
    )
    .unwrap();
    let lua = Lua::with_config(&config).unwrap();
    lua.get_global("string").unwrap();
    assert!(lua.is_nil(-1));
    assert_eq!(lua.gc(GcOption::SetPause(200)), 150);
}

#[test]
fn test_memory_limit_from_config() {
    let lua = Lua::with_config(&Config::new().with_memory_limit(64 * 1024 * 1024)).unwrap();
    assert_eq!(lua.allocator().limit(), Some(64 * 1024 * 1024));
    let stats = lua.memory_stats();
    assert!(stats.peak >= stats.in_use);
    assert!(stats.allocations > 0);
}
