//! Chunk loading from memory and files, and binary dumps

use moonstack::{Error, LoadError, Lua};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_dump_and_reload() {
    let lua = Lua::new().unwrap();
    lua.load_string("local a, b = ... return a * b + 1").unwrap();
    let chunk = lua.dump().unwrap();
    assert!(chunk.starts_with(b"\x1bLua"));
    lua.pop(1);

    lua.load_bytes(&chunk, "=dumped").unwrap();
    lua.push_integer(6);
    lua.push_integer(7);
    lua.protected_call(2, 1, None).unwrap();
    assert_eq!(lua.to_integer(-1).unwrap(), 43);
}

#[test]
fn test_shebang_line_is_skipped() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "#!/usr/bin/env lua\nlocal x = 5\nreturn x * 2\n").unwrap();

    let lua = Lua::new().unwrap();
    assert_eq!(lua.do_file(file.path()).unwrap(), 1);
    assert_eq!(lua.to_integer(-1).unwrap(), 10);
}

#[test]
fn test_shebang_keeps_line_numbers() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "#!/usr/bin/env lua\n\nerror('line three')\n").unwrap();

    let lua = Lua::new().unwrap();
    let err = lua.do_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Call(_)));
    let message = lua.to_str(-1).unwrap();
    assert!(message.ends_with(":3: line three"), "{message}");
}

#[test]
fn test_file_syntax_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "return = 1").unwrap();

    let lua = Lua::new().unwrap();
    assert_eq!(lua.load_file(file.path()), Err(LoadError::InvalidSyntax));
    assert_eq!(lua.top(), 1);
}

#[test]
fn test_unreadable_path_reports_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let lua = Lua::new().unwrap();
    let missing = dir.path().join("absent.lua");
    assert_eq!(lua.load_file(&missing), Err(LoadError::FileOpenOrRead));
    let message = lua.to_str(-1).unwrap();
    assert!(message.starts_with("cannot open "), "{message}");
}

#[test]
fn test_chunk_names() {
    let lua = Lua::new().unwrap();
    let _ = lua.load_bytes(b"x = = 1", "=config").unwrap_err();
    assert!(lua.to_str(-1).unwrap().starts_with("config:1:"));
    let _ = lua.load_bytes(b"x = = 1", "@scripts/init.lua").unwrap_err();
    assert!(lua.to_str(-1).unwrap().starts_with("scripts/init.lua:1:"));
}
