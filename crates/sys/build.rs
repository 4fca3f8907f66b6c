//! Builds the bundled Lua 5.1 runtime and tells cargo how to link it.

fn main() {
    let artifacts = lua_src::Build::new().build(lua_src::Lua51);
    artifacts.print_cargo_metadata();
}
