//! Durable handles to values
//!
//! [`State::reference`] stores the top value in a table under a fresh integer
//! key and returns that key as a [`Reference`]. Keys freed by
//! [`State::unreference`] are recycled through a free list kept at key `0` of
//! the same table, so the layout is interchangeable with `luaL_ref` and
//! `luaL_unref`.
//!
//! Usually the table is the registry:
//!
//! ```rust,ignore
//! lua.new_table();
//! let r = lua.reference(REGISTRY_INDEX);
//! // ... later, from anywhere ...
//! lua.push_reference(REGISTRY_INDEX, r);
//! lua.unreference(REGISTRY_INDEX, r);
//! ```

use crate::state::State;
use moonstack_sys as ffi;

/// Key of the free-list head
const FREE_LIST: i32 = 0;

/// Integer key of a value stored with [`State::reference`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference(i32);

impl Reference {
    /// Never refers to anything
    pub const NONE: Reference = Reference(ffi::LUA_NOREF);

    /// Stands for `nil`, which is never stored
    pub const NIL: Reference = Reference(ffi::LUA_REFNIL);

    /// Adopt a key produced by `luaL_ref`
    pub const fn from_raw(key: i32) -> Reference {
        Reference(key)
    }

    pub const fn key(self) -> i32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == ffi::LUA_NOREF
    }

    pub const fn is_nil(self) -> bool {
        self.0 == ffi::LUA_REFNIL
    }

    /// Whether the reference names a stored value
    pub const fn is_stored(self) -> bool {
        self.0 > FREE_LIST
    }
}

impl State {
    /// Pop the top value and store it in the table at `table`
    ///
    /// `nil` is not stored; it yields [`Reference::NIL`].
    pub fn reference(&self, table: i32) -> Reference {
        let t = self.abs_index(table);
        debug_assert!(self.top() >= 1, "reference: no value to store");
        if self.is_nil(-1) {
            self.pop(1);
            return Reference::NIL;
        }
        self.raw_get_index(t, FREE_LIST);
        let free = self.coerce_integer(-1) as i32;
        self.pop(1);
        let key = if free != 0 {
            // Unlink the head of the free list.
            self.raw_get_index(t, free);
            self.raw_set_index(t, FREE_LIST);
            free
        } else {
            self.raw_len(t) as i32 + 1
        };
        self.raw_set_index(t, key);
        Reference(key)
    }

    /// Release `reference` and recycle its key
    ///
    /// Does nothing for [`Reference::NONE`] and [`Reference::NIL`].
    pub fn unreference(&self, table: i32, reference: Reference) {
        if !reference.is_stored() {
            return;
        }
        let t = self.abs_index(table);
        self.raw_get_index(t, FREE_LIST);
        self.raw_set_index(t, reference.key());
        self.push_integer(reference.key() as ffi::lua_Integer);
        self.raw_set_index(t, FREE_LIST);
    }

    /// Push the value stored under `reference` (nil for the sentinels)
    pub fn push_reference(&self, table: i32, reference: Reference) {
        if reference.is_stored() {
            self.raw_get_index(table, reference.key());
        } else {
            self.push_nil();
        }
    }
}
