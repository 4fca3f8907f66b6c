//! Incremental string building
//!
//! A [`Buffer`] collects bytes in a fixed-size scratch chunk. Each time the
//! chunk fills up it is pushed onto the stack as a partial string, and
//! partials are merged as they accumulate, so building a string of any length
//! uses a bounded number of stack slots.
//!
//! While a buffer is open its partials occupy the top of the stack. Code
//! using the buffer must leave the stack balanced between calls: push a value
//! only to hand it to [`Buffer::add_value`].

use crate::state::State;

/// Size of the scratch chunk
pub const CHUNK_SIZE: usize = 1024;

/// Partials allowed on the stack before they are merged regardless of size
const MAX_PARTIALS: i32 = 10;

/// String builder backed by the stack of one context
pub struct Buffer<'a> {
    state: &'a State,
    chunk: Vec<u8>,
    /// Partial strings on the stack
    level: i32,
    /// `prep_buffer` handed out the chunk and `add_size` has not run yet
    prepared: bool,
    finished: bool,
}

impl<'a> Buffer<'a> {
    pub fn new(state: &'a State) -> Self {
        Buffer {
            state,
            chunk: Vec::with_capacity(CHUNK_SIZE),
            level: 0,
            prepared: false,
            finished: false,
        }
    }

    pub fn add_char(&mut self, c: u8) {
        debug_assert!(!self.prepared, "add_char: pending prep_buffer");
        if self.chunk.len() == CHUNK_SIZE {
            self.flush();
        }
        self.chunk.push(c);
    }

    pub fn add_bytes(&mut self, mut bytes: &[u8]) {
        debug_assert!(!self.prepared, "add_bytes: pending prep_buffer");
        while !bytes.is_empty() {
            if self.chunk.len() == CHUNK_SIZE {
                self.flush();
            }
            let room = CHUNK_SIZE - self.chunk.len();
            let (head, tail) = bytes.split_at(room.min(bytes.len()));
            self.chunk.extend_from_slice(head);
            bytes = tail;
        }
    }

    pub fn add_str(&mut self, s: &str) {
        self.add_bytes(s.as_bytes());
    }

    /// A writable area of [`CHUNK_SIZE`] bytes; commit with
    /// [`add_size`](Self::add_size)
    pub fn prep_buffer(&mut self) -> &mut [u8] {
        debug_assert!(!self.prepared, "prep_buffer: pending prep_buffer");
        self.flush();
        self.chunk.resize(CHUNK_SIZE, 0);
        self.prepared = true;
        &mut self.chunk[..]
    }

    /// Commit the first `n` bytes written into the area from
    /// [`prep_buffer`](Self::prep_buffer)
    pub fn add_size(&mut self, n: usize) {
        debug_assert!(self.prepared, "add_size: no prep_buffer");
        debug_assert!(n <= CHUNK_SIZE, "add_size: {n} exceeds the chunk");
        self.chunk.truncate(n.min(CHUNK_SIZE));
        self.prepared = false;
    }

    /// Pop the value on top of the stack and append it as a string
    ///
    /// The value must be a string or a number.
    pub fn add_value(&mut self) {
        debug_assert!(!self.prepared, "add_value: pending prep_buffer");
        debug_assert!(
            self.state.is_string(-1),
            "add_value: top is a {}",
            self.state.type_name(-1)
        );
        let len = self.state.raw_len(-1);
        if self.chunk.len() + len <= CHUNK_SIZE {
            let bytes = self.state.coerce_bytes(-1);
            self.chunk.extend_from_slice(&bytes);
            self.state.pop(1);
        } else {
            // The value becomes a partial of its own, above the chunk.
            if self.push_chunk() {
                self.state.insert(-2);
            }
            self.level += 1;
            self.adjust_stack();
        }
    }

    /// Finish: replace the partials with the complete string
    pub fn push_result(mut self) {
        debug_assert!(!self.prepared, "push_result: pending prep_buffer");
        self.push_chunk();
        // SAFETY: every partial is a string.
        unsafe { self.state.concat_unprotected(self.level) };
        self.level = 1;
        self.finished = true;
    }

    /// Number of partial strings currently on the stack
    pub fn partials(&self) -> i32 {
        self.level
    }

    fn flush(&mut self) {
        if self.push_chunk() {
            self.adjust_stack();
        }
    }

    fn push_chunk(&mut self) -> bool {
        if self.chunk.is_empty() {
            return false;
        }
        self.state.push_bytes(&self.chunk);
        self.chunk.clear();
        self.level += 1;
        true
    }

    /// Merge partials while the top one is longer than the one below, or
    /// while there are too many of them
    fn adjust_stack(&mut self) {
        if self.level <= 1 {
            return;
        }
        let mut count = 1;
        let mut top_len = self.state.raw_len(-1);
        loop {
            let len = self.state.raw_len(-(count + 1));
            if self.level - count + 1 >= MAX_PARTIALS || top_len > len {
                top_len += len;
                count += 1;
            } else {
                break;
            }
            if count >= self.level {
                break;
            }
        }
        // SAFETY: every partial is a string.
        unsafe { self.state.concat_unprotected(count) };
        self.level = self.level - count + 1;
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        if !self.finished && self.level > 0 {
            self.state.pop(self.level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lua;

    #[test]
    fn test_empty_buffer_pushes_empty_string() {
        let lua = Lua::new().unwrap();
        Buffer::new(&lua).push_result();
        assert_eq!(lua.top(), 1);
        assert_eq!(lua.to_bytes(-1).unwrap(), b"");
    }

    #[test]
    fn test_small_pieces() {
        let lua = Lua::new().unwrap();
        let mut b = Buffer::new(&lua);
        b.add_str("hello");
        b.add_char(b',');
        b.add_char(b' ');
        lua.push_integer(42);
        b.add_value();
        assert_eq!(b.partials(), 0);
        b.push_result();
        assert_eq!(lua.to_str(-1).unwrap(), "hello, 42");
    }

    #[test]
    fn test_partials_stay_bounded() {
        let lua = Lua::new().unwrap();
        let mut b = Buffer::new(&lua);
        let mut expected = Vec::new();
        for i in 0..(CHUNK_SIZE * 40) {
            let c = b'a' + (i % 26) as u8;
            b.add_char(c);
            expected.push(c);
            assert!(b.partials() <= MAX_PARTIALS);
        }
        b.push_result();
        assert_eq!(lua.top(), 1);
        assert_eq!(lua.to_bytes(-1).unwrap(), expected);
    }

    #[test]
    fn test_prep_buffer_and_add_size() {
        let lua = Lua::new().unwrap();
        let mut b = Buffer::new(&lua);
        b.add_str("ab");
        let area = b.prep_buffer();
        assert_eq!(area.len(), CHUNK_SIZE);
        area[..3].copy_from_slice(b"cde");
        b.add_size(3);
        b.push_result();
        assert_eq!(lua.to_str(-1).unwrap(), "abcde");
    }

    #[test]
    fn test_large_value_becomes_partial() {
        let lua = Lua::new().unwrap();
        let big = "x".repeat(CHUNK_SIZE * 2);
        let mut b = Buffer::new(&lua);
        b.add_str("<");
        lua.push_str(&big);
        b.add_value();
        b.add_str(">");
        b.push_result();
        assert_eq!(lua.top(), 1);
        assert_eq!(lua.to_str(-1).unwrap(), format!("<{big}>"));
    }

    #[test]
    fn test_dropped_buffer_cleans_up() {
        let lua = Lua::new().unwrap();
        lua.push_nil();
        {
            let mut b = Buffer::new(&lua);
            b.add_bytes(&vec![b'z'; CHUNK_SIZE * 3]);
        }
        assert_eq!(lua.top(), 1);
    }
}
