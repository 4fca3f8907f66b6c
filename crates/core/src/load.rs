//! Loading chunks and dumping functions
//!
//! Every source, in memory or not, is read through one pull-based reader over
//! [`std::io::Read`]. A successful load pushes the compiled chunk as a
//! function; a failed one pushes an error message and reports a [`LoadError`].
//!
//! Chunk names follow the runtime's conventions: `@path` for files, `=name`
//! for names printed verbatim, and anything else is shown as `[string "..."]`.

use crate::error::{Error, LoadError, Result, Status};
use crate::stack::MULTRET;
use crate::state::State;
use libc::{c_char, c_void, size_t};
use moonstack_sys as ffi;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;

const READ_BUFFER: usize = 4096;

struct ChunkReader<R> {
    inner: R,
    buffer: Vec<u8>,
    error: Option<io::Error>,
    panic: Option<Box<dyn std::any::Any + Send>>,
}

unsafe extern "C-unwind" fn read_chunk<R: Read>(
    _l: *mut ffi::lua_State,
    data: *mut c_void,
    size: *mut size_t,
) -> *const c_char {
    let reader = unsafe { &mut *(data as *mut ChunkReader<R>) };
    unsafe { *size = 0 };
    if reader.error.is_some() || reader.panic.is_some() {
        return ptr::null();
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        loop {
            match reader.inner.read(&mut reader.buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }));
    match outcome {
        Ok(Ok(n)) => {
            unsafe { *size = n };
            reader.buffer.as_ptr() as *const c_char
        }
        Ok(Err(e)) => {
            reader.error = Some(e);
            ptr::null()
        }
        Err(payload) => {
            reader.panic = Some(payload);
            ptr::null()
        }
    }
}

unsafe extern "C-unwind" fn write_chunk(
    _l: *mut ffi::lua_State,
    p: *const c_void,
    size: size_t,
    data: *mut c_void,
) -> i32 {
    let out = unsafe { &mut *(data as *mut Vec<u8>) };
    if size > 0 {
        out.extend_from_slice(unsafe { std::slice::from_raw_parts(p as *const u8, size) });
    }
    0
}

/// Turn a name into a C string, dropping interior zeros
fn chunk_name(name: &str) -> CString {
    CString::new(name.replace('\0', "")).unwrap_or_default()
}

impl State {
    /// Load a chunk from any reader
    pub fn load_reader<R: Read>(&self, reader: R, name: &str) -> Result<(), LoadError> {
        let mut source = ChunkReader {
            inner: reader,
            buffer: vec![0; READ_BUFFER],
            error: None,
            panic: None,
        };
        let name = chunk_name(name);
        let code = unsafe {
            ffi::lua_load(
                self.as_ptr(),
                read_chunk::<R>,
                &mut source as *mut ChunkReader<R> as *mut c_void,
                name.as_ptr(),
            )
        };
        if let Some(payload) = source.panic.take() {
            self.pop(1);
            panic::resume_unwind(payload);
        }
        if let Some(e) = source.error.take() {
            self.pop(1);
            let shown = name.to_string_lossy();
            let shown = shown.strip_prefix('@').unwrap_or(&shown);
            self.push_str(&format!("cannot read {shown}: {e}"));
            tracing::debug!(chunk = %shown, error = %e, "chunk read failed");
            return Err(LoadError::FileOpenOrRead);
        }
        match Status::from_raw(code) {
            Status::Ok => Ok(()),
            status => {
                let err = LoadError::from_status(status);
                tracing::debug!(
                    chunk = %name.to_string_lossy(),
                    error = %err,
                    message = %self.coerce_string(-1),
                    "chunk failed to load"
                );
                Err(err)
            }
        }
    }

    /// Load a chunk (source text or precompiled) from memory
    pub fn load_bytes(&self, bytes: &[u8], name: &str) -> Result<(), LoadError> {
        self.load_reader(bytes, name)
    }

    /// Load source text, named after itself
    pub fn load_string(&self, source: &str) -> Result<(), LoadError> {
        self.load_bytes(source.as_bytes(), source)
    }

    /// Load a file, skipping a first line that starts with `#`
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                self.push_str(&format!("cannot open {shown}: {e}"));
                tracing::debug!(path = %shown, error = %e, "cannot open chunk file");
                return Err(LoadError::FileOpenOrRead);
            }
        };
        let mut reader = BufReader::new(file);
        let name = format!("@{shown}");
        let shebang = match reader.fill_buf() {
            Ok(head) => head.first() == Some(&b'#'),
            Err(e) => {
                self.push_str(&format!("cannot read {shown}: {e}"));
                return Err(LoadError::FileOpenOrRead);
            }
        };
        if !shebang {
            return self.load_reader(reader, &name);
        }
        let mut skipped = Vec::new();
        if let Err(e) = reader.read_until(b'\n', &mut skipped) {
            self.push_str(&format!("cannot read {shown}: {e}"));
            return Err(LoadError::FileOpenOrRead);
        }
        // Keep line numbers: the skipped line still counts.
        self.load_reader(io::Cursor::new(b"\n").chain(reader), &name)
    }

    /// Serialise the function on top of the stack as a binary chunk
    ///
    /// Only functions written in the runtime's language can be dumped. The
    /// format is specific to this runtime version and build.
    pub fn dump(&self) -> Result<Vec<u8>> {
        debug_assert!(self.is_function(-1), "dump: top is not a function");
        let mut out = Vec::new();
        let code = unsafe {
            ffi::lua_dump(
                self.as_ptr(),
                write_chunk,
                &mut out as *mut Vec<u8> as *mut c_void,
            )
        };
        if code != 0 {
            return Err(Error::Message("unable to dump given function".into()));
        }
        Ok(out)
    }

    /// Load and run source text, returning the number of results it left
    pub fn do_string(&self, source: &str) -> Result<i32> {
        let base = self.top();
        self.load_string(source)?;
        self.protected_call(0, MULTRET, None)?;
        Ok(self.top() - base)
    }

    /// Load and run a file, returning the number of results it left
    pub fn do_file(&self, path: impl AsRef<Path>) -> Result<i32> {
        let base = self.top();
        self.load_file(path)?;
        self.protected_call(0, MULTRET, None)?;
        Ok(self.top() - base)
    }
}
