//! Instance configuration
//!
//! [`Config`] collects everything decided once, when a runtime instance is
//! created. It can be assembled in code with the builder methods or read from
//! a host configuration file.
//!
//! # Example
//!
//! ```rust,ignore
//! use moonstack::{Config, Lua};
//!
//! let config = Config::new()
//!     .with_memory_limit(16 * 1024 * 1024)
//!     .with_stack_reserve(64);
//! let lua = Lua::with_config(&config)?;
//! ```
//!
//! The same settings as TOML:
//!
//! ```toml
//! memory_limit = 16777216
//! stack_reserve = 64
//! open_stdlib = true
//! ```

use crate::call::CFunction;
use crate::error::{Error, Result};
use serde::Deserialize;

/// Settings applied by [`Lua::with_config`](crate::Lua::with_config)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upper bound, in bytes, on memory the runtime may hold
    ///
    /// Applied after the instance is created, so the base state always fits.
    pub memory_limit: Option<usize>,

    /// Open the standard libraries (`base`, `table`, `string`, `coroutine`, ...)
    pub open_stdlib: bool,

    /// Extra stack slots to reserve on the main thread
    pub stack_reserve: Option<i32>,

    /// Collector pause, in percent (`LUA_GCSETPAUSE`)
    pub gc_pause: Option<i32>,

    /// Collector step multiplier, in percent (`LUA_GCSETSTEPMUL`)
    pub gc_step_multiplier: Option<i32>,

    /// Handler invoked for errors outside any protected call
    ///
    /// When unset, a handler that logs the error is installed. Either way the
    /// runtime terminates the process when the handler returns.
    #[serde(skip)]
    pub panic_handler: Option<CFunction>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory_limit: None,
            open_stdlib: true,
            stack_reserve: None,
            gc_pause: None,
            gc_step_multiplier: None,
            panic_handler: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Config> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_stdlib(mut self, open: bool) -> Self {
        self.open_stdlib = open;
        self
    }

    /// Reserve extra stack slots at startup
    ///
    /// # Panics
    ///
    /// Panics if `slots` is negative.
    pub fn with_stack_reserve(mut self, slots: i32) -> Self {
        assert!(slots >= 0, "stack reserve must not be negative");
        self.stack_reserve = Some(slots);
        self
    }

    pub fn with_gc_pause(mut self, percent: i32) -> Self {
        self.gc_pause = Some(percent);
        self
    }

    pub fn with_gc_step_multiplier(mut self, percent: i32) -> Self {
        self.gc_step_multiplier = Some(percent);
        self
    }

    pub fn with_panic_handler(mut self, handler: CFunction) -> Self {
        self.panic_handler = Some(handler);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = Config::new()
            .with_memory_limit(1 << 20)
            .with_stdlib(false)
            .with_stack_reserve(32)
            .with_gc_pause(150);
        assert_eq!(config.memory_limit, Some(1 << 20));
        assert!(!config.open_stdlib);
        assert_eq!(config.stack_reserve, Some(32));
        assert_eq!(config.gc_pause, Some(150));
        assert_eq!(config.gc_step_multiplier, None);
    }

    #[test]
    fn test_from_toml_keeps_defaults() {
        let config = Config::from_toml_str("memory_limit = 4096\n").unwrap();
        assert_eq!(config.memory_limit, Some(4096));
        assert!(config.open_stdlib);
        assert!(config.panic_handler.is_none());
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = Config::from_toml_str("memory_limt = 4096\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[should_panic(expected = "stack reserve must not be negative")]
    fn test_negative_stack_reserve_panics() {
        let _ = Config::new().with_stack_reserve(-1);
    }
}
