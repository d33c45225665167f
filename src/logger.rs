//! Injected logging capability.
//!
//! Every component that reports progress (the RN2483 driver, session
//! bootstrap, the uplink scheduler, the gateway listener) receives a
//! [`SharedLogger`] instead of writing to a process-wide logger. The binary
//! hands out [`LogFacade`] instances, which forward to the `log` crate and
//! therefore to `env_logger`.
//!
//! # Example
//!
//! ```
//! use loramote::logger::{LogFacade, Logger};
//!
//! let logger = LogFacade::new("loramote::example");
//! logger.info(format_args!("uplink frame={} port={}", 0, 2));
//! ```

use log::Level;
use std::fmt;
use std::sync::Arc;

/// Leveled logging capability.
pub trait Logger: Send + Sync {
    /// Emit one record at the given level.
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

/// Logger handle shared between the driver and the harness.
pub type SharedLogger = Arc<dyn Logger>;

/// Forwards records to the `log` facade under a fixed target.
#[derive(Debug, Clone)]
pub struct LogFacade {
    target: &'static str,
}

impl LogFacade {
    /// Create a facade logging under `target`.
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    /// Create a shared facade logging under `target`.
    pub fn shared(target: &'static str) -> SharedLogger {
        Arc::new(Self::new(target))
    }

    /// The `log` target records are emitted under.
    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl Logger for LogFacade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: self.target, level, "{}", args);
    }
}
