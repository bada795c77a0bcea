//! One-time configuration of an embedded database engine.
//!
//! The engine itself lives elsewhere; this module only drives its global
//! configuration surface. Global options must be set before the engine opens
//! its first connection, so they are applied exactly once per process through
//! an [`EngineInitializer`].

mod state;
mod tests;

use std::fmt;
use std::sync::{Arc, OnceLock};

use log::{info, warn};
use thiserror::Error;

pub use state::EngineConfigState;

/// Result code reported by the engine on success.
pub const ENGINE_OK: i32 = 0;
/// Result code reported by the engine when configured too late.
pub const ENGINE_MISUSE: i32 = 21;

/// Receives engine diagnostics: a result code and a message.
pub type LogCallback = Arc<dyn Fn(i32, &str) + Send + Sync>;

/// Errors reported by the engine configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine is already initialized; global options can no longer change.
    #[error("engine is already in use; global configuration can no longer change")]
    ConfigurationTooLate,

    /// The engine refused an option with this result code.
    #[error("engine rejected the configuration (code {0})")]
    Rejected(i32),
}

impl EngineError {
    /// Interpret an engine result code.
    pub fn check(code: i32) -> Result<(), EngineError> {
        match code {
            ENGINE_OK => Ok(()),
            ENGINE_MISUSE => Err(EngineError::ConfigurationTooLate),
            other => Err(EngineError::Rejected(other)),
        }
    }
}

/// The engine's global configuration calls.
///
/// An implementation backed by the real engine maps each call to the engine's
/// configuration entry point and its result code through [`EngineError::check`].
pub trait EngineConfigSurface {
    /// Allow use from several threads, one connection per thread at a time.
    fn enable_multithread(&mut self) -> Result<(), EngineError>;

    /// Turn memory usage tracking on or off.
    fn set_memory_status(&mut self, enabled: bool) -> Result<(), EngineError>;

    /// Install the process-wide diagnostic callback.
    fn set_log_callback(&mut self, callback: LogCallback) -> Result<(), EngineError>;
}

/// The options applied at initialization.
#[derive(Clone)]
pub struct EngineSettings {
    pub multithread: bool,
    pub memory_status: bool,
    pub log_callback: Option<LogCallback>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            multithread: true,
            memory_status: false,
            log_callback: Some(log_forwarder()),
        }
    }
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("multithread", &self.multithread)
            .field("memory_status", &self.memory_status)
            .field("log_callback", &self.log_callback.is_some())
            .finish()
    }
}

/// A callback forwarding engine diagnostics to the `log` crate.
pub fn log_forwarder() -> LogCallback {
    Arc::new(|code, message| warn!("engine ({code}): {message}"))
}

/// Applies engine settings at most once.
///
/// The first call to [`init`](Self::init) configures the surface; every
/// later call returns the first outcome without touching the surface again.
#[derive(Debug, Default)]
pub struct EngineInitializer {
    outcome: OnceLock<Result<(), EngineError>>,
}

impl EngineInitializer {
    pub const fn new() -> Self {
        Self { outcome: OnceLock::new() }
    }

    pub fn init(&self, surface: &mut dyn EngineConfigSurface, settings: &EngineSettings) -> Result<(), EngineError> {
        self.outcome.get_or_init(|| apply(surface, settings)).clone()
    }

    /// The outcome of the first `init`, if it has run.
    pub fn outcome(&self) -> Option<&Result<(), EngineError>> {
        self.outcome.get()
    }
}

static ENGINE: EngineInitializer = EngineInitializer::new();

/// Configure the process-wide engine. Only the first call has any effect.
pub fn init(surface: &mut dyn EngineConfigSurface, settings: &EngineSettings) -> Result<(), EngineError> {
    ENGINE.init(surface, settings)
}

fn apply(surface: &mut dyn EngineConfigSurface, settings: &EngineSettings) -> Result<(), EngineError> {
    if settings.multithread {
        surface.enable_multithread()?;
    }
    surface.set_memory_status(settings.memory_status)?;
    if let Some(callback) = &settings.log_callback {
        surface.set_log_callback(Arc::clone(callback))?;
    }
    info!("Engine configured: {settings:?}");
    Ok(())
}
