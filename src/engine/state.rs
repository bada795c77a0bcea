//! An in-process configuration surface.

use std::fmt;

use crate::engine::{EngineConfigSurface, EngineError, LogCallback};

/// Records the engine's global configuration.
///
/// Changes are accepted until [`seal`](Self::seal) marks the engine as in
/// use; afterwards every call fails with `ConfigurationTooLate`, as the real
/// engine does once its first connection is open.
#[derive(Default)]
pub struct EngineConfigState {
    multithread: bool,
    memory_status: Option<bool>,
    log_callback: Option<LogCallback>,
    sealed: bool,
    calls: usize,
}

impl EngineConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the engine as in use.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_multithread(&self) -> bool {
        self.multithread
    }

    /// The memory tracking setting, if one was made.
    pub fn memory_status(&self) -> Option<bool> {
        self.memory_status
    }

    /// Number of configuration calls received, including refused ones.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Deliver a diagnostic to the installed callback. Returns false when none
    /// is installed.
    pub fn log(&self, code: i32, message: &str) -> bool {
        match &self.log_callback {
            Some(callback) => {
                callback(code, message);
                true
            }
            None => false,
        }
    }

    fn accept(&mut self) -> Result<(), EngineError> {
        self.calls += 1;
        if self.sealed {
            Err(EngineError::ConfigurationTooLate)
        } else {
            Ok(())
        }
    }
}

impl EngineConfigSurface for EngineConfigState {
    fn enable_multithread(&mut self) -> Result<(), EngineError> {
        self.accept()?;
        self.multithread = true;
        Ok(())
    }

    fn set_memory_status(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.accept()?;
        self.memory_status = Some(enabled);
        Ok(())
    }

    fn set_log_callback(&mut self, callback: LogCallback) -> Result<(), EngineError> {
        self.accept()?;
        self.log_callback = Some(callback);
        Ok(())
    }
}

impl fmt::Debug for EngineConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfigState")
            .field("multithread", &self.multithread)
            .field("memory_status", &self.memory_status)
            .field("log_callback", &self.log_callback.is_some())
            .field("sealed", &self.sealed)
            .field("calls", &self.calls)
            .finish()
    }
}
