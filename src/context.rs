//! Run context handed to every estimation stage.
//!
//! Replaces a process-wide log sink: stages report through the context they
//! are given, and fatal conditions come back as an [`EffestError`] that the
//! caller propagates.

use crate::error::EffestError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    verbose: bool,
}

impl RunContext {
    pub fn new(verbose: bool) -> Self {
        RunContext { verbose }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Message that is always reported.
    pub fn log(&self, message: &str) {
        info!("{}", message);
    }

    /// Message reported only in verbose mode.
    pub fn vlog(&self, message: &str) {
        if self.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    /// Report a fatal condition and hand back the error to propagate.
    pub fn fatal(&self, message: &str) -> EffestError {
        error!("{}", message);
        EffestError::Fatal(message.to_string())
    }

    /// Report an already-built error before it is propagated.
    pub fn fatal_err(&self, err: EffestError) -> EffestError {
        error!("{}", err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_returns_message() {
        let ctx = RunContext::new(false);
        let err = ctx.fatal("No efficiency reference point specified!");
        assert_eq!(err.to_string(), "No efficiency reference point specified!");
        assert!(!ctx.is_verbose());
    }
}
