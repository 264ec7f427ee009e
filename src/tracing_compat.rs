//! Logging macros that work with or without the `tracing-integration`
//! feature.
//!
//! - **With the feature** (the default): re-exports from the `tracing` crate.
//! - **Without it**: macros that expand to nothing.
//!
//! Crate code always imports from here:
//!
//! ```rust,ignore
//! use cofiber::tracing_compat::{debug, trace};
//!
//! trace!(fiber_id = %id, "fiber forked");
//! debug!(cause = ?cause, "interrupt signal");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Macros that expand to nothing.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Stand-in for `tracing::Level` when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level;

#[cfg(not(feature = "tracing-integration"))]
impl Level {
    /// Trace level (most verbose).
    pub const TRACE: Self = Self;
    /// Debug level.
    pub const DEBUG: Self = Self;
    /// Info level.
    pub const INFO: Self = Self;
    /// Warn level.
    pub const WARN: Self = Self;
    /// Error level (least verbose).
    pub const ERROR: Self = Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn logging_macros_accept_fields() {
        init_test_logging();
        crate::test_phase!("logging_macros_accept_fields");
        let fiber_id = crate::types::FiberId::next();
        trace!(fiber_id = %fiber_id, "trace message");
        debug!(count = 42, "debug with field");
        info!(name = "test", "info with field");
        warn!("warn message");
        error!(fiber_id = ?fiber_id, "error message");
        let _ = Level::INFO;
        crate::test_complete!("logging_macros_accept_fields");
    }
}
