//! Runtime-level errors.
//!
//! Failures of effects are not errors in this sense: they travel as
//! [`Cause`](crate::types::Cause) values inside an [`Exit`](crate::types::Exit)
//! and are handled inside the effect program. [`Error`] covers what goes
//! wrong around a program: configuration that does not parse, a runtime that
//! cannot start its workers, or a synchronous run that had to suspend.
//!
//! # Recovery Classification
//!
//! Every error can be classified by [`Recoverability`]:
//! - `Transient`: the same call may succeed later
//! - `Permanent`: retrying without changing the input will not help

use crate::types::FiberId;
use thiserror::Error;

/// Errors raised by the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A synchronous run reached an asynchronous boundary. The fiber keeps
    /// running on the runtime's scheduler.
    #[error("fiber {0} suspended on an asynchronous operation during a synchronous run")]
    AsyncFiber(FiberId),

    /// A configuration value is out of range.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An environment variable or configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking run observed an interruption.
    #[error("fiber {0} was interrupted")]
    Interrupted(FiberId),

    /// The scheduler could not be started.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Synchronous execution was not possible.
    AsyncFiber,
    /// Configuration was rejected.
    Config,
    /// Execution was interrupted.
    Interrupted,
    /// Worker threads could not be started.
    Scheduler,
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
}

impl ErrorKind {
    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::AsyncFiber | Self::Scheduler => Recoverability::Transient,
            Self::Config | Self::Interrupted => Recoverability::Permanent,
        }
    }
}

impl Error {
    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AsyncFiber(_) => ErrorKind::AsyncFiber,
            Self::InvalidConfig { .. } | Self::Config(_) => ErrorKind::Config,
            Self::Interrupted(_) => ErrorKind::Interrupted,
            Self::Scheduler(_) => ErrorKind::Scheduler,
        }
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind().recoverability(), Recoverability::Transient)
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;
