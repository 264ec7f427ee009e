//! The final outcome of a fiber or effect.

use super::cause::{Cause, Defect};
use super::id::FiberId;

/// How a computation ended: with a value or with a [`Cause`].
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<A, E> {
    /// Completed with a value.
    Success(A),
    /// Completed with a failure cause.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// An exit failed with a typed error.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// An exit failed with the given cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// An exit failed with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Failure(Cause::Die(Defect::new(message)))
    }

    /// An exit interrupted by `fiber_id`.
    #[must_use]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber_id))
    }

    /// Returns `true` for [`Exit::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for [`Exit::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` if the exit is a failure containing an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(cause) if cause.is_interrupted())
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Transforms the success value.
    #[must_use]
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Converts into a `Result` with the cause as the error.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(cause) => Err(cause),
        }
    }
}

impl<A, E: Clone> Exit<A, E> {
    /// Transforms every typed failure in the cause.
    #[must_use]
    pub fn map_error<E2>(self, f: impl FnMut(E) -> E2) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }
}

impl<E> Exit<(), E> {
    /// The successful unit exit.
    #[must_use]
    pub const fn unit() -> Self {
        Self::Success(())
    }
}
