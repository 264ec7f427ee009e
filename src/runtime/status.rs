//! Observable fiber status.

use crate::types::{FiberId, RuntimeFlags};

/// A snapshot of where a fiber is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// The fiber is executing instructions.
    Running {
        /// Flags in force.
        flags: RuntimeFlags,
    },
    /// The fiber is waiting for an asynchronous operation.
    Suspended {
        /// Flags in force.
        flags: RuntimeFlags,
        /// The identity the fiber is waiting on.
        blocking_on: FiberId,
    },
    /// The fiber has exited.
    Done,
}

impl FiberStatus {
    /// Returns `true` for [`FiberStatus::Done`].
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` for [`FiberStatus::Suspended`].
    #[must_use]
    pub const fn is_suspended(self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// The flags in force, unless the fiber is done.
    #[must_use]
    pub const fn flags(self) -> Option<RuntimeFlags> {
        match self {
            Self::Running { flags } | Self::Suspended { flags, .. } => Some(flags),
            Self::Done => None,
        }
    }
}
