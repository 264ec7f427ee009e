//! Fiber identity.
//!
//! Every fiber gets a [`FiberId`] when it is forked. Identifiers are unique
//! within the process (a monotonic counter) and also record the wall-clock
//! start time of the fiber in milliseconds, which the runtime uses for
//! lifetime metrics.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fiber, or of "no fiber" for operations issued from outside
/// the runtime.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FiberId {
    /// No fiber. Used as the blocking identity of foreign async operations
    /// and as the interruptor for interruptions that come from outside.
    #[default]
    None,
    /// A fiber created by the runtime.
    Runtime {
        /// Process-unique sequence number.
        id: u64,
        /// Start time in milliseconds since the Unix epoch.
        start_time_millis: u64,
    },
}

impl FiberId {
    /// Allocates a fresh identifier stamped with the current time.
    #[must_use]
    pub fn next() -> Self {
        let id = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        Self::Runtime {
            id,
            start_time_millis: now_millis(),
        }
    }

    /// Creates an identifier with explicit components, for tests and tools.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(id: u64, start_time_millis: u64) -> Self {
        Self::Runtime {
            id,
            start_time_millis,
        }
    }

    /// Returns the sequence number, or `None` for [`FiberId::None`].
    #[must_use]
    pub const fn id(self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Runtime { id, .. } => Some(id),
        }
    }

    /// Returns the start timestamp, or `None` for [`FiberId::None`].
    #[must_use]
    pub const fn start_time_millis(self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Runtime {
                start_time_millis, ..
            } => Some(start_time_millis),
        }
    }

    /// Returns `true` for [`FiberId::None`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Milliseconds elapsed since this fiber started, saturating at zero.
    #[must_use]
    pub fn lifetime_millis(self) -> u64 {
        self.start_time_millis()
            .map_or(0, |start| now_millis().saturating_sub(start))
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("FiberId(None)"),
            Self::Runtime { id, .. } => write!(f, "FiberId({id})"),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("#none"),
            Self::Runtime { id, .. } => write!(f, "#{id}"),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
