//! Where forked fibers are registered.

use super::fiber::RuntimeFiber;

/// The scope a forked fiber is attached to.
///
/// A fiber in a [`FiberScope::Local`] scope is a child of the owning fiber:
/// it is interrupted and awaited before the owner's exit is committed. A
/// fiber in the [`FiberScope::Global`] scope is a daemon and outlives
/// whoever forked it.
#[derive(Clone, Debug)]
pub enum FiberScope {
    /// No owner. Daemons live here.
    Global,
    /// Owned by the given fiber.
    Local(RuntimeFiber),
}

impl FiberScope {
    /// The global scope.
    #[must_use]
    pub const fn global() -> Self {
        Self::Global
    }

    /// The scope owned by `fiber`.
    #[must_use]
    pub fn local(fiber: RuntimeFiber) -> Self {
        Self::Local(fiber)
    }

    /// The owning fiber, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&RuntimeFiber> {
        match self {
            Self::Global => None,
            Self::Local(fiber) => Some(fiber),
        }
    }
}
