//! Runtime flags and flag patches.
//!
//! [`RuntimeFlags`] is an immutable bit set of per-fiber scheduler policies.
//! A [`RuntimeFlagsPatch`] describes a change to a flag set: which flags it
//! touches (`active`) and the value each touched flag takes (`enabled`).
//! Patches compose and can be inverted, which is how scoped flag changes are
//! undone when the scope exits.
//!
//! Invariant: `enabled` is always a subset of `active`.

use core::fmt;

/// A single scheduler policy bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RuntimeFlag {
    /// The fiber may be interrupted.
    Interruption = 1 << 0,
    /// The supervisor sees every executed instruction.
    OpSupervision = 1 << 1,
    /// Fiber lifecycle metrics are recorded.
    RuntimeMetrics = 1 << 2,
    /// The executing fiber is published in a thread-local during drains.
    CurrentFiber = 1 << 3,
    /// The fiber is finishing and awaiting its children. Masks interruption.
    WindDown = 1 << 4,
    /// Yield points go back through the scheduler instead of continuing inline.
    CooperativeYielding = 1 << 5,
}

impl RuntimeFlag {
    /// Every flag, in bit order.
    pub const ALL: [Self; 6] = [
        Self::Interruption,
        Self::OpSupervision,
        Self::RuntimeMetrics,
        Self::CurrentFiber,
        Self::WindDown,
        Self::CooperativeYielding,
    ];

    /// The bit mask of this flag.
    #[must_use]
    pub const fn mask(self) -> u32 {
        self as u32
    }

    /// Human-readable flag name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interruption => "Interruption",
            Self::OpSupervision => "OpSupervision",
            Self::RuntimeMetrics => "RuntimeMetrics",
            Self::CurrentFiber => "CurrentFiber",
            Self::WindDown => "WindDown",
            Self::CooperativeYielding => "CooperativeYielding",
        }
    }
}

/// An immutable set of [`RuntimeFlag`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFlags(u32);

impl RuntimeFlags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// The flags a root fiber starts with unless configured otherwise.
    pub const DEFAULT: Self = Self(
        RuntimeFlag::Interruption.mask()
            | RuntimeFlag::CooperativeYielding.mask()
            | RuntimeFlag::CurrentFiber.mask(),
    );

    /// Builds a set from individual flags.
    #[must_use]
    pub fn make(flags: &[RuntimeFlag]) -> Self {
        Self(flags.iter().fold(0, |acc, flag| acc | flag.mask()))
    }

    /// The raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `flag` is set.
    #[must_use]
    pub const fn is_enabled(self, flag: RuntimeFlag) -> bool {
        self.0 & flag.mask() != 0
    }

    /// Returns `true` if `flag` is not set.
    #[must_use]
    pub const fn is_disabled(self, flag: RuntimeFlag) -> bool {
        !self.is_enabled(flag)
    }

    /// Returns a copy with `flag` set.
    #[must_use]
    pub const fn enable(self, flag: RuntimeFlag) -> Self {
        Self(self.0 | flag.mask())
    }

    /// Returns a copy with `flag` cleared.
    #[must_use]
    pub const fn disable(self, flag: RuntimeFlag) -> Self {
        Self(self.0 & !flag.mask())
    }

    /// Returns a copy with every flag of `other` set.
    #[must_use]
    pub const fn enable_all(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns a copy with every flag of `other` cleared.
    #[must_use]
    pub const fn disable_all(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// The fiber can observe interruption right now: interruption is enabled
    /// and the fiber is not winding down.
    #[must_use]
    pub const fn interruptible(self) -> bool {
        self.is_enabled(RuntimeFlag::Interruption) && self.is_disabled(RuntimeFlag::WindDown)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::Interruption)`.
    #[must_use]
    pub const fn interruption(self) -> bool {
        self.is_enabled(RuntimeFlag::Interruption)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::CooperativeYielding)`.
    #[must_use]
    pub const fn cooperative_yielding(self) -> bool {
        self.is_enabled(RuntimeFlag::CooperativeYielding)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::OpSupervision)`.
    #[must_use]
    pub const fn op_supervision(self) -> bool {
        self.is_enabled(RuntimeFlag::OpSupervision)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::RuntimeMetrics)`.
    #[must_use]
    pub const fn runtime_metrics(self) -> bool {
        self.is_enabled(RuntimeFlag::RuntimeMetrics)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::CurrentFiber)`.
    #[must_use]
    pub const fn current_fiber(self) -> bool {
        self.is_enabled(RuntimeFlag::CurrentFiber)
    }

    /// Shorthand for `is_enabled(RuntimeFlag::WindDown)`.
    #[must_use]
    pub const fn wind_down(self) -> bool {
        self.is_enabled(RuntimeFlag::WindDown)
    }

    /// Applies a patch.
    #[must_use]
    pub const fn patch(self, patch: RuntimeFlagsPatch) -> Self {
        Self((self.0 & !patch.active) | (patch.active & patch.enabled))
    }

    /// The patch that turns `self` into `that`.
    #[must_use]
    pub const fn diff(self, that: Self) -> RuntimeFlagsPatch {
        let changed = self.0 ^ that.0;
        RuntimeFlagsPatch {
            active: changed,
            enabled: that.0 & changed,
        }
    }

    /// Iterates over the set flags.
    pub fn iter(self) -> impl Iterator<Item = RuntimeFlag> {
        RuntimeFlag::ALL
            .into_iter()
            .filter(move |flag| self.is_enabled(*flag))
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<RuntimeFlag> for RuntimeFlags {
    fn from(flag: RuntimeFlag) -> Self {
        Self(flag.mask())
    }
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(RuntimeFlag::name))
            .finish()
    }
}

/// A change to a [`RuntimeFlags`] set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RuntimeFlagsPatch {
    active: u32,
    enabled: u32,
}

impl RuntimeFlagsPatch {
    /// The patch that changes nothing.
    pub const EMPTY: Self = Self {
        active: 0,
        enabled: 0,
    };

    /// A patch that enables `flag`.
    #[must_use]
    pub const fn enable(flag: RuntimeFlag) -> Self {
        Self {
            active: flag.mask(),
            enabled: flag.mask(),
        }
    }

    /// A patch that disables `flag`.
    #[must_use]
    pub const fn disable(flag: RuntimeFlag) -> Self {
        Self {
            active: flag.mask(),
            enabled: 0,
        }
    }

    /// Returns `true` if the patch touches no flag.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.active == 0
    }

    /// Returns `true` if the patch touches `flag`.
    #[must_use]
    pub const fn is_active(self, flag: RuntimeFlag) -> bool {
        self.active & flag.mask() != 0
    }

    /// Returns `true` if the patch turns `flag` on.
    #[must_use]
    pub const fn is_enabled(self, flag: RuntimeFlag) -> bool {
        self.enabled & flag.mask() != 0
    }

    /// Returns `true` if the patch turns `flag` off.
    #[must_use]
    pub const fn is_disabled(self, flag: RuntimeFlag) -> bool {
        self.is_active(flag) && !self.is_enabled(flag)
    }

    /// Applies `self`, then `that`.
    #[must_use]
    pub const fn and_then(self, that: Self) -> Self {
        Self {
            active: self.active | that.active,
            enabled: (self.enabled & !that.active) | that.enabled,
        }
    }

    /// A patch that touches flags either patch touches and enables a flag only
    /// if both enable it.
    #[must_use]
    pub const fn both(self, that: Self) -> Self {
        Self {
            active: self.active | that.active,
            enabled: self.enabled & that.enabled,
        }
    }

    /// A patch that touches flags either patch touches and enables a flag if
    /// either enables it.
    #[must_use]
    pub const fn either(self, that: Self) -> Self {
        Self {
            active: self.active | that.active,
            enabled: self.enabled | that.enabled,
        }
    }

    /// Removes `flag` from the patch.
    #[must_use]
    pub const fn exclude(self, flag: RuntimeFlag) -> Self {
        Self {
            active: self.active & !flag.mask(),
            enabled: self.enabled & !flag.mask(),
        }
    }

    /// The patch that undoes this one on any set the patch was applied to
    /// with a real change.
    #[must_use]
    pub const fn inverse(self) -> Self {
        Self {
            active: self.active,
            enabled: !self.enabled & self.active,
        }
    }

    /// Flags this patch turns on.
    #[must_use]
    pub const fn enabled_set(self) -> RuntimeFlags {
        RuntimeFlags(self.active & self.enabled)
    }

    /// Flags this patch turns off.
    #[must_use]
    pub const fn disabled_set(self) -> RuntimeFlags {
        RuntimeFlags(self.active & !self.enabled)
    }
}

impl fmt::Debug for RuntimeFlagsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFlagsPatch")
            .field("enable", &self.enabled_set())
            .field("disable", &self.disabled_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let flags = RuntimeFlags::default();
        assert!(flags.interruptible());
        assert!(flags.cooperative_yielding());
        assert!(!flags.op_supervision());
        assert!(!flags.runtime_metrics());
    }

    #[test]
    fn wind_down_masks_interruption() {
        let flags = RuntimeFlags::DEFAULT.enable(RuntimeFlag::WindDown);
        assert!(flags.interruption());
        assert!(!flags.interruptible());
    }

    #[test]
    fn patch_enable_disable() {
        let flags = RuntimeFlags::NONE;
        let on = flags.patch(RuntimeFlagsPatch::enable(RuntimeFlag::Interruption));
        assert!(on.interruption());
        let off = on.patch(RuntimeFlagsPatch::disable(RuntimeFlag::Interruption));
        assert_eq!(off, RuntimeFlags::NONE);
    }

    #[test]
    fn diff_applied_yields_target() {
        let a = RuntimeFlags::make(&[RuntimeFlag::Interruption, RuntimeFlag::OpSupervision]);
        let b = RuntimeFlags::make(&[RuntimeFlag::OpSupervision, RuntimeFlag::WindDown]);
        assert_eq!(a.patch(a.diff(b)), b);
        assert_eq!(b.patch(a.diff(b).inverse()), a);
    }

    #[test]
    fn and_then_is_sequential_application() {
        let p1 = RuntimeFlagsPatch::enable(RuntimeFlag::Interruption);
        let p2 = RuntimeFlagsPatch::disable(RuntimeFlag::Interruption)
            .and_then(RuntimeFlagsPatch::enable(RuntimeFlag::WindDown));
        let flags = RuntimeFlags::NONE;
        assert_eq!(flags.patch(p1.and_then(p2)), flags.patch(p1).patch(p2));
    }

    #[test]
    fn exclude_drops_flag() {
        let p = RuntimeFlagsPatch::enable(RuntimeFlag::Interruption)
            .and_then(RuntimeFlagsPatch::enable(RuntimeFlag::WindDown))
            .exclude(RuntimeFlag::WindDown);
        assert!(p.is_active(RuntimeFlag::Interruption));
        assert!(!p.is_active(RuntimeFlag::WindDown));
    }

    #[test]
    fn debug_lists_names() {
        let flags = RuntimeFlags::make(&[RuntimeFlag::Interruption]);
        assert_eq!(format!("{flags:?}"), "{\"Interruption\"}");
    }
}
