//! The cause algebra: why a computation did not produce a value.
//!
//! A [`Cause`] is a tree. Its leaves are typed failures, defects (panics and
//! other unexpected errors) and interruptions. Its inner nodes record whether
//! two causes happened one after the other ([`Cause::Then`]) or concurrently
//! ([`Cause::Both`]). [`Cause::Empty`] is the identity of both compositions;
//! the smart constructors [`Cause::then`] and [`Cause::both`] never build a
//! node with an empty side.

use super::id::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

/// An unexpected error: a caught panic or a broken runtime invariant.
///
/// Defects are untyped; they carry only a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a defect from a payload caught by `std::panic::catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// Structured description of a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause<E> {
    /// No failure.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Then(Arc<Cause<E>>, Arc<Cause<E>>),
    /// Both causes happened concurrently.
    Both(Arc<Cause<E>>, Arc<Cause<E>>),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect with the given message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Interruption by `fiber_id`.
    #[must_use]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Interrupt(fiber_id)
    }

    /// Sequential composition. `Empty` on either side yields the other side.
    #[must_use]
    pub fn then(left: Self, right: Self) -> Self {
        match (left.is_empty(), right.is_empty()) {
            (true, _) => right,
            (_, true) => left,
            _ => Self::Then(Arc::new(left), Arc::new(right)),
        }
    }

    /// Parallel composition. `Empty` on either side yields the other side.
    #[must_use]
    pub fn both(left: Self, right: Self) -> Self {
        match (left.is_empty(), right.is_empty()) {
            (true, _) => right,
            (_, true) => left,
            _ => Self::Both(Arc::new(left), Arc::new(right)),
        }
    }

    /// Iterates over the leaves of the cause tree, left to right.
    ///
    /// Composite nodes are traversed with an explicit stack.
    pub fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }

    /// Returns `true` if the cause contains no failure of any kind.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().all(|leaf| matches!(leaf, Self::Empty))
    }

    /// Returns `true` if the cause contains at least one interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// Returns `true` if the cause contains no typed failures or defects.
    ///
    /// The empty cause counts as interrupted-only.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        self.leaves()
            .all(|leaf| matches!(leaf, Self::Empty | Self::Interrupt(_)))
    }

    /// Returns `true` if the cause contains a typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Returns `true` if the cause contains a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// The set of fibers that interrupted this computation.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Interrupt(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// All typed failures, in order of appearance.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// All defects, in order of appearance.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// The first typed failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.leaves().find_map(|leaf| match leaf {
            Self::Fail(e) => Some(e),
            _ => None,
        })
    }
}

impl<E: Clone> Cause<E> {
    /// Removes every typed failure, keeping defects and interruptions.
    ///
    /// Used when an interrupted fiber bypasses its failure handlers.
    #[must_use]
    pub fn strip_failures(&self) -> Self {
        match self {
            Self::Empty | Self::Fail(_) => Self::Empty,
            Self::Die(d) => Self::Die(d.clone()),
            Self::Interrupt(id) => Self::Interrupt(*id),
            Self::Then(l, r) => Self::then(l.strip_failures(), r.strip_failures()),
            Self::Both(l, r) => Self::both(l.strip_failures(), r.strip_failures()),
        }
    }

    /// Transforms every typed failure.
    #[must_use]
    pub fn map<E2>(&self, mut f: impl FnMut(E) -> E2) -> Cause<E2> {
        self.flat_map_failures(&mut |e| Cause::Fail(f(e)))
    }

    /// Replaces every typed failure with a whole cause.
    pub(crate) fn flat_map_failures<E2>(&self, f: &mut dyn FnMut(E) -> Cause<E2>) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => f(e.clone()),
            Self::Die(d) => Cause::Die(d.clone()),
            Self::Interrupt(id) => Cause::Interrupt(*id),
            Self::Then(l, r) => {
                let left = l.flat_map_failures(f);
                Cause::then(left, r.flat_map_failures(f))
            }
            Self::Both(l, r) => {
                let left = l.flat_map_failures(f);
                Cause::both(left, r.flat_map_failures(f))
            }
        }
    }
}

/// Iterator over the leaves of a [`Cause`].
#[derive(Debug)]
pub struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = &'a Cause<E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Cause::Then(l, r) | Cause::Both(l, r) => {
                    self.stack.push(r);
                    self.stack.push(l);
                }
                leaf => return Some(leaf),
            }
        }
        None
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Fail(e) => write!(f, "fail({e})"),
            Self::Die(d) => write!(f, "die({})", d.message()),
            Self::Interrupt(id) => write!(f, "interrupt({id})"),
            Self::Then(l, r) => write!(f, "({l} ; {r})"),
            Self::Both(l, r) => write!(f, "({l} | {r})"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Cause<E> {}
