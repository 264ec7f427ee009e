//! Fiber-local variables.
//!
//! A [`FiberRef`] is a variable whose value is private to each fiber. A
//! forked child starts with the parent's value passed through the ref's
//! `fork` function; when the parent joins the child, the child's value is
//! merged back with the ref's `join` function. Values never alias across
//! fibers: propagation happens only through fork and join.

use super::fiber_refs::AnyFiberRef;
use crate::effect::{Effect, Instruction};
use crate::types::{Cause, Data, Value};
use core::fmt;
use std::sync::{Arc, OnceLock};

/// A typed fiber-local variable.
pub struct FiberRef<A> {
    key: AnyFiberRef,
    initial: Arc<A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            initial: Arc::clone(&self.initial),
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRef({})", self.key.id())
    }
}

impl<A> PartialEq for FiberRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.key.id() == other.key.id()
    }
}

impl<A> Eq for FiberRef<A> {}

impl<A: Data> FiberRef<A> {
    /// A ref whose children inherit the parent's value unchanged and whose
    /// join keeps the child's value.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self::with_fork_join(initial, A::clone, |_, child| child.clone())
    }

    /// A ref with explicit fork and join functions.
    pub fn with_fork_join<F, J>(initial: A, fork: F, join: J) -> Self
    where
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        let fork = Arc::new(move |value: &Value| match value.downcast_ref::<A>() {
            Some(a) => Value::new(fork(a)),
            None => value.clone(),
        });
        let join = Arc::new(move |parent: &Value, child: &Value| {
            match (parent.downcast_ref::<A>(), child.downcast_ref::<A>()) {
                (Some(p), Some(c)) => Value::new(join(p, c)),
                _ => child.clone(),
            }
        });
        Self {
            key: AnyFiberRef::new(Value::new(initial.clone()), fork, join),
            initial: Arc::new(initial),
        }
    }

    /// Creates a ref when run.
    #[must_use]
    pub fn make(initial: A) -> Effect<Self> {
        Effect::sync(move || Self::new(initial.clone()))
    }

    /// Creates a ref with explicit fork and join functions when run.
    pub fn make_with<F, J>(initial: A, fork: F, join: J) -> Effect<Self>
    where
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        let fork = Arc::new(fork);
        let join = Arc::new(join);
        Effect::sync(move || {
            let fork = Arc::clone(&fork);
            let join = Arc::clone(&join);
            Self::with_fork_join(initial.clone(), move |a| fork(a), move |p, c| join(p, c))
        })
    }

    /// Process-unique identifier of this ref.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.key.id()
    }

    /// The value a fiber sees before anything is set.
    #[must_use]
    pub fn initial(&self) -> A {
        A::clone(&self.initial)
    }

    pub(crate) fn key(&self) -> &AnyFiberRef {
        &self.key
    }

    /// Applies `f` to the current value, storing the new value and
    /// returning `B`.
    pub fn modify<B: Data, F>(&self, f: F) -> Effect<B>
    where
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        let this = self.clone();
        Effect::from_instruction(Instruction::stateful(move |ctx, _| {
            let (out, next) = f(ctx.get(&this));
            ctx.set(&this, next);
            Instruction::Success(Value::new(out))
        }))
    }

    /// Reads the current value.
    #[must_use]
    pub fn get(&self) -> Effect<A> {
        self.modify(|a| (a.clone(), a))
    }

    /// Replaces the current value.
    #[must_use]
    pub fn set(&self, value: A) -> Effect<()> {
        self.modify(move |_| ((), value.clone()))
    }

    /// Replaces the current value, returning the previous one.
    #[must_use]
    pub fn get_and_set(&self, value: A) -> Effect<A> {
        self.modify(move |old| (old, value.clone()))
    }

    /// Transforms the current value.
    pub fn update<F>(&self, f: F) -> Effect<()>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| ((), f(a)))
    }

    /// Transforms the current value and returns the new one.
    pub fn update_and_get<F>(&self, f: F) -> Effect<A>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| {
            let next = f(a);
            (next.clone(), next)
        })
    }

    /// Restores the initial value.
    #[must_use]
    pub fn reset(&self) -> Effect<()> {
        let initial = self.initial();
        self.set(initial)
    }

    /// Removes the fiber's explicit value.
    #[must_use]
    pub fn delete(&self) -> Effect<()> {
        let this = self.clone();
        Effect::from_instruction(Instruction::stateful(move |ctx, _| {
            ctx.delete(&this);
            Instruction::unit()
        }))
    }

    /// Runs `effect` with the ref set to `value`, restoring the previous
    /// value on every exit path, including interruption.
    #[must_use]
    pub fn locally<B: Data, E: Data>(&self, value: A, effect: Effect<B, E>) -> Effect<B, E> {
        self.locally_with(move |_| value.clone(), effect)
    }

    /// Runs `effect` with the ref transformed by `f`, restoring the previous
    /// value on every exit path.
    pub fn locally_with<B: Data, E: Data, F>(&self, f: F, effect: Effect<B, E>) -> Effect<B, E>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let restore_ref = self.clone();
        Effect::acquire_use_release(
            self.modify(move |old| (old.clone(), f(old))).widen_error::<E>(),
            move |_| effect.clone(),
            move |old, _| restore_ref.set(old),
        )
    }
}

/// The causes of every interruption signal a fiber has received.
///
/// Children start with an empty cause; a parent never absorbs a child's
/// interruptions on join.
pub(crate) fn interrupted_cause() -> &'static FiberRef<Cause<Value>> {
    static REF: OnceLock<FiberRef<Cause<Value>>> = OnceLock::new();
    REF.get_or_init(|| {
        FiberRef::with_fork_join(Cause::Empty, |_| Cause::Empty, |parent, _| parent.clone())
    })
}
