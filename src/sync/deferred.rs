//! A write-once variable fibers can wait on.
//!
//! A [`Deferred`] starts empty. Any number of fibers may [`wait`] on it; they
//! suspend until the first completion, then every waiter runs the completing
//! effect. Later completions are rejected and report `false`.
//!
//! Waiting is interruptible. An interrupted waiter removes itself from the
//! joiner list, so a completion never resumes a fiber that has moved on.
//!
//! [`wait`]: Deferred::wait

use crate::effect::{Effect, Instruction};
use crate::runtime::Resume;
use crate::types::{Cause, Data, Defect, Exit, FiberId, Value};
use core::fmt;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

enum CellState {
    Pending(Vec<(u64, Resume)>),
    Done(Instruction),
}

enum Registration {
    Waiting(u64),
    Ready(Instruction),
}

/// The untyped core of a [`Deferred`].
pub(crate) struct DeferredCell {
    state: Mutex<CellState>,
    next_key: AtomicU64,
}

impl DeferredCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending(Vec::new())),
            next_key: AtomicU64::new(0),
        }
    }

    /// Completes the cell with `effect`, resuming every joiner in
    /// registration order. Returns `false` if the cell was already complete.
    pub(crate) fn complete(&self, effect: &Instruction) -> bool {
        let joiners = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Done(_) => return false,
                CellState::Pending(joiners) => {
                    let joiners = mem::take(joiners);
                    *state = CellState::Done(effect.clone());
                    joiners
                }
            }
        };
        for (_, joiner) in joiners {
            joiner.resume(effect.clone());
        }
        true
    }

    pub(crate) fn poll(&self) -> Option<Instruction> {
        match &*self.state.lock() {
            CellState::Pending(_) => None,
            CellState::Done(effect) => Some(effect.clone()),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(*self.state.lock(), CellState::Done(_))
    }

    pub(crate) fn joiner_count(&self) -> usize {
        match &*self.state.lock() {
            CellState::Pending(joiners) => joiners.len(),
            CellState::Done(_) => 0,
        }
    }

    fn register(&self, joiner: Resume) -> Registration {
        let mut state = self.state.lock();
        match &mut *state {
            CellState::Done(effect) => Registration::Ready(effect.clone()),
            CellState::Pending(joiners) => {
                let key = self.next_key.fetch_add(1, Ordering::Relaxed);
                joiners.push((key, joiner));
                Registration::Waiting(key)
            }
        }
    }

    fn unregister(&self, key: u64) {
        if let CellState::Pending(joiners) = &mut *self.state.lock() {
            joiners.retain(|(k, _)| *k != key);
        }
    }

    /// Suspends until the cell completes, then runs the completing
    /// instruction.
    pub(crate) fn wait(self: &Arc<Self>, blocking_on: FiberId) -> Instruction {
        let cell = Arc::clone(self);
        Instruction::async_interruptible(
            move |resume| match cell.register(resume.clone()) {
                Registration::Ready(effect) => {
                    resume.resume(effect);
                    None
                }
                Registration::Waiting(key) => {
                    let cell = Arc::clone(&cell);
                    Some(Instruction::sync(move || {
                        cell.unregister(key);
                        Ok(Value::unit())
                    }))
                }
            },
            blocking_on,
        )
    }
}

impl fmt::Debug for DeferredCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCell")
            .field("done", &self.is_done())
            .field("joiners", &self.joiner_count())
            .finish()
    }
}

/// A write-once variable completed with an `Effect<A, E>`.
pub struct Deferred<A, E = Infallible> {
    cell: Arc<DeferredCell>,
    blocking_on: FiberId,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            blocking_on: self.blocking_on,
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("blocking_on", &self.blocking_on)
            .field("cell", &self.cell)
            .finish()
    }
}

impl<A: Data, E: Data> Default for Deferred<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Data, E: Data> Deferred<A, E> {
    /// An empty deferred owned by no fiber.
    #[must_use]
    pub fn new() -> Self {
        Self::with_blocking_on(FiberId::None)
    }

    /// An empty deferred whose waiters report `blocking_on` as the identity
    /// they wait for.
    #[must_use]
    pub fn with_blocking_on(blocking_on: FiberId) -> Self {
        Self {
            cell: Arc::new(DeferredCell::new()),
            blocking_on,
            _marker: PhantomData,
        }
    }

    /// Creates an empty deferred owned by the running fiber.
    #[must_use]
    pub fn make() -> Effect<Self> {
        Effect::<FiberId>::fiber_id().map(Self::with_blocking_on)
    }

    /// The identity waiters report while suspended.
    #[must_use]
    pub fn blocking_on(&self) -> FiberId {
        self.blocking_on
    }

    /// Suspends until completion, then runs the completing effect.
    #[must_use]
    pub fn wait(&self) -> Effect<A, E> {
        Effect::from_instruction(self.cell.wait(self.blocking_on))
    }

    /// The completing effect, if the deferred is complete.
    #[must_use]
    pub fn poll(&self) -> Option<Effect<A, E>> {
        self.cell.poll().map(Effect::from_instruction)
    }

    /// Returns `true` once the deferred is complete.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// Completes with `effect` itself: every waiter runs it. Succeeds with
    /// `false` if already complete.
    #[must_use]
    pub fn complete_with(&self, effect: Effect<A, E>) -> Effect<bool> {
        let this = self.clone();
        Effect::sync(move || this.complete_now(effect.clone()))
    }

    /// Runs `effect` once and completes with its exit.
    #[must_use]
    pub fn complete(&self, effect: Effect<A, E>) -> Effect<bool> {
        let this = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            let this = this.clone();
            restore
                .apply(effect.clone())
                .exit()
                .flat_map(move |exit| this.done(exit))
        })
    }

    /// Completes with `exit`.
    #[must_use]
    pub fn done(&self, exit: Exit<A, E>) -> Effect<bool> {
        self.complete_with(Effect::from_exit(exit))
    }

    /// Completes with a success.
    #[must_use]
    pub fn succeed(&self, value: A) -> Effect<bool> {
        self.complete_with(Effect::succeed(value))
    }

    /// Completes with a typed failure.
    #[must_use]
    pub fn fail(&self, error: E) -> Effect<bool> {
        self.complete_with(Effect::fail(error))
    }

    /// Completes with a failure cause.
    #[must_use]
    pub fn fail_cause(&self, cause: Cause<E>) -> Effect<bool> {
        self.complete_with(Effect::fail_cause(cause))
    }

    /// Completes with a defect.
    #[must_use]
    pub fn die(&self, defect: Defect) -> Effect<bool> {
        self.complete_with(Effect::die(defect))
    }

    /// Completes with an interruption by the running fiber.
    #[must_use]
    pub fn interrupt(&self) -> Effect<bool> {
        let this = self.clone();
        Effect::<FiberId>::fiber_id().flat_map(move |id| this.interrupt_as(id))
    }

    /// Completes with an interruption by `fiber_id`.
    #[must_use]
    pub fn interrupt_as(&self, fiber_id: FiberId) -> Effect<bool> {
        self.complete_with(Effect::interrupt_as(fiber_id))
    }

    /// Completes synchronously from outside any fiber. Returns `false` if
    /// already complete.
    pub fn complete_now(&self, effect: Effect<A, E>) -> bool {
        self.cell.complete(&effect.into_instruction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_completion_wins() {
        let deferred: Deferred<i32, String> = Deferred::new();
        assert!(!deferred.is_done());
        assert!(deferred.poll().is_none());

        assert!(deferred.complete_now(Effect::succeed(1)));
        assert!(!deferred.complete_now(Effect::succeed(2)));
        assert!(deferred.is_done());

        let stored = deferred.poll().map(Effect::into_instruction);
        assert!(matches!(
            stored,
            Some(Instruction::Success(v)) if v.downcast::<i32>() == Some(1)
        ));
    }

    #[test]
    fn interrupted_waiters_are_deregistered() {
        let runtime = crate::test_utils::test_runtime();
        let deferred: Deferred<i32> = Deferred::new();
        let fiber = runtime.run_fork(deferred.wait());
        assert_eq!(deferred.cell.joiner_count(), 1);

        let stop = runtime.block_on(fiber.interrupt());
        assert!(matches!(stop, Exit::Success(ref exit) if exit.is_interrupted()));
        assert_eq!(deferred.cell.joiner_count(), 0);
    }

    #[test]
    fn unregistered_joiners_are_not_resumed() {
        let cell = DeferredCell::new();
        let Registration::Waiting(first) = cell.register(Resume::detached()) else {
            panic!("pending cell must accept joiners");
        };
        let Registration::Waiting(_) = cell.register(Resume::detached()) else {
            panic!("pending cell must accept joiners");
        };
        assert_eq!(cell.joiner_count(), 2);
        cell.unregister(first);
        assert_eq!(cell.joiner_count(), 1);

        assert!(cell.complete(&Instruction::unit()));
        assert_eq!(cell.joiner_count(), 0);
        assert!(matches!(
            cell.register(Resume::detached()),
            Registration::Ready(_)
        ));
    }

    #[test]
    fn clones_share_the_cell() {
        let a: Deferred<u8> = Deferred::with_blocking_on(FiberId::new_for_test(3, 0));
        let b = a.clone();
        assert!(b.complete_now(Effect::succeed(9)));
        assert!(a.is_done());
        assert_eq!(a.blocking_on(), FiberId::new_for_test(3, 0));
    }
}
