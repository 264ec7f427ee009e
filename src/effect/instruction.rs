//! The erased instruction set interpreted by the run loop.
//!
//! An [`Instruction`] is immutable data. Cloning one is cheap: every closure
//! and nested instruction sits behind an `Arc`. The typed
//! [`Effect`](super::Effect) API is a thin layer over these constructors.

use super::Restore;
use crate::runtime::{AsyncResume, FiberContext, FiberStatus, Resume};
use crate::types::{Cause, Defect, Exit, FiberId, RuntimeFlag, RuntimeFlags, RuntimeFlagsPatch, Value};
use core::fmt;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Continuation for a success value.
pub type SuccessFn = Arc<dyn Fn(Value) -> Instruction + Send + Sync>;
/// Continuation for a failure cause.
pub type FailureFn = Arc<dyn Fn(Cause<Value>) -> Instruction + Send + Sync>;
/// A synchronous thunk.
pub type SyncFn = Arc<dyn Fn() -> Result<Value, Cause<Value>> + Send + Sync>;
/// Registration function of an asynchronous operation.
pub type RegisterFn = Arc<dyn Fn(AsyncResume) + Send + Sync>;
/// Body of a scoped flag update, given the flags in force before the update.
pub type ScopeFn = Arc<dyn Fn(RuntimeFlags) -> Instruction + Send + Sync>;
/// Direct access to the running fiber.
pub type StatefulFn = Arc<dyn Fn(&mut FiberContext<'_>, FiberStatus) -> Instruction + Send + Sync>;
/// Loop condition.
pub type LoopCheckFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Loop body.
pub type LoopBodyFn = Arc<dyn Fn() -> Instruction + Send + Sync>;
/// Consumer of each loop body result.
pub type LoopStepFn = Arc<dyn Fn(Value) + Send + Sync>;

/// One unit of deferred computation.
#[derive(Clone)]
pub enum Instruction {
    /// An already computed value.
    Success(Value),
    /// An already computed failure.
    Failure(Cause<Value>),
    /// A synchronous thunk.
    Sync(SyncFn),
    /// A callback-based operation. The fiber suspends until it is resumed.
    Async {
        /// Called once with the resumption callback.
        register: RegisterFn,
        /// The identity the fiber is blocked on while suspended.
        blocking_on: FiberId,
    },
    /// Runs `first`, then feeds its value to `on_success`.
    OnSuccess {
        /// The instruction to run first.
        first: Arc<Instruction>,
        /// The success continuation.
        on_success: SuccessFn,
    },
    /// Runs `first`, then feeds its failure to `on_failure`.
    OnFailure {
        /// The instruction to run first.
        first: Arc<Instruction>,
        /// The failure continuation.
        on_failure: FailureFn,
    },
    /// Runs `first`, then continues with whichever continuation matches.
    OnSuccessAndFailure {
        /// The instruction to run first.
        first: Arc<Instruction>,
        /// The failure continuation.
        on_failure: FailureFn,
        /// The success continuation.
        on_success: SuccessFn,
    },
    /// Patches the fiber's runtime flags for the rest of its life.
    UpdateRuntimeFlags(RuntimeFlagsPatch),
    /// Patches the fiber's runtime flags for the duration of `scope`.
    UpdateRuntimeFlagsWithin {
        /// The patch to apply.
        patch: RuntimeFlagsPatch,
        /// The scoped body.
        scope: ScopeFn,
    },
    /// Trampolined iteration: while `check` holds, run `body` and pass its
    /// value to `step`.
    WhileLoop {
        /// Loop condition.
        check: LoopCheckFn,
        /// Loop body.
        body: LoopBodyFn,
        /// Consumer of each body result.
        step: LoopStepFn,
    },
    /// Direct access to the fiber's internals.
    Stateful(StatefulFn),
    /// Cooperative yield to the scheduler.
    YieldNow,
}

/// Tag of an [`Instruction`], for supervisors and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum InstructionKind {
    Success,
    Failure,
    Sync,
    Async,
    OnSuccess,
    OnFailure,
    OnSuccessAndFailure,
    UpdateRuntimeFlags,
    UpdateRuntimeFlagsWithin,
    WhileLoop,
    Stateful,
    YieldNow,
}

impl Instruction {
    /// The tag of this instruction.
    #[must_use]
    pub const fn kind(&self) -> InstructionKind {
        match self {
            Self::Success(_) => InstructionKind::Success,
            Self::Failure(_) => InstructionKind::Failure,
            Self::Sync(_) => InstructionKind::Sync,
            Self::Async { .. } => InstructionKind::Async,
            Self::OnSuccess { .. } => InstructionKind::OnSuccess,
            Self::OnFailure { .. } => InstructionKind::OnFailure,
            Self::OnSuccessAndFailure { .. } => InstructionKind::OnSuccessAndFailure,
            Self::UpdateRuntimeFlags(_) => InstructionKind::UpdateRuntimeFlags,
            Self::UpdateRuntimeFlagsWithin { .. } => InstructionKind::UpdateRuntimeFlagsWithin,
            Self::WhileLoop { .. } => InstructionKind::WhileLoop,
            Self::Stateful(_) => InstructionKind::Stateful,
            Self::YieldNow => InstructionKind::YieldNow,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// The unit value.
    #[must_use]
    pub fn unit() -> Self {
        Self::Success(Value::unit())
    }

    /// Returns `true` for `Success` and `Failure`.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }

    /// A failure with a defect.
    #[must_use]
    pub fn die(defect: Defect) -> Self {
        Self::Failure(Cause::Die(defect))
    }

    /// Converts an exit into the matching resolved instruction.
    #[must_use]
    pub fn from_exit(exit: Exit<Value, Value>) -> Self {
        match exit {
            Exit::Success(value) => Self::Success(value),
            Exit::Failure(cause) => Self::Failure(cause),
        }
    }

    /// A synchronous thunk.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<Value, Cause<Value>> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Defers construction of an instruction until it runs.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::OnSuccess {
            first: Arc::new(Self::unit()),
            on_success: Arc::new(move |_| f()),
        }
    }

    /// Direct access to the running fiber.
    pub fn stateful<F>(f: F) -> Self
    where
        F: Fn(&mut FiberContext<'_>, FiberStatus) -> Self + Send + Sync + 'static,
    {
        Self::Stateful(Arc::new(f))
    }

    /// A raw asynchronous operation.
    pub fn async_register<F>(register: F, blocking_on: FiberId) -> Self
    where
        F: Fn(AsyncResume) + Send + Sync + 'static,
    {
        Self::Async {
            register: Arc::new(register),
            blocking_on,
        }
    }

    /// An asynchronous operation whose registration may return a canceler.
    ///
    /// The registration runs inside the `Async` primitive, under the
    /// interrupt handler, so an interrupt that lands while it is running
    /// still finds the canceler it returned.
    pub fn async_interruptible<F>(register: F, blocking_on: FiberId) -> Self
    where
        F: Fn(Resume) -> Option<Self> + Send + Sync + 'static,
    {
        let register = Arc::new(register);
        Self::suspend(move || {
            let canceler: Arc<Mutex<Option<Self>>> = Arc::new(Mutex::new(None));
            let register = Arc::clone(&register);
            let slot = Arc::clone(&canceler);
            let primitive = Self::async_register(
                move |target| {
                    if let Some(cancel) = register(Resume::attached(target)) {
                        *slot.lock() = Some(cancel);
                    }
                },
                blocking_on,
            );
            primitive.on_interrupt(move |_| canceler.lock().take().unwrap_or_else(Self::unit))
        })
    }

    /// A scoped runtime flag update.
    pub fn update_runtime_flags_within<F>(patch: RuntimeFlagsPatch, scope: F) -> Self
    where
        F: Fn(RuntimeFlags) -> Self + Send + Sync + 'static,
    {
        Self::UpdateRuntimeFlagsWithin {
            patch,
            scope: Arc::new(scope),
        }
    }

    /// Runs `f` with interruption disabled, handing it a [`Restore`] that
    /// brings back the interruptibility that was in force before.
    pub fn uninterruptible_mask<F>(f: F) -> Self
    where
        F: Fn(Restore) -> Self + Send + Sync + 'static,
    {
        Self::update_runtime_flags_within(
            RuntimeFlagsPatch::disable(RuntimeFlag::Interruption),
            move |old| {
                f(Restore {
                    interruptible: old.interruption(),
                })
            },
        )
    }

    // =========================================================================
    // Combinators
    // =========================================================================

    /// Sequences `f` after this instruction's success.
    #[must_use]
    pub fn flat_map<F>(self, f: F) -> Self
    where
        F: Fn(Value) -> Self + Send + Sync + 'static,
    {
        Self::OnSuccess {
            first: Arc::new(self),
            on_success: Arc::new(f),
        }
    }

    /// Transforms the success value.
    #[must_use]
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.flat_map(move |v| Self::Success(f(v)))
    }

    /// Runs `next` after this instruction succeeds, keeping `next`'s value.
    #[must_use]
    pub fn zip_right(self, next: Self) -> Self {
        self.flat_map(move |_| next.clone())
    }

    /// Handles both outcomes.
    #[must_use]
    pub fn match_cause<F, S>(self, on_failure: F, on_success: S) -> Self
    where
        F: Fn(Cause<Value>) -> Self + Send + Sync + 'static,
        S: Fn(Value) -> Self + Send + Sync + 'static,
    {
        Self::OnSuccessAndFailure {
            first: Arc::new(self),
            on_failure: Arc::new(on_failure),
            on_success: Arc::new(on_success),
        }
    }

    /// Recovers from any failure.
    #[must_use]
    pub fn catch_all_cause<F>(self, f: F) -> Self
    where
        F: Fn(Cause<Value>) -> Self + Send + Sync + 'static,
    {
        Self::OnFailure {
            first: Arc::new(self),
            on_failure: Arc::new(f),
        }
    }

    /// Succeeds with the erased [`Exit`] of this instruction.
    #[must_use]
    pub fn exit(self) -> Self {
        self.match_cause(
            |cause| Self::Success(Value::new(Exit::<Value, Value>::Failure(cause))),
            |value| Self::Success(Value::new(Exit::<Value, Value>::Success(value))),
        )
    }

    /// Runs this instruction with interruption enabled.
    #[must_use]
    pub fn interruptible(self) -> Self {
        Self::update_runtime_flags_within(
            RuntimeFlagsPatch::enable(RuntimeFlag::Interruption),
            move |_| self.clone(),
        )
    }

    /// Runs this instruction with interruption disabled.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Self::update_runtime_flags_within(
            RuntimeFlagsPatch::disable(RuntimeFlag::Interruption),
            move |_| self.clone(),
        )
    }

    /// Runs `cleanup` with this instruction's exit, uninterruptibly, on every
    /// exit path. A failing cleanup is composed after the original cause.
    #[must_use]
    pub fn on_exit<F>(self, cleanup: F) -> Self
    where
        F: Fn(&Exit<Value, Value>) -> Self + Send + Sync + 'static,
    {
        let cleanup = Arc::new(cleanup);
        Self::uninterruptible_mask(move |restore| {
            let on_failure = Arc::clone(&cleanup);
            let on_success = Arc::clone(&cleanup);
            restore.apply_instruction(self.clone()).match_cause(
                move |cause| {
                    let original = cause.clone();
                    let kept = cause.clone();
                    on_failure(&Exit::Failure(cause)).match_cause(
                        move |finalizer| Self::Failure(Cause::then(original.clone(), finalizer)),
                        move |_| Self::Failure(kept.clone()),
                    )
                },
                move |value| {
                    on_success(&Exit::Success(value.clone())).zip_right(Self::Success(value))
                },
            )
        })
    }

    /// Runs `cleanup` with the interruptors if this instruction is
    /// interrupted.
    #[must_use]
    pub fn on_interrupt<F>(self, cleanup: F) -> Self
    where
        F: Fn(BTreeSet<FiberId>) -> Self + Send + Sync + 'static,
    {
        self.on_exit(move |exit| match exit {
            Exit::Failure(cause) if cause.is_interrupted() && cause.is_interrupted_only() => {
                cleanup(cause.interruptors()).map(|_| Value::unit())
            }
            _ => Self::unit(),
        })
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(v) => f.debug_tuple("Success").field(v).finish(),
            Self::Failure(c) => f.debug_tuple("Failure").field(c).finish(),
            Self::Async { blocking_on, .. } => f
                .debug_struct("Async")
                .field("blocking_on", blocking_on)
                .finish_non_exhaustive(),
            Self::UpdateRuntimeFlags(patch) => {
                f.debug_tuple("UpdateRuntimeFlags").field(patch).finish()
            }
            Self::UpdateRuntimeFlagsWithin { patch, .. } => f
                .debug_struct("UpdateRuntimeFlagsWithin")
                .field("patch", patch)
                .finish_non_exhaustive(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}
