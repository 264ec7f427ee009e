//! Typed effect descriptions.
//!
//! An [`Effect<A, E>`] describes a computation that, when run by a fiber,
//! either succeeds with an `A` or fails with a [`Cause<E>`]. Effects are
//! lazy and immutable; building one does nothing. Running one is the job of
//! the [`Runtime`](crate::runtime::Runtime).
//!
//! Effects are thin typed wrappers over the erased [`Instruction`] set. The
//! default error type is [`Infallible`] for effects that cannot fail with a
//! typed error.
//!
//! # Example
//!
//! ```ignore
//! use cofiber::effect::Effect;
//!
//! let program: Effect<i32, String> = Effect::succeed(20)
//!     .flat_map(|n| Effect::sync(move || n + 1))
//!     .map(|n| n * 2);
//! ```

pub mod instruction;

pub use instruction::{Instruction, InstructionKind};

use crate::runtime::handle::Fiber;
use crate::runtime::scope::FiberScope;
use crate::runtime::{FiberContext, FiberStatus, Resume};
use crate::types::value::{cast, erase_cause, erase_exit, typed_cause, typed_exit};
use crate::types::{Cause, Data, Defect, Exit, FiberId, RuntimeFlag, RuntimeFlags, RuntimeFlagsPatch, Value};
use core::fmt;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

/// Restores the interruptibility that was in force outside an
/// [`Effect::uninterruptible_mask`] region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restore {
    pub(crate) interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the outer interruptibility.
    #[must_use]
    pub fn apply<A: Data, E: Data>(self, effect: Effect<A, E>) -> Effect<A, E> {
        Effect::from_instruction(self.apply_instruction(effect.instr))
    }

    pub(crate) fn apply_instruction(self, instr: Instruction) -> Instruction {
        if self.interruptible {
            instr.interruptible()
        } else {
            instr.uninterruptible()
        }
    }
}

/// A lazily evaluated computation producing `A` or failing with `Cause<E>`.
pub struct Effect<A, E = Infallible> {
    instr: Instruction,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            instr: self.instr.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.instr).finish()
    }
}

impl<A, E> Effect<A, E> {
    /// Wraps an erased instruction. The caller vouches for its types.
    #[must_use]
    pub const fn from_instruction(instr: Instruction) -> Self {
        Self {
            instr,
            _marker: PhantomData,
        }
    }

    /// The underlying instruction.
    #[must_use]
    pub const fn instruction(&self) -> &Instruction {
        &self.instr
    }

    /// Unwraps the underlying instruction.
    #[must_use]
    pub fn into_instruction(self) -> Instruction {
        self.instr
    }
}

fn on_success_fn<A, B, E, F>(f: F) -> impl Fn(Value) -> Instruction + Send + Sync + 'static
where
    A: Data,
    F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
{
    move |value| match cast::<A>(&value) {
        Ok(a) => f(a).instr,
        Err(cause) => Instruction::Failure(cause),
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::from_instruction(Instruction::Success(Value::new(value)))
    }

    /// Fails with `error`.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::fail_cause(Cause::Fail(error))
    }

    /// Fails with `cause`.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_instruction(Instruction::Failure(erase_cause(&cause)))
    }

    /// Dies with `defect`.
    #[must_use]
    pub fn die(defect: Defect) -> Self {
        Self::from_instruction(Instruction::die(defect))
    }

    /// Dies with a defect carrying `message`.
    #[must_use]
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// Fails with an interruption by `fiber_id`.
    #[must_use]
    pub fn interrupt_as(fiber_id: FiberId) -> Self {
        Self::fail_cause(Cause::Interrupt(fiber_id))
    }

    /// Fails with an interruption by the running fiber.
    #[must_use]
    pub fn interrupt() -> Self {
        Effect::<FiberId>::fiber_id().flat_map_widen(Self::interrupt_as)
    }

    /// Completes with `exit`.
    #[must_use]
    pub fn from_exit(exit: Exit<A, E>) -> Self {
        Self::from_instruction(Instruction::from_exit(erase_exit(&exit)))
    }

    /// Evaluates `f` when run. A panic becomes a defect.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::sync(move || Ok(Value::new(f()))))
    }

    /// Evaluates a fallible `f` when run.
    pub fn try_sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::sync(move || {
            f().map(Value::new)
                .map_err(|e| Cause::Fail(Value::new(e)))
        }))
    }

    /// Builds the effect to run lazily.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::suspend(move || f().instr))
    }

    /// An effect that never completes. It can only be interrupted.
    #[must_use]
    pub fn never() -> Self {
        Self::from_instruction(Instruction::async_register(|_| {}, FiberId::None))
    }

    /// Bridges a callback-based operation.
    ///
    /// `register` runs when the effect runs. It receives a [`Callback`] that
    /// completes the effect; only the first completion counts. It may return
    /// a canceler, which runs if the fiber is interrupted while waiting.
    pub fn async_<F>(register: F) -> Self
    where
        F: Fn(Callback<A, E>) -> Option<Effect<(), Infallible>> + Send + Sync + 'static,
    {
        Self::async_blocking_on(FiberId::None, register)
    }

    /// Like [`Effect::async_`], recording `blocking_on` as the identity the
    /// fiber waits for.
    pub fn async_blocking_on<F>(blocking_on: FiberId, register: F) -> Self
    where
        F: Fn(Callback<A, E>) -> Option<Effect<(), Infallible>> + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::async_interruptible(
            move |resume| {
                register(Callback::new(resume)).map(Effect::into_instruction)
            },
            blocking_on,
        ))
    }

    /// Direct access to the running fiber.
    pub fn with_fiber<F>(f: F) -> Self
    where
        F: Fn(&mut FiberContext<'_>, FiberStatus) -> Self + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::stateful(move |ctx, status| f(ctx, status).instr))
    }

    /// Runs `f` uninterruptibly with a [`Restore`] for the outer
    /// interruptibility.
    pub fn uninterruptible_mask<F>(f: F) -> Self
    where
        F: Fn(Restore) -> Self + Send + Sync + 'static,
    {
        Self::from_instruction(Instruction::uninterruptible_mask(move |restore| f(restore).instr))
    }

    /// Acquires a resource uninterruptibly, uses it with the outer
    /// interruptibility, and releases it uninterruptibly on every exit path.
    pub fn acquire_use_release<R, U, Rel>(acquire: Effect<R, E>, use_: U, release: Rel) -> Self
    where
        R: Data,
        U: Fn(R) -> Self + Send + Sync + 'static,
        Rel: Fn(R, Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let use_ = Arc::new(use_);
        let release = Arc::new(release);
        Self::uninterruptible_mask(move |restore| {
            let use_ = Arc::clone(&use_);
            let release = Arc::clone(&release);
            acquire.clone().flat_map(move |resource: R| {
                let used = restore.apply(use_(resource.clone()));
                let release = Arc::clone(&release);
                used.exit().widen_error::<E>().flat_map(move |exit: Exit<A, E>| {
                    let finished = exit.clone();
                    release(resource.clone(), exit.clone())
                        .widen_error::<E>()
                        .match_cause_effect(
                            move |cause: Cause<E>| match &finished {
                                Exit::Failure(original) => {
                                    Self::fail_cause(Cause::then(original.clone(), cause))
                                }
                                Exit::Success(_) => Self::fail_cause(cause),
                            },
                            move |()| Self::from_exit(exit.clone()),
                        )
                })
            })
        })
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Transforms the success value.
    #[must_use]
    pub fn map<B: Data, F>(self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.flat_map(move |a| Effect::succeed(f(a)))
    }

    /// Transforms typed failures.
    #[must_use]
    pub fn map_error<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Effect::from_instruction(self.instr.catch_all_cause(move |cause| {
            let typed: Cause<E> = typed_cause(&cause);
            Instruction::Failure(erase_cause(&typed.map(|e| f(e))))
        }))
    }

    /// Replaces the success value.
    #[must_use]
    pub fn as_value<B: Data>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Discards the success value.
    #[must_use]
    pub fn as_unit(self) -> Effect<(), E> {
        self.as_value(())
    }

    /// Sequences `f` after success.
    #[must_use]
    pub fn flat_map<B: Data, F>(self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        Effect::from_instruction(self.instr.flat_map(on_success_fn(f)))
    }

    /// Runs `next` after success and keeps its value.
    #[must_use]
    pub fn and_then<B: Data>(self, next: Effect<B, E>) -> Effect<B, E> {
        Effect::from_instruction(self.instr.zip_right(next.instr))
    }

    /// Runs `next` after success and keeps this effect's value.
    #[must_use]
    pub fn zip_left<B: Data>(self, next: Effect<B, E>) -> Self {
        self.flat_map(move |a| next.clone().as_value(a))
    }

    /// Runs both effects in sequence and pairs their values.
    #[must_use]
    pub fn zip<B: Data>(self, other: Effect<B, E>) -> Effect<(A, B), E> {
        self.flat_map(move |a| other.clone().map(move |b| (a.clone(), b)))
    }

    /// Recovers from typed failures. Defects and interruptions pass through.
    #[must_use]
    pub fn catch_all<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    {
        self.catch_all_cause(move |cause: Cause<E>| {
            let first = cause.first_failure().cloned();
            match first {
                Some(e) => f(e),
                None => Effect::fail_cause(cause.flat_map_failures(&mut |_| Cause::Empty)),
            }
        })
    }

    /// Recovers from any failure cause.
    #[must_use]
    pub fn catch_all_cause<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    {
        Effect::from_instruction(
            self.instr
                .catch_all_cause(move |cause| f(typed_cause(&cause)).instr),
        )
    }

    /// Continues with `on_failure` or `on_success`.
    #[must_use]
    pub fn match_cause_effect<B: Data, E2: Data, F, S>(
        self,
        on_failure: F,
        on_success: S,
    ) -> Effect<B, E2>
    where
        F: Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        Effect::from_instruction(self.instr.match_cause(
            move |cause| on_failure(typed_cause(&cause)).instr,
            on_success_fn(on_success),
        ))
    }

    /// Never fails; succeeds with this effect's [`Exit`].
    #[must_use]
    pub fn exit(self) -> Effect<Exit<A, E>> {
        Effect::from_instruction(self.instr.exit().map(|value| {
            let erased = value
                .downcast::<Exit<Value, Value>>()
                .unwrap_or_else(|| Exit::die("exit value lost its type"));
            Value::new(typed_exit::<A, E>(&erased))
        }))
    }

    // =========================================================================
    // Finalization & interruption
    // =========================================================================

    /// Runs `finalizer` after this effect on every exit path.
    #[must_use]
    pub fn ensuring(self, finalizer: Effect<(), Infallible>) -> Self {
        self.on_exit(move |_| finalizer.clone())
    }

    /// Runs `cleanup` with the exit of this effect on every exit path.
    #[must_use]
    pub fn on_exit<F>(self, cleanup: F) -> Self
    where
        F: Fn(Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_instruction(
            self.instr
                .on_exit(move |exit| cleanup(typed_exit::<A, E>(exit)).instr),
        )
    }

    /// Runs `cleanup` with the interruptors if this effect is interrupted.
    #[must_use]
    pub fn on_interrupt<F>(self, cleanup: F) -> Self
    where
        F: Fn(BTreeSet<FiberId>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_instruction(self.instr.on_interrupt(move |ids| cleanup(ids).instr))
    }

    /// Runs this effect with interruption enabled.
    #[must_use]
    pub fn interruptible(self) -> Self {
        Self::from_instruction(self.instr.interruptible())
    }

    /// Runs this effect with interruption disabled.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Self::from_instruction(self.instr.uninterruptible())
    }

    /// Runs this effect with `patch` applied to the runtime flags, restoring
    /// them afterwards.
    #[must_use]
    pub fn with_runtime_flags(self, patch: RuntimeFlagsPatch) -> Self {
        let instr = self.instr;
        Self::from_instruction(Instruction::update_runtime_flags_within(patch, move |_| {
            instr.clone()
        }))
    }

    // =========================================================================
    // Forking
    // =========================================================================

    /// Starts this effect in a child fiber of the running fiber.
    #[must_use]
    pub fn fork(self) -> Effect<Fiber<A, E>> {
        self.fork_in_scope(None)
    }

    /// Starts this effect in a fiber attached to the global scope. The fiber
    /// is not interrupted when its parent completes.
    #[must_use]
    pub fn fork_daemon(self) -> Effect<Fiber<A, E>> {
        self.fork_in_scope(Some(FiberScope::Global))
    }

    /// Starts this effect in a fiber registered under `scope`.
    #[must_use]
    pub fn fork_in(self, scope: FiberScope) -> Effect<Fiber<A, E>> {
        self.fork_in_scope(Some(scope))
    }

    fn fork_in_scope(self, scope: Option<FiberScope>) -> Effect<Fiber<A, E>> {
        let instr = self.instr;
        Effect::from_instruction(Instruction::stateful(move |ctx, _| {
            let scope = scope.clone().unwrap_or_else(|| ctx.scope());
            let child = ctx.fork(instr.clone(), &scope);
            Instruction::Success(Value::new(Fiber::<A, E>::from_runtime(child)))
        }))
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// Runs `body` while `check` holds, passing each value to `step`.
    ///
    /// The loop is trampolined: its depth does not grow the native stack.
    pub fn while_loop<C, B, S>(check: C, body: B, step: S) -> Effect<(), E>
    where
        C: Fn() -> bool + Send + Sync + 'static,
        B: Fn() -> Self + Send + Sync + 'static,
        S: Fn(A) + Send + Sync + 'static,
    {
        Effect::from_instruction(Instruction::WhileLoop {
            check: Arc::new(check),
            body: Arc::new(move || body().instr),
            step: Arc::new(move |value| {
                if let Ok(a) = cast::<A>(&value) {
                    step(a);
                }
            }),
        })
    }
}

impl<A: Data> Effect<A, Infallible> {
    /// Reinterprets an infallible effect at any error type.
    #[must_use]
    pub fn widen_error<E: Data>(self) -> Effect<A, E> {
        Effect::from_instruction(self.instr)
    }

    fn flat_map_widen<B: Data, E: Data, F>(self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        self.widen_error::<E>().flat_map(f)
    }
}

impl Effect<()> {
    /// Succeeds with `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::from_instruction(Instruction::unit())
    }

    /// Yields to the scheduler.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_instruction(Instruction::YieldNow)
    }

    /// Patches the running fiber's flags for the rest of its life.
    #[must_use]
    pub fn update_runtime_flags(patch: RuntimeFlagsPatch) -> Self {
        Self::from_instruction(Instruction::UpdateRuntimeFlags(patch))
    }

    /// Disables interruption for the rest of the fiber's life.
    #[must_use]
    pub fn disable_interruption() -> Self {
        Self::update_runtime_flags(RuntimeFlagsPatch::disable(RuntimeFlag::Interruption))
    }
}

impl Effect<FiberId> {
    /// The identity of the running fiber.
    #[must_use]
    pub fn fiber_id() -> Self {
        Self::from_instruction(Instruction::stateful(|ctx, _| {
            Instruction::Success(Value::new(ctx.id()))
        }))
    }
}

impl Effect<RuntimeFlags> {
    /// The running fiber's current flags.
    #[must_use]
    pub fn runtime_flags() -> Self {
        Self::from_instruction(Instruction::stateful(|ctx, _| {
            Instruction::Success(Value::new(ctx.runtime_flags()))
        }))
    }
}

/// Typed completion handle for [`Effect::async_`].
pub struct Callback<A, E> {
    resume: Resume,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for Callback<A, E> {
    fn clone(&self) -> Self {
        Self {
            resume: self.resume.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Callback<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.resume).finish()
    }
}

impl<A: Data, E: Data> Callback<A, E> {
    fn new(resume: Resume) -> Self {
        Self {
            resume,
            _marker: PhantomData,
        }
    }

    /// Completes the operation by running `effect` in the waiting fiber.
    pub fn complete(&self, effect: Effect<A, E>) {
        self.resume.resume(effect.instr);
    }

    /// Completes the operation with `value`.
    pub fn succeed(&self, value: A) {
        self.complete(Effect::succeed(value));
    }

    /// Completes the operation with a typed failure.
    pub fn fail(&self, error: E) {
        self.complete(Effect::fail(error));
    }

    /// Completes the operation with `exit`.
    pub fn done(&self, exit: Exit<A, E>) {
        self.complete(Effect::from_exit(exit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_runtime;
    use parking_lot::Mutex;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    // =========================================================================
    // Sequencing and recovery
    // =========================================================================

    #[test]
    fn map_flat_map_and_zip_sequence_values() {
        init_test("map_flat_map_and_zip_sequence_values");
        let runtime = test_runtime();
        let program = Effect::<i32, String>::succeed(2)
            .map(|n| n * 10)
            .flat_map(|n| Effect::sync(move || n + 1))
            .zip(Effect::succeed("x"))
            .zip_left(Effect::succeed(()));
        let exit = runtime.block_on(program);
        assert_eq!(exit, Exit::Success((21, "x")));
        crate::test_complete!("map_flat_map_and_zip_sequence_values");
    }

    #[test]
    fn catch_all_recovers_typed_failures() {
        init_test("catch_all_recovers_typed_failures");
        let runtime = test_runtime();
        let program = Effect::<usize, String>::fail("oops".into())
            .catch_all(|e| Effect::<usize, ()>::succeed(e.len()));
        assert_eq!(runtime.block_on(program), Exit::Success(4));
        crate::test_complete!("catch_all_recovers_typed_failures");
    }

    #[test]
    fn catch_all_lets_defects_through() {
        init_test("catch_all_lets_defects_through");
        let runtime = test_runtime();
        let program = Effect::<usize, String>::die_message("broken")
            .catch_all(|_| Effect::<usize, ()>::succeed(0));
        let exit = runtime.block_on(program);
        assert!(exit.cause().is_some_and(Cause::is_die));
        crate::test_complete!("catch_all_lets_defects_through");
    }

    #[test]
    fn map_error_rewrites_failures() {
        init_test("map_error_rewrites_failures");
        let runtime = test_runtime();
        let program = Effect::<(), i32>::fail(4).map_error(|e| format!("code {e}"));
        assert_eq!(runtime.block_on(program), Exit::fail("code 4".to_string()));
        crate::test_complete!("map_error_rewrites_failures");
    }

    #[test]
    fn exit_reifies_failures() {
        init_test("exit_reifies_failures");
        let runtime = test_runtime();
        let program = Effect::<(), &'static str>::fail("bad").exit();
        assert_eq!(runtime.block_on(program), Exit::Success(Exit::fail("bad")));
        crate::test_complete!("exit_reifies_failures");
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    #[test]
    fn acquire_use_release_releases_after_failure() {
        init_test("acquire_use_release_releases_after_failure");
        let runtime = test_runtime();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let (a, u, r) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));

        let program = Effect::<(), String>::acquire_use_release(
            Effect::sync(move || {
                a.lock().push("acquire".into());
                7_u32
            }),
            move |resource| {
                u.lock().push(format!("use {resource}"));
                Effect::fail("boom".into())
            },
            move |resource, exit| {
                let r = Arc::clone(&r);
                Effect::sync(move || {
                    r.lock()
                        .push(format!("release {resource} failed={}", exit.is_failure()));
                })
            },
        );

        assert_eq!(runtime.block_on(program), Exit::fail("boom".to_string()));
        assert_eq!(
            *log.lock(),
            vec!["acquire", "use 7", "release 7 failed=true"]
        );
        crate::test_complete!("acquire_use_release_releases_after_failure");
    }

    #[test]
    fn on_interrupt_sees_interruptors() {
        init_test("on_interrupt_sees_interruptors");
        let runtime = test_runtime();
        let seen = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&seen);
        let interruptor = FiberId::new_for_test(77, 0);
        let program = Effect::<()>::interrupt_as(interruptor).on_interrupt(move |ids| {
            let sink = Arc::clone(&sink);
            Effect::sync(move || sink.lock().extend(ids.iter().copied()))
        });
        assert!(runtime.block_on(program).is_interrupted());
        assert!(seen.lock().contains(&interruptor));
        crate::test_complete!("on_interrupt_sees_interruptors");
    }

    // =========================================================================
    // Flags and forking
    // =========================================================================

    #[test]
    fn with_runtime_flags_is_scoped() {
        init_test("with_runtime_flags_is_scoped");
        let runtime = test_runtime();
        let program = Effect::runtime_flags()
            .with_runtime_flags(RuntimeFlagsPatch::disable(RuntimeFlag::Interruption))
            .zip(Effect::runtime_flags());
        let Exit::Success((inner, outer)) = runtime.block_on(program) else {
            panic!("expected success");
        };
        assert!(!inner.interruption());
        assert!(outer.interruption());
        crate::test_complete!("with_runtime_flags_is_scoped");
    }

    #[test]
    fn fork_then_join_returns_the_child_value() {
        init_test("fork_then_join_returns_the_child_value");
        let runtime = test_runtime();
        let program = Effect::<u64, String>::sync(|| 40)
            .map(|n| n + 2)
            .fork()
            .widen_error::<String>()
            .flat_map(|fiber| fiber.join());
        assert_eq!(runtime.block_on(program), Exit::Success(42));
        crate::test_complete!("fork_then_join_returns_the_child_value");
    }

    #[test]
    fn async_callback_completes_once() {
        init_test("async_callback_completes_once");
        let runtime = test_runtime();
        let program = Effect::<u8, String>::async_(|callback| {
            callback.succeed(1);
            callback.succeed(2);
            None
        });
        assert_eq!(runtime.block_on(program), Exit::Success(1));
        crate::test_complete!("async_callback_completes_once");
    }
}
