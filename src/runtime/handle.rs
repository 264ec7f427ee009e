//! Typed fiber handles.

use super::fiber::RuntimeFiber;
use super::status::FiberStatus;
use crate::effect::{Effect, Instruction};
use crate::types::value::typed_exit;
use crate::types::{Data, Exit, FiberId, RuntimeFlag, Value};
use core::fmt;
use std::convert::Infallible;
use std::marker::PhantomData;

/// A handle to a fiber running an `Effect<A, E>`.
///
/// Handles are cheap to clone. Dropping a handle does not affect the fiber.
pub struct Fiber<A, E = Infallible> {
    runtime: RuntimeFiber,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fiber").field(&self.runtime.id()).finish()
    }
}

fn typed_exit_value<A: Data, E: Data>(value: &Value) -> Value {
    let exit = match value.downcast_ref::<Exit<Value, Value>>() {
        Some(erased) => typed_exit::<A, E>(erased),
        None => Exit::die("fiber exit lost its type"),
    };
    Value::new(exit)
}

impl<A: Data, E: Data> Fiber<A, E> {
    /// Wraps an untyped fiber. The caller vouches for its types.
    #[must_use]
    pub fn from_runtime(runtime: RuntimeFiber) -> Self {
        Self {
            runtime,
            _marker: PhantomData,
        }
    }

    /// The untyped fiber.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeFiber {
        &self.runtime
    }

    /// Identity of the fiber.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.runtime.id()
    }

    /// The exit, if the fiber has completed.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.runtime.poll().map(|exit| typed_exit(&exit))
    }

    /// Suspends until the fiber exits and succeeds with its exit.
    #[must_use]
    pub fn await_exit(&self) -> Effect<Exit<A, E>> {
        Effect::from_instruction(
            self.runtime
                .await_exit_instruction()
                .map(|value| typed_exit_value::<A, E>(&value)),
        )
    }

    /// Awaits the fiber, inherits its fiber refs and flags, and completes
    /// with its exit.
    #[must_use]
    pub fn join(&self) -> Effect<A, E> {
        let inherit = self.inherit_all();
        self.await_exit().widen_error::<E>().flat_map(move |exit| {
            inherit
                .clone()
                .widen_error::<E>()
                .and_then(Effect::from_exit(exit))
        })
    }

    /// Merges the exited fiber's refs into the running fiber and adopts its
    /// flags, except interruption and wind-down. Does nothing if the fiber has
    /// not exited.
    #[must_use]
    pub fn inherit_all(&self) -> Effect<()> {
        let child = self.runtime.clone();
        Effect::from_instruction(Instruction::stateful(move |ctx, _| {
            let Some((refs, flags)) = child.final_state() else {
                return Instruction::unit();
            };
            ctx.join_fiber_refs(refs);
            let patch = ctx
                .runtime_flags()
                .diff(*flags)
                .exclude(RuntimeFlag::Interruption)
                .exclude(RuntimeFlag::WindDown);
            Instruction::UpdateRuntimeFlags(patch)
        }))
    }

    /// Interrupts the fiber on behalf of the running fiber and awaits its exit.
    #[must_use]
    pub fn interrupt(&self) -> Effect<Exit<A, E>> {
        let this = self.clone();
        Effect::<FiberId>::fiber_id().flat_map(move |id| this.interrupt_as(id))
    }

    /// Interrupts the fiber on behalf of `fiber_id` and awaits its exit.
    #[must_use]
    pub fn interrupt_as(&self, fiber_id: FiberId) -> Effect<Exit<A, E>> {
        self.interrupt_as_fork(fiber_id).and_then(self.await_exit())
    }

    /// Sends an interrupt signal on behalf of `fiber_id` without waiting.
    #[must_use]
    pub fn interrupt_as_fork(&self, fiber_id: FiberId) -> Effect<()> {
        let runtime = self.runtime.clone();
        Effect::sync(move || runtime.interrupt_as_fork(fiber_id))
    }

    /// The fiber's current status.
    #[must_use]
    pub fn status(&self) -> Effect<FiberStatus> {
        Effect::from_instruction(self.runtime.status())
    }

    /// The fiber's live children.
    #[must_use]
    pub fn children(&self) -> Effect<Vec<RuntimeFiber>> {
        Effect::from_instruction(self.runtime.children())
    }

    /// Registers `observer` to run with the fiber's exit.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: FnOnce(&Exit<A, E>) + Send + 'static,
    {
        self.runtime
            .add_observer(move |exit| observer(&typed_exit::<A, E>(exit)));
    }
}
