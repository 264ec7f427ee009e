//! The fiber state machine.
//!
//! A [`FiberRuntime`] owns a mailbox and a set of drainer-owned state. Any
//! thread may [`tell`](FiberRuntime::tell) it a message; the first sender to
//! flip the `running` gate schedules a drain on the fiber's scheduler. The
//! drainer is the only thread that touches the fiber's state, so the state
//! lock is never contended.
//!
//! # Lifecycle
//!
//! ```text
//! created ──Resume──▶ Running ⇄ Suspended ──exit──▶ Done
//! ```
//!
//! Running means the run loop is interpreting instructions. A fiber suspends
//! on `Async`, and on cooperative yields it hands its thread back to the
//! scheduler with a `Resume` queued behind a `YieldNow`. The exit is committed
//! exactly once, after every child has been interrupted and awaited.
//!
//! # Run loop
//!
//! The run loop is an explicit trampoline over a continuation stack:
//! nested instructions push frames instead of recursing, so arbitrarily long
//! `flat_map` chains and loops run in constant native stack.

use super::config::UnhandledErrorLog;
use super::continuation::Continuation;
use super::fiber_ref::{interrupted_cause, FiberRef};
use super::fiber_refs::FiberRefs;
use super::message::{FiberMessage, StatefulMessage};
use super::resume::AsyncResume;
use super::scheduler::Scheduler;
use super::scope::FiberScope;
use super::status::FiberStatus;
use super::supervisor::Supervisor;
use crate::effect::instruction::ScopeFn;
use crate::effect::Instruction;
use crate::observability::metrics::FiberMetrics;
use crate::sync::deferred::DeferredCell;
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::{
    Cause, Data, Defect, Exit, FiberId, RuntimeFlag, RuntimeFlags, RuntimeFlagsPatch, Value,
};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Shared handle to a running fiber.
pub type RuntimeFiber = Arc<FiberRuntime>;

type Observer = Box<dyn FnOnce(&Exit<Value, Value>) + Send>;

/// Services shared by every fiber of one runtime.
pub(crate) struct RuntimeContext {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) supervisor: Arc<dyn Supervisor>,
    pub(crate) metrics: Arc<FiberMetrics>,
    pub(crate) ops_budget: usize,
    pub(crate) unhandled_error_log: UnhandledErrorLog,
}

impl RuntimeContext {
    /// The same services driven by a different scheduler.
    pub(crate) fn with_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            supervisor: Arc::clone(&self.supervisor),
            metrics: Arc::clone(&self.metrics),
            ops_budget: self.ops_budget,
            unhandled_error_log: self.unhandled_error_log,
        }
    }
}

/// State owned by whichever thread is currently draining the fiber.
pub(crate) struct FiberState {
    refs: FiberRefs,
    flags: RuntimeFlags,
    stack: SmallVec<[Continuation; 8]>,
    children: BTreeMap<FiberId, RuntimeFiber>,
    observers: Vec<Observer>,
    async_interruptor: Option<AsyncResume>,
    async_blocking_on: FiberId,
    is_yielding: bool,
    op_count: usize,
}

impl FiberState {
    fn new(refs: FiberRefs, flags: RuntimeFlags) -> Self {
        Self {
            refs,
            flags,
            stack: SmallVec::new(),
            children: BTreeMap::new(),
            observers: Vec::new(),
            async_interruptor: None,
            async_blocking_on: FiberId::None,
            is_yielding: false,
            op_count: 0,
        }
    }

    fn interrupted_cause(&self) -> Cause<Value> {
        self.refs.get_or_default(interrupted_cause())
    }

    fn is_interrupted(&self) -> bool {
        !self.interrupted_cause().is_empty()
    }

    fn should_interrupt(&self) -> bool {
        self.flags.interruptible() && self.is_interrupted()
    }
}

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainSignal {
    Continue,
    YieldNow,
    Done,
}

/// How a run-loop pass ended.
enum LoopOutcome {
    /// Waiting on an `Async` completion.
    Suspended,
    /// Reached a `YieldNow`.
    Yielded,
    /// The continuation stack is empty.
    Done(Exit<Value, Value>),
}

/// What the continuation stack produced for a value or cause.
enum Next {
    Run(Instruction),
    Exit(Exit<Value, Value>),
}

fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Defect::from_panic(payload.as_ref()))
}

fn call(f: impl FnOnce() -> Instruction) -> Instruction {
    guarded(f).unwrap_or_else(Instruction::die)
}

thread_local! {
    static CURRENT_FIBER: RefCell<Option<RuntimeFiber>> = const { RefCell::new(None) };
}

/// Installs a fiber as the thread's current fiber for the duration of a
/// drain, restoring the previous one on drop.
struct CurrentFiberGuard {
    previous: Option<RuntimeFiber>,
}

impl CurrentFiberGuard {
    fn enter(fiber: &RuntimeFiber) -> Self {
        let previous = CURRENT_FIBER.with(|cell| cell.replace(Some(Arc::clone(fiber))));
        Self { previous }
    }
}

impl Drop for CurrentFiberGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_FIBER.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// The fiber being drained on this thread, if the `CurrentFiber` flag is on.
#[must_use]
pub fn current_fiber() -> Option<RuntimeFiber> {
    CURRENT_FIBER.with(|cell| cell.borrow().clone())
}

/// Identity of the fiber being drained on this thread.
#[must_use]
pub fn current_fiber_id() -> Option<FiberId> {
    CURRENT_FIBER.with(|cell| cell.borrow().as_ref().map(|fiber| fiber.id))
}

/// A lightweight thread of execution.
pub struct FiberRuntime {
    id: FiberId,
    context: Arc<RuntimeContext>,
    queue: SegQueue<FiberMessage>,
    running: AtomicBool,
    state: Mutex<FiberState>,
    exit: OnceLock<Exit<Value, Value>>,
    final_state: OnceLock<(FiberRefs, RuntimeFlags)>,
    exit_signal: Arc<DeferredCell>,
}

impl FiberRuntime {
    pub(crate) fn new(
        id: FiberId,
        context: Arc<RuntimeContext>,
        refs: FiberRefs,
        flags: RuntimeFlags,
    ) -> RuntimeFiber {
        Arc::new(Self {
            id,
            context,
            queue: SegQueue::new(),
            running: AtomicBool::new(false),
            state: Mutex::new(FiberState::new(refs, flags)),
            exit: OnceLock::new(),
            final_state: OnceLock::new(),
            exit_signal: Arc::new(DeferredCell::new()),
        })
    }

    /// Identity of this fiber.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// The exit, if the fiber has completed.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<Value, Value>> {
        self.exit.get().cloned()
    }

    /// Returns `true` once the exit has been committed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.exit.get().is_some()
    }

    /// Refs and flags the fiber ended with.
    pub(crate) fn final_state(&self) -> Option<&(FiberRefs, RuntimeFlags)> {
        self.final_state.get()
    }

    // =========================================================================
    // Mailbox
    // =========================================================================

    /// Delivers `message` to the fiber's mailbox. Callable from any thread.
    pub fn tell(self: &Arc<Self>, message: FiberMessage) {
        self.queue.push(message);
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.drain_later();
        }
    }

    fn drain_later(self: &Arc<Self>) {
        let fiber = Arc::clone(self);
        self.context
            .scheduler
            .schedule(Box::new(move || fiber.drain_on_current_thread()));
    }

    /// Drains the mailbox on the calling thread. Must only be called by the
    /// holder of the `running` gate.
    fn drain_on_current_thread(self: &Arc<Self>) {
        loop {
            let signal = {
                let mut state = self.state.lock();
                let _current = state
                    .flags
                    .current_fiber()
                    .then(|| CurrentFiberGuard::enter(self));
                self.drain_queue_on_current_thread(&mut state)
            };
            self.running.store(false, Ordering::SeqCst);

            if self.queue.is_empty()
                || self
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                return;
            }
            if signal == DrainSignal::YieldNow {
                self.drain_later();
                return;
            }
        }
    }

    fn drain_queue_on_current_thread(self: &Arc<Self>, state: &mut FiberState) -> DrainSignal {
        loop {
            let Some(message) = self.queue.pop() else {
                return DrainSignal::Done;
            };
            match self.evaluate_message_while_suspended(state, message) {
                DrainSignal::Continue => {}
                other => return other,
            }
        }
    }

    fn evaluate_message_while_suspended(
        self: &Arc<Self>,
        state: &mut FiberState,
        message: FiberMessage,
    ) -> DrainSignal {
        match message {
            FiberMessage::YieldNow => DrainSignal::YieldNow,
            FiberMessage::InterruptSignal(cause) => {
                self.process_new_interrupt_signal(state, &cause);
                if state.flags.interruptible() {
                    if let Some(interruptor) = state.async_interruptor.take() {
                        interruptor.resume(Instruction::Failure(cause));
                    }
                }
                DrainSignal::Continue
            }
            FiberMessage::Resume(effect) => {
                state.async_interruptor = None;
                state.async_blocking_on = FiberId::None;
                if self.is_done() {
                    trace!(fiber_id = %self.id, "resume ignored: fiber already exited");
                } else {
                    self.evaluate_effect(state, effect);
                }
                DrainSignal::Continue
            }
            FiberMessage::Stateful(f) => {
                let status = if self.is_done() {
                    FiberStatus::Done
                } else {
                    FiberStatus::Suspended {
                        flags: state.flags,
                        blocking_on: state.async_blocking_on,
                    }
                };
                self.run_stateful_message(state, f, status);
                DrainSignal::Continue
            }
        }
    }

    fn run_stateful_message(
        self: &Arc<Self>,
        state: &mut FiberState,
        f: StatefulMessage,
        status: FiberStatus,
    ) {
        let mut ctx = FiberContext {
            fiber: self,
            state: &mut *state,
        };
        if let Err(defect) = guarded(|| f(&mut ctx, status)) {
            error!(fiber_id = %self.id, %defect, "stateful message panicked");
        }
    }

    fn process_new_interrupt_signal(&self, state: &mut FiberState, cause: &Cause<Value>) {
        debug!(fiber_id = %self.id, cause = ?cause, "interrupt signal");
        let combined = Cause::then(state.interrupted_cause(), cause.clone());
        state
            .refs
            .set_value(self.id, interrupted_cause().key(), Value::new(combined));
        for child in state.children.values() {
            child.tell(FiberMessage::interrupt(self.id));
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Starts a root fiber on the calling thread.
    pub(crate) fn start(self: &Arc<Self>, effect: Instruction) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.tell(FiberMessage::Resume(effect));
            return;
        }
        {
            let mut state = self.state.lock();
            let _current = state
                .flags
                .current_fiber()
                .then(|| CurrentFiberGuard::enter(self));
            self.evaluate_effect(&mut state, effect);
        }
        self.running.store(false, Ordering::SeqCst);
        if !self.queue.is_empty()
            && self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.drain_later();
        }
    }

    fn evaluate_effect(self: &Arc<Self>, state: &mut FiberState, effect: Instruction) {
        self.context.supervisor.on_resume(self);

        let mut cur = if state.should_interrupt() {
            Instruction::Failure(state.interrupted_cause())
        } else {
            effect
        };

        loop {
            match self.run_loop(state, cur) {
                LoopOutcome::Suspended => break,
                LoopOutcome::Yielded => {
                    if state.flags.cooperative_yielding() {
                        self.tell(FiberMessage::YieldNow);
                        self.tell(FiberMessage::Resume(Instruction::unit()));
                        break;
                    }
                    cur = Instruction::unit();
                }
                LoopOutcome::Done(exit) => {
                    state.flags = state.flags.enable(RuntimeFlag::WindDown);
                    if let Some(wait) = self.interrupt_all_children(state) {
                        let on_failure = exit.clone();
                        cur = wait.match_cause(
                            move |_| Instruction::from_exit(on_failure.clone()),
                            move |_| Instruction::from_exit(exit.clone()),
                        );
                        continue;
                    }
                    if self.queue.is_empty() {
                        self.set_exit_value(state, exit);
                    } else {
                        self.tell(FiberMessage::Resume(Instruction::from_exit(exit)));
                    }
                    break;
                }
            }
        }

        self.context.supervisor.on_suspend(self);
    }

    fn run_loop(self: &Arc<Self>, state: &mut FiberState, mut cur: Instruction) -> LoopOutcome {
        state.op_count = 0;

        loop {
            if state.flags.op_supervision() {
                self.context.supervisor.on_effect(self, &cur);
            }

            if !self.queue.is_empty() {
                cur = self.drain_queue_while_running(state, cur);
            }

            // Resolved values only unwind the stack, so they are not counted.
            // A resumed fiber always runs at least one instruction.
            if !state.is_yielding && !cur.is_resolved() {
                state.op_count += 1;
                if state.op_count > self.context.ops_budget {
                    state.is_yielding = true;
                    state.op_count = 0;
                    trace!(fiber_id = %self.id, "ops budget exhausted, yielding");
                    let resumed = cur;
                    cur = Instruction::YieldNow.flat_map(move |_| resumed.clone());
                }
            }

            cur = match cur {
                Instruction::Success(value) => match self.next_success(state, value) {
                    Next::Run(next) => next,
                    Next::Exit(exit) => return LoopOutcome::Done(exit),
                },
                Instruction::Failure(cause) => match self.next_failure(state, cause) {
                    Next::Run(next) => next,
                    Next::Exit(exit) => return LoopOutcome::Done(exit),
                },
                Instruction::Sync(thunk) => match guarded(|| thunk()) {
                    Ok(Ok(value)) => match self.next_success(state, value) {
                        Next::Run(next) => next,
                        Next::Exit(exit) => return LoopOutcome::Done(exit),
                    },
                    Ok(Err(cause)) => Instruction::Failure(cause),
                    Err(defect) => Instruction::die(defect),
                },
                Instruction::OnSuccess { first, on_success } => {
                    state.stack.push(Continuation::OnSuccess(on_success));
                    Arc::unwrap_or_clone(first)
                }
                Instruction::OnFailure { first, on_failure } => {
                    state.stack.push(Continuation::OnFailure(on_failure));
                    Arc::unwrap_or_clone(first)
                }
                Instruction::OnSuccessAndFailure {
                    first,
                    on_failure,
                    on_success,
                } => {
                    state.stack.push(Continuation::OnSuccessAndFailure {
                        on_failure,
                        on_success,
                    });
                    Arc::unwrap_or_clone(first)
                }
                Instruction::UpdateRuntimeFlags(patch) => self.update_flags(state, patch, None),
                Instruction::UpdateRuntimeFlagsWithin { patch, scope } => {
                    self.update_flags(state, patch, Some(scope))
                }
                Instruction::WhileLoop { check, body, step } => match guarded(|| check()) {
                    Ok(true) => {
                        let next = Arc::clone(&body);
                        state
                            .stack
                            .push(Continuation::WhileLoop { check, body, step });
                        call(|| next())
                    }
                    Ok(false) => Instruction::unit(),
                    Err(defect) => Instruction::die(defect),
                },
                Instruction::Stateful(f) => {
                    let status = FiberStatus::Running { flags: state.flags };
                    let mut ctx = FiberContext {
                        fiber: self,
                        state: &mut *state,
                    };
                    call(|| f(&mut ctx, status))
                }
                Instruction::Async {
                    register,
                    blocking_on,
                } => {
                    let resume = AsyncResume::new(Arc::clone(self));
                    state.async_blocking_on = blocking_on;
                    if state.flags.interruptible() {
                        state.async_interruptor = Some(resume.clone());
                    }
                    let handle = resume.clone();
                    if let Err(defect) = guarded(|| register(handle)) {
                        resume.resume(Instruction::die(defect));
                    }
                    match resume.finish_registration() {
                        Some(next) => {
                            state.async_interruptor = None;
                            state.async_blocking_on = FiberId::None;
                            next
                        }
                        None => return LoopOutcome::Suspended,
                    }
                }
                Instruction::YieldNow => {
                    state.is_yielding = false;
                    return LoopOutcome::Yielded;
                }
            };
        }
    }

    fn drain_queue_while_running(
        self: &Arc<Self>,
        state: &mut FiberState,
        mut cur: Instruction,
    ) -> Instruction {
        while let Some(message) = self.queue.pop() {
            match message {
                FiberMessage::InterruptSignal(cause) => {
                    self.process_new_interrupt_signal(state, &cause);
                    if state.flags.interruptible() {
                        state.is_yielding = false;
                        cur = Instruction::Failure(cause);
                    }
                }
                FiberMessage::Resume(_) => {
                    error!(fiber_id = %self.id, "resume message received while the fiber is running");
                    state.is_yielding = false;
                    cur = Instruction::die(Defect::new(
                        "a fiber cannot be resumed while it is running",
                    ));
                }
                FiberMessage::Stateful(f) => {
                    let status = FiberStatus::Running { flags: state.flags };
                    self.run_stateful_message(state, f, status);
                }
                FiberMessage::YieldNow => {
                    let resumed = cur;
                    cur = Instruction::YieldNow.flat_map(move |_| resumed.clone());
                }
            }
        }
        cur
    }

    fn update_flags(
        &self,
        state: &mut FiberState,
        patch: RuntimeFlagsPatch,
        scope: Option<ScopeFn>,
    ) -> Instruction {
        let old = state.flags;
        let new = old.patch(patch);
        if new == old {
            return match scope {
                Some(scope) => call(|| scope(old)),
                None => Instruction::unit(),
            };
        }
        if new.interruptible() && state.is_interrupted() {
            return Instruction::Failure(state.interrupted_cause());
        }
        state.flags = new;
        match scope {
            Some(scope) => {
                state.stack.push(Continuation::RevertFlags(new.diff(old)));
                call(|| scope(old))
            }
            None => Instruction::unit(),
        }
    }

    fn next_success(&self, state: &mut FiberState, value: Value) -> Next {
        loop {
            match state.stack.pop() {
                None => return Next::Exit(Exit::Success(value)),
                Some(
                    Continuation::OnSuccess(f)
                    | Continuation::OnSuccessAndFailure { on_success: f, .. },
                ) => return Next::Run(call(|| f(value))),
                Some(Continuation::OnFailure(_)) => {}
                Some(Continuation::RevertFlags(patch)) => {
                    state.flags = state.flags.patch(patch);
                    if state.should_interrupt() {
                        return Next::Run(Instruction::Failure(state.interrupted_cause()));
                    }
                }
                Some(Continuation::WhileLoop { check, body, step }) => {
                    if let Err(defect) = guarded(|| step(value)) {
                        return Next::Run(Instruction::die(defect));
                    }
                    return Next::Run(match guarded(|| check()) {
                        Ok(true) => {
                            let next = Arc::clone(&body);
                            state
                                .stack
                                .push(Continuation::WhileLoop { check, body, step });
                            call(|| next())
                        }
                        Ok(false) => Instruction::unit(),
                        Err(defect) => Instruction::die(defect),
                    });
                }
            }
        }
    }

    fn next_failure(&self, state: &mut FiberState, mut cause: Cause<Value>) -> Next {
        loop {
            match state.stack.pop() {
                None => return Next::Exit(Exit::Failure(cause)),
                Some(Continuation::OnSuccess(_) | Continuation::WhileLoop { .. }) => {}
                Some(
                    Continuation::OnFailure(f)
                    | Continuation::OnSuccessAndFailure { on_failure: f, .. },
                ) => {
                    if !state.should_interrupt() {
                        return Next::Run(call(|| f(cause)));
                    }
                    let stripped = cause.strip_failures();
                    cause = if stripped.is_interrupted() {
                        stripped
                    } else {
                        Cause::then(stripped, state.interrupted_cause())
                    };
                }
                Some(Continuation::RevertFlags(patch)) => {
                    state.flags = state.flags.patch(patch);
                    if state.should_interrupt() && !cause.is_interrupted() {
                        cause = Cause::then(cause, state.interrupted_cause());
                    }
                }
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Interrupts every child and returns an instruction awaiting them all.
    fn interrupt_all_children(&self, state: &mut FiberState) -> Option<Instruction> {
        let children: Vec<RuntimeFiber> = mem::take(&mut state.children)
            .into_values()
            .filter(|child| !child.is_done())
            .collect();
        if children.is_empty() {
            return None;
        }
        for child in &children {
            child.tell(FiberMessage::interrupt(self.id));
        }
        let wait = children
            .iter()
            .fold(Instruction::unit(), |acc, child| {
                acc.zip_right(child.await_exit_instruction())
            });
        Some(wait)
    }

    fn set_exit_value(&self, state: &mut FiberState, exit: Exit<Value, Value>) {
        if state.flags.runtime_metrics() {
            self.context.metrics.record_exit(&exit, self.id.lifetime_millis());
        }
        self.log_unhandled(&exit);

        let _ = self.final_state.set((state.refs.clone(), state.flags));
        if self.exit.set(exit.clone()).is_err() {
            return;
        }
        debug!(fiber_id = %self.id, success = exit.is_success(), "fiber exited");

        for observer in mem::take(&mut state.observers) {
            if let Err(defect) = guarded(|| observer(&exit)) {
                error!(fiber_id = %self.id, %defect, "exit observer panicked");
            }
        }
        self.exit_signal
            .complete(&Instruction::Success(Value::new(exit)));
    }

    fn log_unhandled(&self, exit: &Exit<Value, Value>) {
        let Exit::Failure(cause) = exit else {
            return;
        };
        if cause.is_interrupted_only() {
            return;
        }
        match self.context.unhandled_error_log {
            UnhandledErrorLog::Off => {}
            UnhandledErrorLog::Debug => {
                debug!(fiber_id = %self.id, cause = ?cause, "fiber failed with an unhandled error");
            }
            UnhandledErrorLog::Info => {
                info!(fiber_id = %self.id, cause = ?cause, "fiber failed with an unhandled error");
            }
            UnhandledErrorLog::Warn => {
                warn!(fiber_id = %self.id, cause = ?cause, "fiber failed with an unhandled error");
            }
            UnhandledErrorLog::Error => {
                error!(fiber_id = %self.id, cause = ?cause, "fiber failed with an unhandled error");
            }
        }
    }

    // =========================================================================
    // Forking
    // =========================================================================

    fn fork(
        self: &Arc<Self>,
        state: &mut FiberState,
        effect: Instruction,
        scope: &FiberScope,
    ) -> RuntimeFiber {
        let child_id = FiberId::next();
        let refs = state.refs.fork_as(child_id);
        let flags = state.flags.disable(RuntimeFlag::WindDown);
        let child = Self::new(child_id, Arc::clone(&self.context), refs.clone(), flags);

        self.context
            .supervisor
            .on_start(&refs, &effect, Some(self), &child);
        child.install_supervision(flags);

        match scope {
            FiberScope::Global => {}
            FiberScope::Local(owner) if Arc::ptr_eq(owner, self) => {
                let mut ctx = FiberContext {
                    fiber: self,
                    state: &mut *state,
                };
                ctx.add_child(&child);
            }
            FiberScope::Local(owner) => {
                let adopted = Arc::clone(&child);
                owner.tell(FiberMessage::stateful(move |ctx, _| ctx.add_child(&adopted)));
            }
        }

        trace!(fiber_id = %child_id, parent_id = %self.id, "fiber forked");
        child.tell(FiberMessage::Resume(effect));
        child
    }

    /// Hooks supervisor and metrics bookkeeping into a fiber that has not
    /// been started yet.
    pub(crate) fn install_supervision(self: &Arc<Self>, flags: RuntimeFlags) {
        if flags.runtime_metrics() {
            self.context.metrics.record_start();
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let supervisor = Arc::clone(&self.context.supervisor);
        self.add_observer_unstarted(Box::new(move |exit| {
            if let Some(fiber) = weak.upgrade() {
                supervisor.on_end(exit, &fiber);
            }
        }));
    }

    /// Adds an observer without going through the mailbox. Only valid before
    /// the fiber has been told anything.
    pub(crate) fn add_observer_unstarted(&self, observer: Observer) {
        self.state.lock().observers.push(observer);
    }

    // =========================================================================
    // External API
    // =========================================================================

    /// Registers `observer` to run with the fiber's exit. Runs it right away
    /// if the fiber has already exited.
    pub fn add_observer<F>(self: &Arc<Self>, observer: F)
    where
        F: FnOnce(&Exit<Value, Value>) + Send + 'static,
    {
        self.tell(FiberMessage::stateful(move |ctx, _| {
            match ctx.fiber.exit.get() {
                Some(exit) => observer(exit),
                None => ctx.state.observers.push(Box::new(observer)),
            }
        }));
    }

    /// Sends an interrupt signal attributed to `fiber_id` without waiting.
    pub fn interrupt_as_fork(self: &Arc<Self>, fiber_id: FiberId) {
        self.tell(FiberMessage::interrupt(fiber_id));
    }

    /// An instruction that suspends until this fiber exits and succeeds with
    /// its `Exit<Value, Value>`.
    #[must_use]
    pub fn await_exit_instruction(&self) -> Instruction {
        self.exit_signal.wait(self.id)
    }

    /// Runs `f` on this fiber's drainer and succeeds with its result.
    pub fn ask<T, F>(self: &Arc<Self>, f: F) -> Instruction
    where
        T: Data,
        F: Fn(&mut FiberContext<'_>, FiberStatus) -> T + Send + Sync + 'static,
    {
        let target = Arc::clone(self);
        let f = Arc::new(f);
        Instruction::async_register(
            move |resume| {
                let f = Arc::clone(&f);
                target.tell(FiberMessage::stateful(move |ctx, status| {
                    resume.resume(Instruction::Success(Value::new(f(ctx, status))));
                }));
            },
            self.id,
        )
    }

    /// An instruction that succeeds with the fiber's [`FiberStatus`].
    #[must_use]
    pub fn status(self: &Arc<Self>) -> Instruction {
        self.ask(|_, status| status)
    }

    /// An instruction that succeeds with the fiber's live children as a
    /// `Vec<RuntimeFiber>`.
    #[must_use]
    pub fn children(self: &Arc<Self>) -> Instruction {
        self.ask(|ctx, _| ctx.children())
    }
}

impl fmt::Debug for FiberRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRuntime")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Access to a fiber's drainer-owned state from `Stateful` instructions and
/// messages.
pub struct FiberContext<'a> {
    fiber: &'a RuntimeFiber,
    state: &'a mut FiberState,
}

impl FiberContext<'_> {
    /// Identity of the fiber.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.fiber.id
    }

    /// The fiber itself.
    #[must_use]
    pub fn fiber(&self) -> &RuntimeFiber {
        self.fiber
    }

    /// Flags in force.
    #[must_use]
    pub fn runtime_flags(&self) -> RuntimeFlags {
        self.state.flags
    }

    /// The fiber's fiber-local values.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefs {
        &self.state.refs
    }

    /// Merges a joined child's refs into this fiber's.
    pub fn join_fiber_refs(&mut self, child: &FiberRefs) {
        self.state.refs = self.state.refs.join_as(self.fiber.id, child);
    }

    /// Current value of `fiber_ref` in this fiber.
    #[must_use]
    pub fn get<A: Data>(&self, fiber_ref: &FiberRef<A>) -> A {
        self.state.refs.get_or_default(fiber_ref)
    }

    /// Sets `fiber_ref` in this fiber.
    pub fn set<A: Data>(&mut self, fiber_ref: &FiberRef<A>, value: A) {
        self.state
            .refs
            .set_value(self.fiber.id, fiber_ref.key(), Value::new(value));
    }

    /// Removes this fiber's explicit value of `fiber_ref`.
    pub fn delete<A: Data>(&mut self, fiber_ref: &FiberRef<A>) {
        self.state.refs.delete_value(fiber_ref.key());
    }

    /// The local scope of this fiber.
    #[must_use]
    pub fn scope(&self) -> FiberScope {
        FiberScope::Local(Arc::clone(self.fiber))
    }

    /// Forks `effect` into a new fiber registered under `scope`.
    pub fn fork(&mut self, effect: Instruction, scope: &FiberScope) -> RuntimeFiber {
        self.fiber.fork(self.state, effect, scope)
    }

    /// Live children of this fiber.
    #[must_use]
    pub fn children(&self) -> Vec<RuntimeFiber> {
        self.state.children.values().cloned().collect()
    }

    /// Registers `child` as a child of this fiber. A child added to a fiber
    /// that is already interrupted or winding down is interrupted at once.
    pub fn add_child(&mut self, child: &RuntimeFiber) {
        if child.is_done() {
            return;
        }
        if self.state.is_interrupted() || self.state.flags.wind_down() {
            child.tell(FiberMessage::interrupt(self.fiber.id));
            if self.state.flags.wind_down() {
                return;
            }
        }
        self.state.children.insert(child.id, Arc::clone(child));

        let parent = Arc::downgrade(self.fiber);
        let child_id = child.id;
        child.add_observer(move |_| {
            if let Some(parent) = parent.upgrade() {
                parent.tell(FiberMessage::stateful(move |ctx, _| ctx.remove_child(child_id)));
            }
        });
    }

    /// Deregisters a child.
    pub fn remove_child(&mut self, child: FiberId) {
        self.state.children.remove(&child);
    }
}

impl fmt::Debug for FiberContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("id", &self.fiber.id)
            .field("flags", &self.state.flags)
            .finish_non_exhaustive()
    }
}
