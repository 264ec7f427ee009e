//! Fiber lifecycle hooks.
//!
//! A [`Supervisor`] is told when fibers start, end, suspend and resume, and,
//! with the `OpSupervision` flag on, about every instruction a fiber runs.
//! Hooks are called on the thread draining the fiber and must not block.

use super::fiber::RuntimeFiber;
use super::fiber_refs::FiberRefs;
use crate::effect::Instruction;
use crate::types::{Exit, FiberId, Value};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer of fiber lifecycles. Every hook defaults to a no-op.
pub trait Supervisor: Send + Sync {
    /// A fiber was created and is about to start.
    fn on_start(
        &self,
        _refs: &FiberRefs,
        _effect: &Instruction,
        _parent: Option<&RuntimeFiber>,
        _fiber: &RuntimeFiber,
    ) {
    }

    /// A fiber committed its exit.
    fn on_end(&self, _exit: &Exit<Value, Value>, _fiber: &RuntimeFiber) {}

    /// A fiber is about to run an instruction.
    fn on_effect(&self, _fiber: &RuntimeFiber, _effect: &Instruction) {}

    /// A fiber stopped running: it suspended, yielded or exited.
    fn on_suspend(&self, _fiber: &RuntimeFiber) {}

    /// A fiber started running again.
    fn on_resume(&self, _fiber: &RuntimeFiber) {}
}

/// Extension methods for supervisors.
pub trait SupervisorExt: Supervisor + Sized + 'static {
    /// Fans every hook out to `self`, then `other`.
    fn zip<S: Supervisor + 'static>(self, other: S) -> ZipSupervisor {
        ZipSupervisor::new(Arc::new(self), Arc::new(other))
    }
}

impl<S: Supervisor + Sized + 'static> SupervisorExt for S {}

/// A supervisor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSupervisor;

impl Supervisor for NoopSupervisor {}

/// Calls two supervisors in order.
#[derive(Clone)]
pub struct ZipSupervisor {
    left: Arc<dyn Supervisor>,
    right: Arc<dyn Supervisor>,
}

impl ZipSupervisor {
    /// Combines `left` and `right`.
    #[must_use]
    pub fn new(left: Arc<dyn Supervisor>, right: Arc<dyn Supervisor>) -> Self {
        Self { left, right }
    }
}

impl fmt::Debug for ZipSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipSupervisor").finish_non_exhaustive()
    }
}

impl Supervisor for ZipSupervisor {
    fn on_start(
        &self,
        refs: &FiberRefs,
        effect: &Instruction,
        parent: Option<&RuntimeFiber>,
        fiber: &RuntimeFiber,
    ) {
        self.left.on_start(refs, effect, parent, fiber);
        self.right.on_start(refs, effect, parent, fiber);
    }

    fn on_end(&self, exit: &Exit<Value, Value>, fiber: &RuntimeFiber) {
        self.left.on_end(exit, fiber);
        self.right.on_end(exit, fiber);
    }

    fn on_effect(&self, fiber: &RuntimeFiber, effect: &Instruction) {
        self.left.on_effect(fiber, effect);
        self.right.on_effect(fiber, effect);
    }

    fn on_suspend(&self, fiber: &RuntimeFiber) {
        self.left.on_suspend(fiber);
        self.right.on_suspend(fiber);
    }

    fn on_resume(&self, fiber: &RuntimeFiber) {
        self.left.on_resume(fiber);
        self.right.on_resume(fiber);
    }
}

/// Lifecycle counts recorded by a [`TrackingSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleCounts {
    /// Fibers started.
    pub started: u64,
    /// Fibers ended.
    pub ended: u64,
    /// Fibers that ended with a failure.
    pub failed: u64,
    /// Suspensions observed.
    pub suspends: u64,
    /// Resumptions observed.
    pub resumes: u64,
    /// Instructions observed.
    pub effects: u64,
}

/// Records live fibers and lifecycle counts.
#[derive(Default)]
pub struct TrackingSupervisor {
    live: Mutex<BTreeMap<FiberId, Option<FiberId>>>,
    started: AtomicU64,
    ended: AtomicU64,
    failed: AtomicU64,
    suspends: AtomicU64,
    resumes: AtomicU64,
    effects: AtomicU64,
}

impl TrackingSupervisor {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fibers started and not yet ended, in id order.
    #[must_use]
    pub fn live_fibers(&self) -> Vec<FiberId> {
        self.live.lock().keys().copied().collect()
    }

    /// The parent a live fiber was forked from, if any.
    #[must_use]
    pub fn parent_of(&self, fiber: FiberId) -> Option<FiberId> {
        self.live.lock().get(&fiber).copied().flatten()
    }

    /// Current counts.
    #[must_use]
    pub fn counts(&self) -> LifecycleCounts {
        LifecycleCounts {
            started: self.started.load(Ordering::Relaxed),
            ended: self.ended.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suspends: self.suspends.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            effects: self.effects.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for TrackingSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSupervisor")
            .field("live", &self.live_fibers())
            .field("counts", &self.counts())
            .finish()
    }
}

impl Supervisor for TrackingSupervisor {
    fn on_start(
        &self,
        _refs: &FiberRefs,
        _effect: &Instruction,
        parent: Option<&RuntimeFiber>,
        fiber: &RuntimeFiber,
    ) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .insert(fiber.id(), parent.map(|p| p.id()));
    }

    fn on_end(&self, exit: &Exit<Value, Value>, fiber: &RuntimeFiber) {
        self.ended.fetch_add(1, Ordering::Relaxed);
        if exit.is_failure() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.live.lock().remove(&fiber.id());
    }

    fn on_effect(&self, _fiber: &RuntimeFiber, _effect: &Instruction) {
        self.effects.fetch_add(1, Ordering::Relaxed);
    }

    fn on_suspend(&self, _fiber: &RuntimeFiber) {
        self.suspends.fetch_add(1, Ordering::Relaxed);
    }

    fn on_resume(&self, _fiber: &RuntimeFiber) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S: Supervisor + ?Sized> Supervisor for Arc<S> {
    fn on_start(
        &self,
        refs: &FiberRefs,
        effect: &Instruction,
        parent: Option<&RuntimeFiber>,
        fiber: &RuntimeFiber,
    ) {
        (**self).on_start(refs, effect, parent, fiber);
    }

    fn on_end(&self, exit: &Exit<Value, Value>, fiber: &RuntimeFiber) {
        (**self).on_end(exit, fiber);
    }

    fn on_effect(&self, fiber: &RuntimeFiber, effect: &Instruction) {
        (**self).on_effect(fiber, effect);
    }

    fn on_suspend(&self, fiber: &RuntimeFiber) {
        (**self).on_suspend(fiber);
    }

    fn on_resume(&self, fiber: &RuntimeFiber) {
        (**self).on_resume(fiber);
    }
}
