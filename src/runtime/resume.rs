//! Resumption callbacks for asynchronous instructions.
//!
//! [`AsyncResume`] is the callback the run loop hands to an `Async`
//! registration function. It is a small latch:
//!
//! ```text
//! Registering ──resume──▶ Completed ──finish_registration──▶ Resumed   (inline)
//!      │
//!      └──finish_registration──▶ Waiting ──resume──▶ Resumed            (mailbox)
//! ```
//!
//! A completion that happens while the registration function is still running
//! is handed back to the run loop, which continues inline without a mailbox
//! round-trip. Later completions post a `Resume` message. Only the first
//! completion counts; every later call is a no-op.
//!
//! [`Resume`] is the user-facing front for an [`AsyncResume`]. A detached
//! `Resume` buffers the first completion until it is attached.

use super::fiber::FiberRuntime;
use super::message::FiberMessage;
use crate::effect::Instruction;
use core::fmt;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

enum Latch {
    Registering,
    Completed(Instruction),
    Waiting,
    Resumed,
}

struct AsyncResumeInner {
    fiber: Arc<FiberRuntime>,
    latch: Mutex<Latch>,
}

/// Idempotent callback that resumes a fiber suspended on an `Async`
/// instruction.
#[derive(Clone)]
pub struct AsyncResume {
    inner: Arc<AsyncResumeInner>,
}

impl AsyncResume {
    pub(crate) fn new(fiber: Arc<FiberRuntime>) -> Self {
        Self {
            inner: Arc::new(AsyncResumeInner {
                fiber,
                latch: Mutex::new(Latch::Registering),
            }),
        }
    }

    /// Resumes the fiber with `effect`. Calls after the first are ignored.
    pub fn resume(&self, effect: Instruction) {
        let mut latch = self.inner.latch.lock();
        match *latch {
            Latch::Registering => *latch = Latch::Completed(effect),
            Latch::Waiting => {
                *latch = Latch::Resumed;
                drop(latch);
                self.inner.fiber.tell(FiberMessage::Resume(effect));
            }
            Latch::Completed(_) | Latch::Resumed => {}
        }
    }

    /// Returns `true` once a completion has been accepted.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        matches!(
            *self.inner.latch.lock(),
            Latch::Completed(_) | Latch::Resumed
        )
    }

    /// Closes the registration window. Returns the completion if one arrived
    /// while the registration function was running.
    pub(crate) fn finish_registration(&self) -> Option<Instruction> {
        let mut latch = self.inner.latch.lock();
        match mem::replace(&mut *latch, Latch::Waiting) {
            Latch::Completed(effect) => {
                *latch = Latch::Resumed;
                Some(effect)
            }
            Latch::Registering => None,
            previous => {
                *latch = previous;
                None
            }
        }
    }
}

impl fmt::Debug for AsyncResume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResume")
            .field("fiber", &self.inner.fiber.id())
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

enum Slot {
    Detached(Option<Instruction>),
    Attached(AsyncResume),
}

/// A resumption callback that may be created before the fiber suspends.
///
/// The first call to [`Resume::resume`] wins. If it happens before the
/// callback is attached to a suspended fiber, the completion is buffered.
#[derive(Clone)]
pub struct Resume {
    slot: Arc<Mutex<Slot>>,
}

impl Resume {
    pub(crate) fn detached() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Detached(None))),
        }
    }

    pub(crate) fn attached(target: AsyncResume) -> Self {
        let resume = Self::detached();
        resume.attach(target);
        resume
    }

    /// Completes the pending operation with `effect`.
    pub fn resume(&self, effect: Instruction) {
        let target = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Detached(pending) => {
                    if pending.is_none() {
                        *pending = Some(effect);
                    }
                    return;
                }
                Slot::Attached(target) => target.clone(),
            }
        };
        target.resume(effect);
    }

    pub(crate) fn attach(&self, target: AsyncResume) {
        let pending = {
            let mut slot = self.slot.lock();
            match mem::replace(&mut *slot, Slot::Attached(target.clone())) {
                Slot::Detached(pending) => pending,
                Slot::Attached(_) => None,
            }
        };
        if let Some(effect) = pending {
            target.resume(effect);
        }
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached = matches!(*self.slot.lock(), Slot::Attached(_));
        f.debug_struct("Resume").field("attached", &attached).finish()
    }
}
