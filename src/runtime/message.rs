//! Messages exchanged between fibers.
//!
//! Every request to change a fiber's state goes through its mailbox. The
//! mailbox accepts messages from any thread; only the fiber's current
//! drainer consumes them, in FIFO order.

use super::fiber::FiberContext;
use super::status::FiberStatus;
use crate::effect::Instruction;
use crate::types::{Cause, FiberId, Value};
use core::fmt;

/// Closure run against a fiber's internals by its drainer.
pub type StatefulMessage = Box<dyn FnOnce(&mut FiberContext<'_>, FiberStatus) + Send>;

/// A request delivered to a fiber's mailbox.
pub enum FiberMessage {
    /// Interrupt the fiber with the given cause.
    InterruptSignal(Cause<Value>),
    /// Run a closure with direct access to the fiber.
    Stateful(StatefulMessage),
    /// Continue a suspended fiber with the given instruction.
    Resume(Instruction),
    /// Give the scheduler a chance to run other fibers.
    YieldNow,
}

impl FiberMessage {
    /// An interrupt signal attributed to `fiber_id`.
    #[must_use]
    pub fn interrupt(fiber_id: FiberId) -> Self {
        Self::InterruptSignal(Cause::Interrupt(fiber_id))
    }

    /// A stateful message.
    pub fn stateful<F>(f: F) -> Self
    where
        F: FnOnce(&mut FiberContext<'_>, FiberStatus) + Send + 'static,
    {
        Self::Stateful(Box::new(f))
    }
}

impl fmt::Debug for FiberMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterruptSignal(cause) => f.debug_tuple("InterruptSignal").field(cause).finish(),
            Self::Stateful(_) => f.write_str("Stateful"),
            Self::Resume(instr) => f.debug_tuple("Resume").field(instr).finish(),
            Self::YieldNow => f.write_str("YieldNow"),
        }
    }
}
