//! cofiber: a cooperative fiber runtime with structured concurrency.
//!
//! # Overview
//!
//! cofiber runs lazily described computations ([`Effect`]s) as lightweight
//! fibers multiplexed over a small number of OS threads. A fiber is a
//! mailbox plus a trampolined interpreter: other fibers talk to it only by
//! sending messages, and exactly one thread drains a fiber at a time.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: a fiber interrupts and awaits its children
//!   before its exit becomes observable
//! - **Precise interruption**: interruption is a message, honored only where
//!   the fiber's flags allow it, and finalizers always run
//! - **Fairness**: a fiber yields after a bounded number of instructions
//! - **Stack safety**: sequencing and loops never grow the native stack
//!
//! # Module Structure
//!
//! - [`types`]: identities, the failure algebra, exits and runtime flags
//! - [`effect`]: the instruction set and the typed [`Effect`] API
//! - [`runtime`]: fibers, schedulers, supervisors, fiber refs and the builder
//! - [`sync`]: [`Deferred`], a write-once variable fibers can wait on
//! - [`observability`]: fiber lifecycle metrics
//! - [`error`]: runtime-level errors
//! - [`tracing_compat`]: logging macros that work with or without `tracing`
//!
//! # Example
//!
//! ```ignore
//! use cofiber::{Effect, RuntimeBuilder};
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let program = Effect::<u64>::succeed(1)
//!     .fork()
//!     .flat_map(|fiber| fiber.join())
//!     .map(|n| n + 1);
//! assert!(runtime.block_on(program).is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]

pub mod effect;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod sync;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use effect::{Callback, Effect, Instruction, Restore};
pub use error::{Error, ErrorKind, Recoverability, Result};
pub use runtime::{
    Fiber, FiberRef, FiberRefs, FiberRuntime, FiberScope, FiberStatus, Runtime, RuntimeBuilder,
    RuntimeConfig, RuntimeFiber, Scheduler, Supervisor,
};
pub use sync::Deferred;
pub use types::{Cause, Data, Defect, Exit, FiberId, RuntimeFlag, RuntimeFlags, RuntimeFlagsPatch, Value};
