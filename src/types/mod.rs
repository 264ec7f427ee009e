//! Core types shared by every layer of the runtime.
//!
//! - [`FiberId`]: fiber identity with a start timestamp
//! - [`Cause`], [`Defect`]: the failure algebra
//! - [`Exit`]: the final outcome of a fiber
//! - [`RuntimeFlags`], [`RuntimeFlagsPatch`]: per-fiber scheduler policies
//! - [`Value`]: the erased value representation used by the interpreter

pub mod cause;
pub mod exit;
pub mod flags;
pub mod id;
pub mod value;

pub use cause::{Cause, Defect};
pub use exit::Exit;
pub use flags::{RuntimeFlag, RuntimeFlags, RuntimeFlagsPatch};
pub use id::FiberId;
pub use value::{Data, Value};
