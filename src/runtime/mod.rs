//! The fiber runtime.
//!
//! This module contains the machinery that runs effects:
//!
//! - [`fiber`]: the fiber state machine, mailbox and run loop
//! - [`message`]: messages fibers exchange
//! - [`resume`]: one-shot completion handles for async registrations
//! - [`handle`]: typed [`Fiber`] handles
//! - [`fiber_ref`], [`fiber_refs`]: fiber-local state with fork/join
//! - [`scope`]: where forked fibers are registered
//! - [`scheduler`]: where fiber drains run
//! - [`supervisor`]: lifecycle hooks
//! - [`config`], [`env_config`], [`builder`]: configuration and entry points
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder. Each method
//! consumes `self` and returns the updated builder.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cofiber::effect::Effect;
//! use cofiber::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let exit = runtime.block_on(Effect::<u32>::succeed(1).map(|n| n + 1));
//! ```
//!
//! ## Deterministic
//!
//! ```ignore
//! use cofiber::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::deterministic(42).build()?;
//! let fiber = runtime.run_fork(program);
//! runtime.controlled_scheduler().unwrap().run_until_idle();
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use cofiber::runtime::RuntimeBuilder;
//!
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/cofiber.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Error Handling
//!
//! [`RuntimeBuilder::build`] returns [`crate::error::Error`] when the worker
//! pool cannot start. Configuration parsing reports `Error::Config`.

pub mod builder;
pub mod config;
pub(crate) mod continuation;
pub mod env_config;
pub mod fiber;
pub mod fiber_ref;
pub mod fiber_refs;
pub mod handle;
pub mod message;
pub mod resume;
pub mod scheduler;
pub mod scope;
pub mod status;
pub mod supervisor;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{RuntimeConfig, UnhandledErrorLog};
pub use fiber::{current_fiber, current_fiber_id, FiberContext, FiberRuntime, RuntimeFiber};
pub use fiber_ref::FiberRef;
pub use fiber_refs::FiberRefs;
pub use handle::Fiber;
pub use message::FiberMessage;
pub use resume::{AsyncResume, Resume};
pub use scheduler::{ControlledScheduler, Scheduler, SyncScheduler, Task, WorkerScheduler};
pub use scope::FiberScope;
pub use status::FiberStatus;
pub use supervisor::{
    LifecycleCounts, NoopSupervisor, Supervisor, SupervisorExt, TrackingSupervisor,
    ZipSupervisor,
};
