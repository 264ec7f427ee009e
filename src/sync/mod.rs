//! Synchronization primitives for fibers.
//!
//! - [`Deferred`]: a write-once variable any number of fibers can wait on

pub mod deferred;

pub use deferred::Deferred;
