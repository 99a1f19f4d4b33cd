//! Concurrency primitives shared by the node components.
//!
//! Everything blocking takes a [`ctx::Ctx`], so that a node can be shut down
//! uniformly by canceling its root context.

pub mod ctx;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod sync;
pub mod testonly;
pub mod time;
