//! Concurrent stacks and queues built around different reclamation strategies.
//!
//! This crate provides two unbounded lock-free stacks and two queues. The stacks differ
//! in how they decide when a popped node can be freed: [`CountedPointerStack`] uses split
//! reference counting, [`HazardPointerStack`] uses hazard pointers from a shared
//! [`HazardRegistry`]. The queues are a bounded ring buffer that never allocates after
//! construction, and a two-lock linked queue kept as a simple baseline.
//!
//! Every container implements [`ConcurrentContainer`], so drivers and tests can treat them
//! uniformly.
//!
//! [`CountedPointerStack`]: structures/struct.CountedPointerStack.html
//! [`HazardPointerStack`]: structures/struct.HazardPointerStack.html
//! [`HazardRegistry`]: memory/struct.HazardRegistry.html
//! [`ConcurrentContainer`]: structures/trait.ConcurrentContainer.html

extern crate crossbeam;
extern crate thiserror;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate tracing;

pub mod structures;
pub mod memory;
pub mod testing;
mod error;

pub use error::{Error, Result};
