//! A module for lock-free memory management.
//!
//! The registry in this module lets lock-free structures publish the addresses they are
//! about to dereference, and defer freeing a removed node until no thread has it
//! published. This ensures that no pieces of data are freed while another thread can still
//! access them, and prevents the [ABA problem](https://en.wikipedia.org/wiki/ABA_problem)
//! on the structures that use it.

pub use self::hazardpointers::{HazardRegistry, DEFAULT_HAZARD_SLOTS};
mod hazardpointers;
