//! The containers.
//!
//! Each one is an independent ordering domain: the stacks are LIFO and the queues FIFO
//! among operations that do not overlap. None of them parks a thread. The lock-free ones
//! retry with CAS loops, and `TwoLockQueue` spins on two short locks.

pub use self::counted_stack::CountedPointerStack;
pub use self::hazard_stack::HazardPointerStack;
pub use self::bounded_queue::BoundedQueue;
pub use self::two_lock_queue::TwoLockQueue;

mod counted_stack;
mod hazard_stack;
mod bounded_queue;
mod two_lock_queue;
pub mod utils;

/// The operations every container offers, so drivers can be written once.
pub trait ConcurrentContainer<T: Send>: Send + Sync {
    /// Add `value`. Returns `false` only when a capacity-limited container is full, in which
    /// case `value` is dropped.
    fn push(&self, value: T) -> bool;

    /// Remove a value, or return `None` if the container is empty.
    fn pop(&self) -> Option<T>;

    /// Drop every stored value and reset the container to its just-constructed state.
    fn reinit(&mut self);
}
