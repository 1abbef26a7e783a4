//! Utilities for exercising the containers from many threads at once.
//!
//! `drive` runs the producer/consumer workload the benchmarks use: producers push a fixed
//! run of integers, retrying while the container is full, and consumers pop until every
//! pushed value has been taken. It returns what the consumers saw, so a caller can check
//! that nothing was lost or duplicated.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use contend::structures::BoundedQueue;
//! use contend::testing::drive;
//!
//! let queue = Arc::new(BoundedQueue::new(64).unwrap());
//! let mut drained = drive(queue, 2, 2, 1000);
//! drained.sort();
//! assert_eq!(drained.len(), 2000);
//! assert_eq!(drained[0], 0);
//! assert_eq!(drained[1999], 999);
//! ```

use crossbeam::utils::Backoff;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use crate::structures::ConcurrentContainer;

/// Run `producers` threads that each push `0..per_producer` and `consumers` threads that
/// pop until all of those values are consumed. Returns every consumed value, grouped by
/// consumer in the order each consumer saw them.
pub fn drive<C>(container: Arc<C>, producers: usize, consumers: usize, per_producer: usize) -> Vec<usize>
    where C: ConcurrentContainer<usize> + 'static
{
    assert!(consumers > 0 || producers == 0, "values pushed with no consumer to take them");
    let total = producers * per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));
    debug!(producers = producers, consumers = consumers, total = total, "driving container");

    let mut producer_handles: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..producers {
        let container = container.clone();
        producer_handles.push(thread::spawn(move || {
            for value in 0..per_producer {
                push_until_accepted(&*container, value);
            }
        }));
    }

    let mut consumer_handles: Vec<JoinHandle<Vec<usize>>> = Vec::new();
    for _ in 0..consumers {
        let container = container.clone();
        let consumed = consumed.clone();
        consumer_handles.push(thread::spawn(move || {
            let mut seen = Vec::new();
            while consumed.load(Ordering::Acquire) < total {
                match container.pop() {
                    Some(value) => {
                        seen.push(value);
                        consumed.fetch_add(1, Ordering::AcqRel);
                    },
                    None => thread::yield_now()
                }
            }
            seen
        }));
    }

    for handle in producer_handles {
        if let Err(panic) = handle.join() {
            error!("producer thread panicked");
            ::std::panic::resume_unwind(panic);
        }
    }
    let mut drained = Vec::with_capacity(total);
    for handle in consumer_handles {
        match handle.join() {
            Ok(seen) => drained.extend(seen),
            Err(panic) => {
                error!("consumer thread panicked");
                ::std::panic::resume_unwind(panic);
            }
        }
    }
    drained
}

/// Push `value`, spinning while the container reports it is full.
pub fn push_until_accepted<C, T>(container: &C, value: T)
    where C: ConcurrentContainer<T> + ?Sized, T: Send + Clone
{
    let backoff = Backoff::new();
    while !container.push(value.clone()) {
        backoff.snooze();
    }
}

/// Pop until the container reports empty, returning the values in pop order.
pub fn drain<C, T>(container: &C) -> Vec<T>
    where C: ConcurrentContainer<T> + ?Sized, T: Send
{
    let mut drained = Vec::new();
    while let Some(value) = container.pop() {
        drained.push(value);
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::{drain, drive};
    use std::sync::Arc;
    use crate::structures::{CountedPointerStack, TwoLockQueue};

    #[test]
    fn test_drive_conserves_values() {
        let queue = Arc::new(TwoLockQueue::new(32));
        let mut drained = drive(queue.clone(), 3, 2, 500);
        drained.sort();
        let mut expected: Vec<usize> = (0..500).flat_map(|i| vec![i; 3]).collect();
        expected.sort();
        assert_eq!(drained, expected);
        assert!(drain(&*queue).is_empty());
    }

    #[test]
    fn test_drain_follows_pop_order() {
        let stack = CountedPointerStack::new();
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(drain(&stack), vec![4, 3, 2, 1, 0]);
    }
}
