use crossbeam::utils::CachePadded;
use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::structures::ConcurrentContainer;

/// A bounded multi-producer multi-consumer queue over a ring of sequenced cells.
///
/// Every cell carries a sequence number telling which enqueue or dequeue position may use
/// it next, so producers and consumers only contend on their own position counter and
/// storage is reused in place. Nothing is allocated after construction.
pub struct BoundedQueue<T: Send> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>
}

unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

/// `sequence == pos` means free for the enqueue at `pos`, `sequence == pos + 1` means
/// holding the value for the dequeue at `pos`.
struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>
}

impl<T: Send> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` values. `capacity` must be a power of two
    /// and at least 2.
    /// # Examples
    /// ```
    /// use contend::structures::BoundedQueue;
    /// let queue: BoundedQueue<u32> = BoundedQueue::new(128).unwrap();
    /// assert!(BoundedQueue::<u32>::new(100).is_err());
    /// ```
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(Error::InvalidCapacity { capacity });
        }
        let buffer: Vec<Cell<T>> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit())
            })
            .collect();
        debug!(capacity = capacity, "created bounded queue");
        Ok(BoundedQueue {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0))
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Add a value to the back of the queue. Returns `false`, dropping `value`, if the
    /// queue is full.
    pub fn push(&self, value: T) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let sequence = cell.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        unsafe { cell.data.get().write(MaybeUninit::new(value)) };
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    },
                    Err(current) => pos = current
                }
            } else if diff < 0 {
                // The cell still holds the value from one lap ago.
                return false;
            } else {
                // Another producer took this position.
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the value at the front of the queue, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let sequence = cell.sequence.load(Ordering::Acquire);
            let diff = sequence.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        let value = unsafe { cell.data.get().read().assume_init() };
                        cell.sequence.store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    },
                    Err(current) => pos = current
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Drop every queued value and reset all sequence numbers and positions.
    pub fn reinit(&mut self) {
        while self.pop().is_some() {}
        for (i, cell) in self.buffer.iter().enumerate() {
            cell.sequence.store(i, Ordering::Relaxed);
        }
        self.enqueue_pos.store(0, Ordering::Relaxed);
        self.dequeue_pos.store(0, Ordering::Relaxed);
        debug!(capacity = self.capacity(), "reinitialised bounded queue");
    }
}

impl<T: Send> ConcurrentContainer<T> for BoundedQueue<T> {
    fn push(&self, value: T) -> bool {
        BoundedQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        BoundedQueue::pop(self)
    }

    fn reinit(&mut self) {
        BoundedQueue::reinit(self)
    }
}

impl<T: Send> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T: Send> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BoundedQueue {{ capacity: {}, enqueue_pos: {}, dequeue_pos: {} }}",
               self.capacity(),
               self.enqueue_pos.load(Ordering::Relaxed),
               self.dequeue_pos.load(Ordering::Relaxed))
    }
}
