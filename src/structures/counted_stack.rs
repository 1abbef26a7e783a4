use crossbeam::utils::Backoff;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use crate::structures::ConcurrentContainer;
use crate::structures::utils::{AtomicCountedPtr, CountedPtr, MAX_EXTERNAL_COUNT};

/// A lock-free Treiber stack that frees nodes with split reference counting.
///
/// The head carries an external count of how many threads have claimed a reference to
/// the node it points to, and every node keeps an internal count of the claims that have
/// since been given back. A node is freed by whichever thread brings the sum of the two to
/// zero, so no external reclamation scheme is needed.
///
/// The accounting assumes the head is the only shared location holding a counted pointer
/// to a node.
pub struct CountedPointerStack<T: Send> {
    head: AtomicCountedPtr<Node<T>>,
    count: AtomicUsize
}

unsafe impl<T: Send> Send for CountedPointerStack<T> {}
unsafe impl<T: Send> Sync for CountedPointerStack<T> {}

struct Node<T> {
    data: ManuallyDrop<T>,
    internal_count: AtomicIsize,
    next: CountedPtr<Node<T>>
}

impl<T: Send> CountedPointerStack<T> {
    /// Create a new stack.
    /// # Examples
    /// ```
    /// use contend::structures::CountedPointerStack;
    /// let stack: CountedPointerStack<String> = CountedPointerStack::new();
    /// ```
    pub fn new() -> Self {
        CountedPointerStack {
            head: AtomicCountedPtr::default(),
            count: AtomicUsize::new(0)
        }
    }

    /// Create a new stack. The stack is unbounded, so the size hint is ignored.
    pub fn with_capacity(_hint: usize) -> Self {
        Self::new()
    }

    /// Push a value onto the top of the stack.
    /// # Examples
    /// ```
    /// use contend::structures::CountedPointerStack;
    /// let stack = CountedPointerStack::new();
    /// stack.push(1);
    /// stack.push(2);
    /// assert_eq!(stack.pop(), Some(2));
    /// ```
    pub fn push(&self, value: T) {
        // Counted before publishing so a racing pop can never take the counter below zero.
        self.count.fetch_add(1, Ordering::Relaxed);
        let node = Box::into_raw(Box::new(Node {
            data: ManuallyDrop::new(value),
            internal_count: AtomicIsize::new(0),
            next: self.head.load(Ordering::Relaxed)
        }));
        // The head is the only reference to a fresh node.
        let new_head = CountedPtr::new(1, node);
        loop {
            let next = unsafe { (*node).next };
            match self.head.compare_exchange_weak(next, new_head, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(current) => unsafe { (*node).next = current }
            }
        }
    }

    /// Pop the value from the top of the stack, or `None` if it is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        self.pop_claimed(self.increase_head_count(head))
    }

    /// Finish a pop from a head this thread has already claimed a reference to.
    fn pop_claimed(&self, mut old_head: CountedPtr<Node<T>>) -> Option<T> {
        loop {
            let node = old_head.ptr;
            if node.is_null() {
                return None;
            }

            let next = unsafe { (*node).next };
            match self.head.compare_exchange(old_head, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => {
                    let data = unsafe { ManuallyDrop::into_inner(ptr::read(&(*node).data)) };
                    // One reference went with the head, one is our own claim.
                    let count_increase = old_head.external_count as isize - 2;
                    let previous = unsafe { (*node).internal_count.fetch_add(count_increase, Ordering::Release) };
                    if previous == -count_increase {
                        unsafe { drop(Box::from_raw(node)) };
                    }
                    self.count.fetch_sub(1, Ordering::Relaxed);
                    return Some(data);
                },
                Err(current) => {
                    // Someone else moved the head: give our claim back.
                    let previous = unsafe { (*node).internal_count.fetch_sub(1, Ordering::Relaxed) };
                    if previous == 1 {
                        unsafe {
                            (*node).internal_count.load(Ordering::Acquire);
                            drop(Box::from_raw(node));
                        }
                    }
                    old_head = self.increase_head_count(current);
                }
            }
        }
    }

    /// Claim a reference to the node the head points at by bumping the external count.
    /// Only the count changes; if the head moved, the claim is made on the new head.
    fn increase_head_count(&self, mut old_counter: CountedPtr<Node<T>>) -> CountedPtr<Node<T>> {
        let backoff = Backoff::new();
        loop {
            if old_counter.ptr.is_null() {
                return old_counter;
            }
            if old_counter.external_count == MAX_EXTERNAL_COUNT {
                // The thread holding the last claim will move the head soon.
                backoff.snooze();
                old_counter = self.head.load(Ordering::Relaxed);
                continue;
            }
            let new_counter = CountedPtr::new(old_counter.external_count + 1, old_counter.ptr);
            match self.head.compare_exchange(old_counter, new_counter, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return new_counter,
                Err(current) => old_counter = current
            }
        }
    }

    /// Best-effort number of values in the stack. Not linearizable under concurrent use.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Pop every value and reset the counter.
    pub fn reinit(&mut self) {
        while self.pop().is_some() {}
        self.count.store(0, Ordering::Relaxed);
    }
}

impl<T: Send> ConcurrentContainer<T> for CountedPointerStack<T> {
    fn push(&self, value: T) -> bool {
        CountedPointerStack::push(self, value);
        true
    }

    fn pop(&self) -> Option<T> {
        CountedPointerStack::pop(self)
    }

    fn reinit(&mut self) {
        CountedPointerStack::reinit(self)
    }
}

impl<T: Send> Default for CountedPointerStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Drop for CountedPointerStack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T: Send> fmt::Debug for CountedPointerStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CountedPointerStack {{ head: {:?}, count: {} }}",
               self.head.load(Ordering::Relaxed), self.count())
    }
}
