use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use crate::structures::ConcurrentContainer;
use crate::structures::utils::SpinLock;

/// A linked queue guarded by one spin lock for producers and another for consumers.
///
/// The list is split by a `divider` node. Nodes up to and including the divider have been
/// consumed, nodes after it are pending. Consumers only move the divider forward, and
/// producers append at `last` and free the consumed nodes in front of the divider, so the
/// two sides never take the same lock.
///
/// The capacity is soft: `push` fails once the element counter reaches it.
pub struct TwoLockQueue<T: Send> {
    producer: SpinLock<ProducerSide<T>>,
    consumer: SpinLock<()>,
    divider: AtomicPtr<Node<T>>,
    count: AtomicUsize,
    capacity: usize
}

unsafe impl<T: Send> Send for TwoLockQueue<T> {}
unsafe impl<T: Send> Sync for TwoLockQueue<T> {}

/// The ends of the list only producers touch.
struct ProducerSide<T> {
    first: *mut Node<T>,
    last: *mut Node<T>
}

unsafe impl<T: Send> Send for ProducerSide<T> {}

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>
}

impl<T> Node<T> {
    fn new_as_pointer(value: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::default()
        }))
    }
}

impl<T: Send> TwoLockQueue<T> {
    /// Create a queue that refuses pushes once it holds `capacity` values.
    /// # Examples
    /// ```
    /// use contend::structures::TwoLockQueue;
    /// let queue = TwoLockQueue::new(1);
    /// assert!(queue.push(1));
    /// assert!(!queue.push(2));
    /// assert_eq!(queue.pop(), Some(1));
    /// ```
    pub fn new(capacity: usize) -> Self {
        let sentinel = Node::new_as_pointer(None);
        TwoLockQueue {
            producer: SpinLock::new(ProducerSide { first: sentinel, last: sentinel }),
            consumer: SpinLock::new(()),
            divider: AtomicPtr::new(sentinel),
            count: AtomicUsize::new(0),
            capacity
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Best-effort number of pending values.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value. Returns `false`, dropping `value`, if the counter is at capacity.
    pub fn push(&self, value: T) -> bool {
        if self.count.load(Ordering::Relaxed) >= self.capacity {
            return false;
        }
        let node = Node::new_as_pointer(Some(value));

        let mut producer = self.producer.lock();
        // Counted before the node is visible so the matching pop cannot underflow it.
        self.count.fetch_add(1, Ordering::Relaxed);
        unsafe { (*producer.last).next.store(node, Ordering::Release) };
        producer.last = node;

        let divider = self.divider.load(Ordering::Acquire);
        while producer.first != divider {
            let consumed = producer.first;
            unsafe {
                producer.first = (*consumed).next.load(Ordering::Relaxed);
                drop(Box::from_raw(consumed));
            }
        }
        true
    }

    /// Take the value at the front of the queue, or `None` if it is empty.
    pub fn pop(&self) -> Option<T> {
        let value = {
            let _consumer = self.consumer.lock();
            let divider = self.divider.load(Ordering::Relaxed);
            let next = unsafe { (*divider).next.load(Ordering::Acquire) };
            if next.is_null() {
                None
            } else {
                let value = unsafe { (*next).value.take() };
                self.divider.store(next, Ordering::Release);
                value
            }
        };
        if value.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        value
    }

    /// Free every node, dropping pending values, and start again from a fresh sentinel.
    pub fn reinit(&mut self) {
        self.free_nodes();
        let sentinel = Node::new_as_pointer(None);
        *self.producer.get_mut() = ProducerSide { first: sentinel, last: sentinel };
        *self.divider.get_mut() = sentinel;
        *self.count.get_mut() = 0;
        debug!(capacity = self.capacity, "reinitialised two-lock queue");
    }

    fn free_nodes(&mut self) {
        let mut current = self.producer.get_mut().first;
        while !current.is_null() {
            unsafe {
                let next = (*current).next.load(Ordering::Relaxed);
                drop(Box::from_raw(current));
                current = next;
            }
        }
        let producer = self.producer.get_mut();
        producer.first = ptr::null_mut();
        producer.last = ptr::null_mut();
    }
}

impl<T: Send> ConcurrentContainer<T> for TwoLockQueue<T> {
    fn push(&self, value: T) -> bool {
        TwoLockQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        TwoLockQueue::pop(self)
    }

    fn reinit(&mut self) {
        TwoLockQueue::reinit(self)
    }
}

impl<T: Send> Drop for TwoLockQueue<T> {
    fn drop(&mut self) {
        self.free_nodes();
    }
}

impl<T: Send> fmt::Debug for TwoLockQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TwoLockQueue {{ len: {}, capacity: {} }}", self.len(), self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::TwoLockQueue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Foo {
        drops: Arc<AtomicUsize>
    }

    impl Drop for Foo {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_queue_single_threaded() {
        let queue: TwoLockQueue<u32> = TwoLockQueue::new(128);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_soft_capacity() {
        let queue: TwoLockQueue<u32> = TwoLockQueue::new(3);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert!(!queue.push(4));
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.push(5));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(5));
    }

    #[test]
    fn test_consumed_nodes_are_freed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let queue = TwoLockQueue::new(16);
        for _ in 0..4 {
            assert!(queue.push(Foo { drops: drops.clone() }));
        }
        for _ in 0..4 {
            drop(queue.pop());
        }
        assert_eq!(drops.load(Ordering::SeqCst), 4);
        assert!(queue.push(Foo { drops: drops.clone() }));
        assert_eq!(queue.producer.lock().first, queue.divider.load(Ordering::SeqCst));
        drop(queue);
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_reinit() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut queue = TwoLockQueue::new(4);
        for _ in 0..4 {
            assert!(queue.push(Foo { drops: drops.clone() }));
        }
        queue.reinit();
        assert_eq!(drops.load(Ordering::SeqCst), 4);
        assert_eq!(queue.len(), 0);
        assert!(queue.pop().is_none());
        for _ in 0..4 {
            assert!(queue.push(Foo { drops: drops.clone() }));
        }
        assert!(!queue.push(Foo { drops: drops.clone() }));
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_queue_multithreaded() {
        let queue: Arc<TwoLockQueue<u32>> = Arc::new(TwoLockQueue::new(256));
        let mut waitvec: Vec<thread::JoinHandle<Vec<u32>>> = Vec::new();

        for _ in 0..4 {
            let queue_copy = queue.clone();
            waitvec.push(thread::spawn(move || {
                for i in 0..10000 {
                    while !queue_copy.push(i) {
                        thread::yield_now();
                    }
                }
                Vec::new()
            }));
        }
        for _ in 0..4 {
            let queue_copy = queue.clone();
            waitvec.push(thread::spawn(move || {
                let mut popped = Vec::new();
                while popped.len() < 10000 {
                    if let Some(val) = queue_copy.pop() {
                        popped.push(val);
                    }
                }
                popped
            }));
        }

        let mut all: Vec<u32> = Vec::new();
        for handle in waitvec {
            all.extend(handle.join().unwrap());
        }
        all.sort();
        let mut expected: Vec<u32> = (0..10000).flat_map(|i| vec![i; 4]).collect();
        expected.sort();
        assert_eq!(all, expected);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.len(), 0);
    }
}
