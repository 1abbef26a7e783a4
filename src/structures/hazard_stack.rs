use crate::error::Result;
use crate::memory::HazardRegistry;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};
use crate::structures::ConcurrentContainer;

/// A lock-free Treiber stack that frees popped nodes through hazard pointers.
///
/// A popping thread publishes the head it is about to read in its slot of a
/// `HazardRegistry`, and a popped node is only freed once no slot publishes it. Nodes that
/// are still published go on the registry's pending list and are freed by a later pop.
///
/// All stacks built with `new` share the process-wide registry, so they also share its
/// slots and its pending list.
pub struct HazardPointerStack<T: Send> {
    head: AtomicPtr<Node<T>>,
    registry: Arc<HazardRegistry>
}

unsafe impl<T: Send> Send for HazardPointerStack<T> {}
unsafe impl<T: Send> Sync for HazardPointerStack<T> {}

struct Node<T> {
    data: ManuallyDrop<T>,
    next: *mut Node<T>
}

impl<T: Send> HazardPointerStack<T> {
    /// Create a new stack backed by `HazardRegistry::global()`.
    /// # Examples
    /// ```
    /// use contend::structures::HazardPointerStack;
    /// let stack = HazardPointerStack::new();
    /// stack.push("hello".to_owned());
    /// assert_eq!(stack.pop(), Some("hello".to_owned()));
    /// ```
    pub fn new() -> Self {
        Self::with_registry(HazardRegistry::global())
    }

    /// Create a new stack that protects its nodes through `registry`.
    pub fn with_registry(registry: Arc<HazardRegistry>) -> Self {
        HazardPointerStack {
            head: AtomicPtr::default(),
            registry
        }
    }

    pub fn registry(&self) -> &Arc<HazardRegistry> {
        &self.registry
    }

    /// Push a value onto the top of the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            data: ManuallyDrop::new(value),
            next: self.head.load(Ordering::Relaxed)
        }));
        loop {
            let next = unsafe { (*node).next };
            match self.head.compare_exchange_weak(next, node, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(current) => unsafe { (*node).next = current }
            }
        }
    }

    /// Pop the value from the top of the stack, or `None` if it is empty.
    ///
    /// # Panics
    /// If the calling thread has no hazard slot yet and every slot in the registry is
    /// owned by another live thread. Use `try_pop` to handle that case instead.
    pub fn pop(&self) -> Option<T> {
        match self.try_pop() {
            Ok(value) => value,
            Err(err) => panic!("{}", err)
        }
    }

    /// Pop the value from the top of the stack, reporting registry exhaustion as an error.
    pub fn try_pop(&self) -> Result<Option<T>> {
        let slot = self.registry.acquire()?;
        let mut old_head = self.head.load(Ordering::SeqCst);
        loop {
            // Publish the head, then check it is still the head. If it is not, it may
            // already have been freed and must not be read.
            loop {
                let candidate = old_head;
                self.registry.protect(slot, candidate);
                old_head = self.head.load(Ordering::SeqCst);
                if old_head == candidate {
                    break;
                }
            }
            if old_head.is_null() {
                break;
            }
            let next = unsafe { (*old_head).next };
            match self.head.compare_exchange(old_head, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(current) => old_head = current
            }
        }
        self.registry.unprotect(slot);

        if old_head.is_null() {
            return Ok(None);
        }
        let data = unsafe { ManuallyDrop::into_inner(ptr::read(&(*old_head).data)) };
        unsafe { self.registry.retire(old_head) };
        self.registry.reclaim();
        Ok(Some(data))
    }

    /// Pop every value.
    pub fn reinit(&mut self) {
        let mut current = *self.head.get_mut();
        *self.head.get_mut() = ptr::null_mut();
        while !current.is_null() {
            unsafe {
                let mut node = Box::from_raw(current);
                current = node.next;
                ManuallyDrop::drop(&mut node.data);
            }
        }
    }
}

impl<T: Send> ConcurrentContainer<T> for HazardPointerStack<T> {
    fn push(&self, value: T) -> bool {
        HazardPointerStack::push(self, value);
        true
    }

    fn pop(&self) -> Option<T> {
        HazardPointerStack::pop(self)
    }

    fn reinit(&mut self) {
        HazardPointerStack::reinit(self)
    }
}

impl<T: Send> Default for HazardPointerStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Drop for HazardPointerStack<T> {
    fn drop(&mut self) {
        self.reinit();
    }
}

impl<T: Send> fmt::Debug for HazardPointerStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HazardPointerStack {{ head: {:?}, registry: {:?} }}",
               self.head.load(Ordering::Relaxed), self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::HazardPointerStack;
    use crate::error::Error;
    use crate::memory::HazardRegistry;
    use std::sync::{Arc, Barrier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug)]
    struct Foo {
        data: u8,
        drops: Arc<AtomicUsize>
    }

    impl Drop for Foo {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn isolated<T: Send>(slots: usize) -> HazardPointerStack<T> {
        HazardPointerStack::with_registry(Arc::new(HazardRegistry::new(slots)))
    }

    #[test]
    fn test_pop_single_threaded() {
        let stack: HazardPointerStack<u32> = isolated(4);
        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.registry().pending(), 0);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let first: HazardPointerStack<u32> = HazardPointerStack::new();
        let second: HazardPointerStack<u32> = HazardPointerStack::new();
        assert!(Arc::ptr_eq(first.registry(), second.registry()));
        first.push(7);
        assert_eq!(first.pop(), Some(7));
        assert_eq!(second.pop(), None);
    }

    #[test]
    fn test_reinit() {
        let mut stack: HazardPointerStack<u32> = isolated(4);
        for i in 0..50 {
            stack.push(i);
        }
        stack.reinit();
        assert_eq!(stack.pop(), None);
        stack.reinit();
        stack.push(4);
        assert_eq!(stack.pop(), Some(4));
    }

    #[test]
    fn test_values_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let stack = isolated(4);
            for data in 0..10 {
                stack.push(Foo { data, drops: drops.clone() });
            }
            let popped = stack.pop().unwrap();
            assert_eq!(popped.data, 9);
            drop(popped);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_registry_freed_with_last_stack() {
        let registry = Arc::new(HazardRegistry::new(4));
        let weak = Arc::downgrade(&registry);
        {
            let stack = HazardPointerStack::with_registry(registry);
            stack.push(1u32);
            stack.push(2u32);
            assert_eq!(stack.pop(), Some(2));
        }
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_many_short_lived_registries_on_one_thread() {
        let mut weaks = Vec::new();
        for i in 0..1000u32 {
            let stack = isolated(1);
            weaks.push(Arc::downgrade(stack.registry()));
            stack.push(i);
            assert_eq!(stack.pop(), Some(i));
        }
        assert!(weaks.iter().all(|weak| weak.upgrade().is_none()));
    }

    #[test]
    fn test_try_pop_without_slots() {
        let stack: HazardPointerStack<u32> = isolated(0);
        stack.push(1);
        assert_eq!(stack.try_pop(), Err(Error::HazardSlotsExhausted { slots: 0 }));
    }

    #[test]
    #[should_panic(expected = "No hazard pointers available")]
    fn test_pop_without_slots_is_fatal() {
        let stack: HazardPointerStack<u32> = isolated(0);
        stack.push(1);
        stack.pop();
    }

    #[test]
    fn test_registry_exhaustion_with_live_threads() {
        let slots = 100;
        let stack: Arc<HazardPointerStack<u32>> = Arc::new(isolated(slots));
        let bound = Arc::new(Barrier::new(slots + 1));
        let done = Arc::new(Barrier::new(slots + 1));
        let mut waitvec: Vec<thread::JoinHandle<()>> = Vec::new();

        for _ in 0..slots {
            let stack_copy = stack.clone();
            let bound_copy = bound.clone();
            let done_copy = done.clone();
            waitvec.push(thread::spawn(move || {
                stack_copy.try_pop().unwrap();
                bound_copy.wait();
                done_copy.wait();
            }));
        }

        bound.wait();
        let stack_copy = stack.clone();
        let late = thread::spawn(move || stack_copy.try_pop()).join().unwrap();
        assert_eq!(late, Err(Error::HazardSlotsExhausted { slots }));
        done.wait();

        for handle in waitvec {
            handle.join().unwrap();
        }
        assert_eq!(stack.registry().active(), 0);
        assert_eq!(stack.try_pop(), Ok(None));
    }

    #[test]
    fn test_stack_multithreaded() {
        let stack: Arc<HazardPointerStack<u32>> = Arc::new(isolated(16));
        let mut waitvec: Vec<thread::JoinHandle<Vec<u32>>> = Vec::new();

        for _ in 0..4 {
            let stack_copy = stack.clone();
            waitvec.push(thread::spawn(move || {
                for i in 0..10000 {
                    stack_copy.push(i);
                }
                Vec::new()
            }));
        }
        for _ in 0..4 {
            let stack_copy = stack.clone();
            waitvec.push(thread::spawn(move || {
                let mut popped = Vec::new();
                while popped.len() < 10000 {
                    if let Some(val) = stack_copy.pop() {
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
        assert_eq!(stack.pop(), None);
    }
}
