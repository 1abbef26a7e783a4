use crate::error::{Error, Result};
use std::cell::RefCell;
use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Number of slots in the registry returned by `HazardRegistry::global`.
pub const DEFAULT_HAZARD_SLOTS: usize = 100;

// Token 0 marks a free slot, so tokens start at 1.
static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
    static BINDINGS: RefCell<Vec<Binding>> = RefCell::new(Vec::new());
}

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<HazardRegistry> = Arc::new(HazardRegistry::new(DEFAULT_HAZARD_SLOTS));
}

/// A fixed table of hazard pointers shared by every thread that reads through it, plus the
/// list of removed nodes still waiting to be freed.
///
/// A thread owns at most one slot per registry. It binds to a slot the first time it calls
/// `acquire` and gives the slot back when it exits. The table never grows: once every slot
/// is owned by a live thread, further threads get `Error::HazardSlotsExhausted`.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use contend::memory::HazardRegistry;
///
/// let registry = Arc::new(HazardRegistry::new(4));
/// let slot = registry.acquire().unwrap();
/// assert_eq!(registry.acquire().unwrap(), slot);
/// assert_eq!(registry.active(), 1);
/// ```
pub struct HazardRegistry {
    slots: Box<[HazardSlot]>,
    pending: AtomicPtr<Retired>,
    pending_count: AtomicUsize
}

struct HazardSlot {
    owner: AtomicUsize,
    pointer: AtomicPtr<()>
}

/// A removed node that was still published when its remover tried to free it.
struct Retired {
    pointer: *mut (),
    deleter: unsafe fn(*mut ()),
    next: *mut Retired
}

/// Ties a thread to its slot. Dropped with the thread's locals, which frees the slot.
/// Holds the registry weakly so a thread never keeps a dropped registry alive.
struct Binding {
    registry: Weak<HazardRegistry>,
    index: usize
}

impl HazardRegistry {
    pub fn new(slots: usize) -> Self {
        debug!(slots = slots, "creating hazard registry");
        let slots: Vec<HazardSlot> = (0..slots).map(|_| HazardSlot::new()).collect();
        HazardRegistry {
            slots: slots.into_boxed_slice(),
            pending: AtomicPtr::default(),
            pending_count: AtomicUsize::new(0)
        }
    }

    /// The registry shared by every structure that does not bring its own. It is built on
    /// first use and lives until the process exits.
    pub fn global() -> Arc<HazardRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Total number of slots.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently owned by a thread.
    pub fn active(&self) -> usize {
        self.slots.iter()
            .filter(|slot| slot.owner.load(Ordering::Acquire) != 0)
            .count()
    }

    /// Number of removed nodes waiting for their hazard pointers to clear.
    pub fn pending(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    /// Return the index of the calling thread's slot, binding a free one on first use.
    pub fn acquire(self: &Arc<Self>) -> Result<usize> {
        BINDINGS.with(|bindings| {
            let mut bindings = bindings.borrow_mut();
            let this = Arc::as_ptr(self);
            if let Some(binding) = bindings.iter().find(|b| b.registry.as_ptr() == this) {
                return Ok(binding.index);
            }
            // Registries this thread used before may be gone by now.
            bindings.retain(|b| b.registry.strong_count() > 0);
            let token = THREAD_TOKEN.with(|token| *token);
            let index = self.claim_slot(token)?;
            bindings.push(Binding { registry: Arc::downgrade(self), index });
            Ok(index)
        })
    }

    fn claim_slot(&self, token: usize) -> Result<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner.compare_exchange(0, token, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                debug!(slot = index, token = token, "bound hazard slot");
                return Ok(index);
            }
        }
        warn!(slots = self.slots.len(), token = token, "hazard registry exhausted");
        Err(Error::HazardSlotsExhausted { slots: self.slots.len() })
    }

    fn release(&self, index: usize) {
        let slot = &self.slots[index];
        slot.pointer.store(ptr::null_mut(), Ordering::Release);
        slot.owner.store(0, Ordering::Release);
        debug!(slot = index, "released hazard slot");
    }

    /// Publish `record` in slot `index`. Callers must re-read the location they loaded
    /// `record` from afterwards; only a confirmed value is protected.
    pub fn protect<N>(&self, index: usize, record: *mut N) {
        self.slots[index].pointer.store(record as *mut (), Ordering::SeqCst);
    }

    pub fn unprotect(&self, index: usize) {
        self.slots[index].pointer.store(ptr::null_mut(), Ordering::Release);
    }

    /// Whether any slot currently publishes `record`.
    pub fn is_hazardous<N>(&self, record: *mut N) -> bool {
        let record = record as *mut ();
        self.slots.iter().any(|slot| slot.pointer.load(Ordering::SeqCst) == record)
    }

    /// Free `record` now if nothing publishes it, otherwise queue it on the pending list.
    ///
    /// # Safety
    /// `record` must come from `Box::into_raw`, must already be unreachable from the
    /// structure it was removed from, and must not be retired twice.
    pub unsafe fn retire<N>(&self, record: *mut N) {
        if self.is_hazardous(record) {
            trace!(record = ?record, "deferring reclamation");
            let entry = Box::into_raw(Box::new(Retired {
                pointer: record as *mut (),
                deleter: drop_boxed::<N>,
                next: ptr::null_mut()
            }));
            self.pending_count.fetch_add(1, Ordering::Relaxed);
            self.push_pending(entry);
        } else {
            drop(Box::from_raw(record));
        }
    }

    /// Take the whole pending list, free every entry nothing publishes any more and put
    /// the rest back. Returns how many entries were freed.
    pub fn reclaim(&self) -> usize {
        let mut current = self.pending.swap(ptr::null_mut(), Ordering::Acquire);
        let mut freed = 0;
        while !current.is_null() {
            unsafe {
                let next = (*current).next;
                if self.is_hazardous((*current).pointer) {
                    self.push_pending(current);
                } else {
                    drop(Box::from_raw(current));
                    freed += 1;
                }
                current = next;
            }
        }
        if freed > 0 {
            self.pending_count.fetch_sub(freed, Ordering::Relaxed);
            trace!(freed = freed, "reclaimed pending nodes");
        }
        freed
    }

    fn push_pending(&self, entry: *mut Retired) {
        let mut head = self.pending.load(Ordering::Relaxed);
        loop {
            unsafe {
                (*entry).next = head;
            }
            match self.pending.compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(current) => head = current
            }
        }
    }
}

impl Drop for HazardRegistry {
    fn drop(&mut self) {
        let mut current = *self.pending.get_mut();
        while !current.is_null() {
            unsafe {
                let next = (*current).next;
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

impl fmt::Debug for HazardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HazardRegistry {{ slots: {}, active: {}, pending: {} }}",
               self.slots(), self.active(), self.pending())
    }
}

impl HazardSlot {
    fn new() -> Self {
        HazardSlot {
            owner: AtomicUsize::new(0),
            pointer: AtomicPtr::default()
        }
    }
}

impl Drop for Retired {
    fn drop(&mut self) {
        unsafe { (self.deleter)(self.pointer) }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.index);
        }
    }
}

unsafe fn drop_boxed<N>(record: *mut ()) {
    drop(Box::from_raw(record as *mut N));
}
