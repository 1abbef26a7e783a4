use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

const PTR_BITS: u32 = 48;
const PTR_MASK: u64 = (1 << PTR_BITS) - 1;

/// Largest external count a packed pointer can carry.
pub const MAX_EXTERNAL_COUNT: u16 = u16::MAX;

/// A node pointer together with the number of places that hold a copy of it.
///
/// The pair is packed into a single word so it can be swapped with one CAS: the address
/// sits in the low 48 bits and the external count in the high 16.
///
/// # Panics
/// Packing panics if the address does not fit in 48 bits, as with five-level paging or
/// tagged pointers.
pub struct CountedPtr<N> {
    pub external_count: u16,
    pub ptr: *mut N
}

impl<N> CountedPtr<N> {
    pub fn new(external_count: u16, ptr: *mut N) -> Self {
        CountedPtr { external_count, ptr }
    }

    pub fn null() -> Self {
        CountedPtr::new(0, ::std::ptr::null_mut())
    }

    fn pack(self) -> u64 {
        let address = self.ptr as usize as u64;
        assert!(address & !PTR_MASK == 0, "node address {:#x} does not fit in 48 bits", address);
        (u64::from(self.external_count) << PTR_BITS) | address
    }

    fn unpack(word: u64) -> Self {
        CountedPtr {
            external_count: (word >> PTR_BITS) as u16,
            ptr: (word & PTR_MASK) as usize as *mut N
        }
    }
}

impl<N> Clone for CountedPtr<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for CountedPtr<N> {}

impl<N> PartialEq for CountedPtr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.external_count == other.external_count && self.ptr == other.ptr
    }
}

impl<N> ::std::fmt::Debug for CountedPtr<N> {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "CountedPtr {{ external_count: {}, ptr: {:?} }}", self.external_count, self.ptr)
    }
}

/// An atomic `CountedPtr`.
pub struct AtomicCountedPtr<N> {
    word: AtomicU64,
    marker: PhantomData<*mut N>
}

impl<N> AtomicCountedPtr<N> {
    pub fn new(value: CountedPtr<N>) -> Self {
        AtomicCountedPtr {
            word: AtomicU64::new(value.pack()),
            marker: PhantomData
        }
    }

    pub fn load(&self, order: Ordering) -> CountedPtr<N> {
        CountedPtr::unpack(self.word.load(order))
    }

    pub fn compare_exchange(&self, current: CountedPtr<N>, new: CountedPtr<N>,
                            success: Ordering, failure: Ordering) -> Result<CountedPtr<N>, CountedPtr<N>> {
        self.word.compare_exchange(current.pack(), new.pack(), success, failure)
            .map(CountedPtr::unpack)
            .map_err(CountedPtr::unpack)
    }

    pub fn compare_exchange_weak(&self, current: CountedPtr<N>, new: CountedPtr<N>,
                                 success: Ordering, failure: Ordering) -> Result<CountedPtr<N>, CountedPtr<N>> {
        self.word.compare_exchange_weak(current.pack(), new.pack(), success, failure)
            .map(CountedPtr::unpack)
            .map_err(CountedPtr::unpack)
    }
}

unsafe impl<N: Send> Send for AtomicCountedPtr<N> {}
unsafe impl<N: Send> Sync for AtomicCountedPtr<N> {}

impl<N> Default for AtomicCountedPtr<N> {
    fn default() -> Self {
        AtomicCountedPtr::new(CountedPtr::null())
    }
}
