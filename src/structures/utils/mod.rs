pub use self::counted_ptr::{AtomicCountedPtr, CountedPtr, MAX_EXTERNAL_COUNT};
pub use self::spin_lock::{SpinGuard, SpinLock};

mod counted_ptr;
mod spin_lock;
