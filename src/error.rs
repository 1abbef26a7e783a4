use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Fatal conditions. A full or empty container is not an error: `push` returns `false`
/// and `pop` returns `None` for those.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("No hazard pointers available: all {slots} slots are owned by live threads")]
    HazardSlotsExhausted { slots: usize },

    #[error("Invalid capacity {capacity}: must be a power of two and at least 2")]
    InvalidCapacity { capacity: usize },
}
