//! Write interception and dirty-field bookkeeping.

mod change_set;
mod registry;
mod tracked;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use change_set::ChangeSet;
pub use registry::{TrackedInstanceRegistry, global};
pub use tracked::Tracked;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a tracked wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingHandle(u64);

impl TrackingHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
