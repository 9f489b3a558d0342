use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashSet;

/// Dirty field names of one tracked instance.
///
/// All operations take `&self` and may be called from several threads at
/// once; the set itself is a concurrent set and the flags are atomics.
#[derive(Debug)]
pub struct ChangeSet {
    dirty: DashSet<String>,
    tracking: AtomicBool,
    // Bumped on every clear so the owning wrapper can drop its baselines.
    clean_epoch: AtomicU64,
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            dirty: DashSet::new(),
            tracking: AtomicBool::new(true),
            clean_epoch: AtomicU64::new(0),
        }
    }

    /// Records `field` as dirty. Ignored for empty names and while tracking
    /// is stopped.
    pub fn mark_dirty(&self, field: &str) {
        if field.is_empty() || !self.is_tracking() {
            return;
        }
        if !self.dirty.contains(field) {
            self.dirty.insert(field.to_string());
        }
    }

    /// Drops a single field from the dirty set.
    pub fn mark_field_clean(&self, field: &str) -> bool {
        self.dirty.remove(field).is_some()
    }

    pub fn mark_clean(&self) {
        self.dirty.clear();
        self.clean_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_field_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    /// Sorted snapshot of the dirty field names.
    pub fn dirty_fields(&self) -> BTreeSet<String> {
        self.dirty.iter().map(|field| field.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    pub fn start_tracking(&self) {
        self.tracking.store(true, Ordering::Release);
    }

    pub fn stop_tracking(&self) {
        self.tracking.store(false, Ordering::Release);
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    pub fn clean_epoch(&self) -> u64 {
        self.clean_epoch.load(Ordering::Acquire)
    }
}
