use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lazy_static::lazy_static;
use log::warn;

use crate::core::{Result, TrackError};
use crate::record::Persistable;
use crate::tracking::{ChangeSet, TrackingHandle};

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<TrackedInstanceRegistry> =
        Arc::new(TrackedInstanceRegistry::new());
}

/// Process-wide registry used by wrappers built without an explicit one.
pub fn global() -> Arc<TrackedInstanceRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}

/// Maps tracking handles to their change sets.
///
/// Values are weak references: the registry never keeps a change set (or the
/// wrapper owning it) alive. Entries are removed when the wrapper is dropped.
#[derive(Debug, Default)]
pub struct TrackedInstanceRegistry {
    entries: DashMap<TrackingHandle, Weak<ChangeSet>>,
}

impl TrackedInstanceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, handle: TrackingHandle, change_set: &Arc<ChangeSet>) -> Result<()> {
        match self.entries.entry(handle) {
            Entry::Occupied(mut entry) => {
                if entry.get().strong_count() > 0 {
                    return Err(TrackError::AlreadyRegistered(handle));
                }
                warn!("replacing dead registry entry for tracked instance {}", handle);
                entry.insert(Arc::downgrade(change_set));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(change_set));
            }
        }
        Ok(())
    }

    pub fn unregister(&self, handle: TrackingHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Returns `true` only for live tracked wrappers. Plain records and
    /// dropped wrappers report `false`.
    pub fn is_tracked<T: Persistable + ?Sized>(&self, instance: &T) -> bool {
        instance
            .tracking_handle()
            .is_some_and(|handle| self.is_live(handle))
    }

    pub fn change_set_for<T: Persistable + ?Sized>(&self, instance: &T) -> Result<Arc<ChangeSet>> {
        let handle = instance.tracking_handle().ok_or_else(|| {
            TrackError::NotTracked(format!(
                "{} is a plain record",
                instance.record_descriptor().type_name
            ))
        })?;
        self.change_set_by_handle(handle)
    }

    pub fn change_set_by_handle(&self, handle: TrackingHandle) -> Result<Arc<ChangeSet>> {
        self.entries
            .get(&handle)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| TrackError::NotTracked(format!("no live instance for handle {}", handle)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries whose change set is gone. Returns the number removed.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, change_set| change_set.strong_count() > 0);
        before.saturating_sub(self.entries.len())
    }

    fn is_live(&self, handle: TrackingHandle) -> bool {
        self.entries
            .get(&handle)
            .is_some_and(|entry| entry.value().strong_count() > 0)
    }

    pub(crate) fn enroll(
        self: &Arc<Self>,
        change_set: &Arc<ChangeSet>,
    ) -> Result<Registration> {
        let handle = TrackingHandle::next();
        self.register(handle, change_set)?;
        Ok(Registration {
            handle,
            registry: Arc::clone(self),
        })
    }
}

/// Removes the registry entry when the owning wrapper goes away.
#[derive(Debug)]
pub(crate) struct Registration {
    handle: TrackingHandle,
    registry: Arc<TrackedInstanceRegistry>,
}

impl Registration {
    pub(crate) fn handle(&self) -> TrackingHandle {
        self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}
