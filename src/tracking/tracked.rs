use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::core::{Result, TrackError, Value};
use crate::record::{FieldDescriptor, Persistable, Record, RecordDescriptor, RecordSnapshot};
use crate::tracking::registry::{self, Registration};
use crate::tracking::{ChangeSet, TrackedInstanceRegistry, TrackingHandle};

/// A record wrapped so that every field write is observed.
///
/// Reads go straight to the record through `Deref`. There is no `DerefMut`:
/// writes go through [`Tracked::set_field`], [`Tracked::intercept`] or the
/// typed setters generated by `#[derive(Record)]`.
///
/// Each field's baseline is captured lazily on its first write after a clean
/// checkpoint (the value held just before that write). Dirtiness is always
/// judged against the baseline, so writing a field back to its baseline value
/// makes it clean again.
pub struct Tracked<R: Record> {
    record: R,
    change_set: Arc<ChangeSet>,
    baseline: HashMap<&'static str, Value>,
    baseline_epoch: u64,
    registration: Registration,
}

impl<R: Record> Tracked<R> {
    /// Wraps an existing record. The wrapper starts clean.
    pub fn wrap(record: R) -> Result<Self> {
        Self::wrap_in(record, registry::global())
    }

    pub fn wrap_in(record: R, registry: Arc<TrackedInstanceRegistry>) -> Result<Self> {
        R::descriptor().validate()?;

        let change_set = Arc::new(ChangeSet::new());
        let registration = registry.enroll(&change_set)?;
        let baseline_epoch = change_set.clean_epoch();

        Ok(Self {
            record,
            change_set,
            baseline: HashMap::new(),
            baseline_epoch,
            registration,
        })
    }

    /// Writes `value` into `field`, recording the field as dirty when the
    /// value differs from the field's baseline.
    pub fn set_field(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        if field.is_empty() {
            return Err(TrackError::InvalidArgument(
                "field name must not be empty".to_string(),
            ));
        }

        let descriptor = R::descriptor().require_field(field)?;
        if !descriptor.settable {
            return Err(TrackError::UnsupportedShape(format!(
                "{}.{} is not independently settable",
                R::descriptor().type_name,
                descriptor.name
            )));
        }

        let value = value.into();
        if !self.change_set.is_tracking() {
            return self.record.set(descriptor.name, value);
        }

        let previous = self.record.get(descriptor.name).unwrap_or(Value::Null);
        self.record.set(descriptor.name, value)?;
        // Compare what the field holds after conversion, not the raw input.
        let stored = self.record.get(descriptor.name).unwrap_or(Value::Null);
        self.observe(descriptor, previous, &stored);
        Ok(())
    }

    /// Applies a typed write to the record and runs dirty detection for
    /// `field`. Used by generated setters; `next` must be the value `apply`
    /// stores.
    pub fn intercept<F>(&mut self, field: &'static str, next: Value, apply: F)
    where
        F: FnOnce(&mut R),
    {
        let descriptor = R::descriptor().field(field);
        let previous = match descriptor {
            Some(_) if self.change_set.is_tracking() => self.record.get(field),
            _ => None,
        };

        apply(&mut self.record);

        if let (Some(descriptor), Some(previous)) = (descriptor, previous) {
            self.observe(descriptor, previous, &next);
        }
    }

    fn observe(&mut self, field: &'static FieldDescriptor, previous: Value, next: &Value) {
        self.sync_baseline();

        let baseline = self.baseline.entry(field.name).or_insert(previous);
        if field.is_ignored() || R::descriptor().is_identity(field.name) {
            return;
        }

        if *baseline != *next {
            self.change_set.mark_dirty(field.name);
        } else {
            self.change_set.mark_field_clean(field.name);
        }
    }

    // A clear through any reference to the change set invalidates baselines.
    fn sync_baseline(&mut self) {
        let epoch = self.change_set.clean_epoch();
        if epoch != self.baseline_epoch {
            self.baseline.clear();
            self.baseline_epoch = epoch;
        }
    }

    pub fn get_field(&self, field: &str) -> Option<Value> {
        self.record.get(field)
    }

    /// Value `field` held at the last clean checkpoint.
    pub fn original_value(&self, field: &str) -> Option<Value> {
        if self.baseline_epoch == self.change_set.clean_epoch() {
            if let Some(value) = self.baseline.get(field) {
                return Some(value.clone());
            }
        }
        self.record.get(field)
    }

    /// Restores baseline values of every dirty field and marks the wrapper
    /// clean.
    pub fn discard_changes(&mut self) -> Result<()> {
        self.sync_baseline();
        let was_tracking = self.change_set.is_tracking();
        self.change_set.stop_tracking();

        let restored = self.change_set.dirty_fields().into_iter().try_for_each(|field| {
            match self.baseline.get(field.as_str()) {
                Some(value) => self.record.set(&field, value.clone()),
                None => Ok(()),
            }
        });

        self.change_set.mark_clean();
        if was_tracking {
            self.change_set.start_tracking();
        }
        restored
    }

    pub fn mark_clean(&self) {
        self.change_set.mark_clean();
    }

    pub fn is_dirty(&self) -> bool {
        self.change_set.is_dirty()
    }

    pub fn is_field_dirty(&self, field: &str) -> bool {
        self.change_set.is_field_dirty(field)
    }

    pub fn dirty_fields(&self) -> BTreeSet<String> {
        self.change_set.dirty_fields()
    }

    pub fn change_set(&self) -> &Arc<ChangeSet> {
        &self.change_set
    }

    pub fn handle(&self) -> TrackingHandle {
        self.registration.handle()
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    /// Unwraps the record and drops its registry entry.
    pub fn into_inner(self) -> R {
        self.record
    }

    fn copy_values<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.change_set.stop_tracking();
        let copied = values
            .into_iter()
            .try_for_each(|(field, value)| self.set_field(&field, value));
        self.change_set.mark_clean();
        self.change_set.start_tracking();
        copied
    }
}

impl<R: Record + Default> Tracked<R> {
    /// Fresh, default-valued tracked instance.
    pub fn new() -> Result<Self> {
        Self::wrap(R::default())
    }

    pub fn new_in(registry: Arc<TrackedInstanceRegistry>) -> Result<Self> {
        Self::wrap_in(R::default(), registry)
    }

    /// Builds a tracked instance whose values are copied from `source`. The
    /// copy is not recorded, so the result starts clean.
    pub fn copy_from(source: &R) -> Result<Self> {
        Self::copy_from_in(source, registry::global())
    }

    pub fn copy_from_in(source: &R, registry: Arc<TrackedInstanceRegistry>) -> Result<Self> {
        let mut tracked = Self::new_in(registry)?;
        let descriptor: &RecordDescriptor = R::descriptor();

        let mut values = Vec::with_capacity(descriptor.fields.len());
        for field in descriptor.fields {
            let value = source.get(field.name).ok_or_else(|| {
                TrackError::InvalidArgument(format!(
                    "source {} does not provide field '{}'",
                    descriptor.type_name, field.name
                ))
            })?;
            values.push((field.name.to_string(), value));
        }

        tracked.copy_values(values)?;
        Ok(tracked)
    }

    /// Materializes a tracked instance from a column map, e.g. a row read
    /// from a data source. The result starts clean.
    pub fn from_values(values: BTreeMap<String, Value>) -> Result<Self> {
        Self::from_values_in(values, registry::global())
    }

    pub fn from_values_in(
        values: BTreeMap<String, Value>,
        registry: Arc<TrackedInstanceRegistry>,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(TrackError::InvalidArgument(format!(
                "cannot materialize {} from an empty row",
                R::descriptor().type_name
            )));
        }

        let mut tracked = Self::new_in(registry)?;
        tracked.copy_values(values)?;
        Ok(tracked)
    }
}

impl<R: Record> Deref for Tracked<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

impl<R: Record + fmt::Debug> fmt::Debug for Tracked<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("handle", &self.handle())
            .field("record", &self.record)
            .field("dirty", &self.change_set.dirty_fields())
            .finish()
    }
}

impl<R: Record> Persistable for Tracked<R> {
    fn record_descriptor(&self) -> &'static RecordDescriptor {
        R::descriptor()
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot::capture(&self.record)
    }

    fn change_set(&self) -> Option<&Arc<ChangeSet>> {
        Some(&self.change_set)
    }

    fn tracking_handle(&self) -> Option<TrackingHandle> {
        Some(self.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldValue;
    use crate::record::testing::{Contact, Invoice, contact};

    fn registry() -> Arc<TrackedInstanceRegistry> {
        Arc::new(TrackedInstanceRegistry::new())
    }

    fn set_email(tracked: &mut Tracked<Contact>, email: &str) {
        let value = Some(email.to_string());
        let next = value.to_value();
        tracked.intercept("email", next, move |record| record.email = value);
    }

    #[test]
    fn copy_construct_starts_clean() {
        let source = contact(11);
        let tracked = Tracked::copy_from_in(&source, registry()).unwrap();

        assert!(!tracked.is_dirty());
        assert_eq!(tracked.record(), &source);
    }

    #[test]
    fn writing_the_same_value_is_not_dirty() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.set_field("first_name", "Ada").unwrap();
        set_email(&mut tracked, "ada@example.com");

        assert!(!tracked.is_dirty());
    }

    #[test]
    fn dirty_set_matches_changed_fields_exactly() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        set_email(&mut tracked, "ada@analytical.engine");
        tracked.set_field("last_name", "Byron").unwrap();
        tracked.set_field("last_name", "King").unwrap();
        set_email(&mut tracked, "countess@analytical.engine");

        let expected: BTreeSet<String> =
            ["email", "last_name"].iter().map(|f| f.to_string()).collect();
        assert_eq!(tracked.dirty_fields(), expected);
        assert_eq!(tracked.last_name, "King");
    }

    #[test]
    fn comparisons_use_the_baseline_not_the_previous_value() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.set_field("first_name", "Augusta").unwrap();
        tracked.set_field("first_name", "Grace").unwrap();
        tracked.set_field("first_name", "Augusta").unwrap();
        assert!(tracked.is_field_dirty("first_name"));

        tracked.set_field("first_name", "Ada").unwrap();
        assert!(!tracked.is_field_dirty("first_name"));
        assert_eq!(tracked.original_value("first_name"), Some(Value::from("Ada")));
    }

    #[test]
    fn fresh_wrapper_compares_first_write_with_default() {
        let mut tracked = Tracked::<Contact>::new_in(registry()).unwrap();

        tracked.set_field("first_name", "").unwrap();
        assert!(!tracked.is_dirty());

        tracked.set_field("last_name", "Hopper").unwrap();
        assert_eq!(tracked.dirty_fields().len(), 1);
        assert!(tracked.is_field_dirty("last_name"));
    }

    #[test]
    fn baselines_reset_after_clean() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.set_field("first_name", "Grace").unwrap();
        tracked.mark_clean();
        tracked.set_field("first_name", "Grace").unwrap();
        assert!(!tracked.is_dirty());

        tracked.set_field("first_name", "Ada").unwrap();
        assert!(tracked.is_field_dirty("first_name"));
    }

    #[test]
    fn ignored_and_identity_fields_never_become_dirty() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.set_field("cached_label", "stale").unwrap();
        tracked.set_field("id", 99i64).unwrap();

        assert!(!tracked.is_dirty());
        assert_eq!(tracked.cached_label, "stale");
        assert_eq!(tracked.id, 99);
    }

    #[test]
    fn writes_while_stopped_are_applied_but_not_recorded() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.change_set().stop_tracking();
        tracked.set_field("first_name", "Grace").unwrap();
        tracked.change_set().start_tracking();

        assert!(!tracked.is_dirty());
        assert_eq!(tracked.first_name, "Grace");
    }

    #[test]
    fn discard_changes_restores_baselines() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        tracked.set_field("first_name", "Grace").unwrap();
        set_email(&mut tracked, "grace@navy.mil");
        tracked.discard_changes().unwrap();

        assert!(!tracked.is_dirty());
        assert_eq!(tracked.record(), &contact(1));
    }

    #[test]
    fn invalid_writes_are_rejected() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();

        assert!(matches!(
            tracked.set_field("", "x"),
            Err(TrackError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracked.set_field("nickname", "x"),
            Err(TrackError::FieldNotFound { .. })
        ));
        assert!(matches!(
            tracked.set_field("first_name", 5i64),
            Err(TrackError::TypeMismatch(_))
        ));
        assert!(!tracked.is_dirty());
        assert_eq!(tracked.first_name, "Ada");
    }

    #[test]
    fn unsupported_shapes_cannot_be_wrapped() {
        let err = Tracked::<Invoice>::new_in(registry()).unwrap_err();
        assert!(matches!(err, TrackError::UnsupportedShape(_)));
    }

    #[test]
    fn empty_rows_are_rejected() {
        let err = Tracked::<Contact>::from_values_in(BTreeMap::new(), registry()).unwrap_err();
        assert!(matches!(err, TrackError::InvalidArgument(_)));
    }

    #[test]
    fn from_values_starts_clean() {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), Value::Integer(5));
        row.insert("first_name".to_string(), Value::from("Grace"));

        let tracked = Tracked::<Contact>::from_values_in(row, registry()).unwrap();
        assert!(!tracked.is_dirty());
        assert_eq!(tracked.first_name, "Grace");
        assert_eq!(tracked.id, 5);
    }

    #[test]
    fn registry_entry_follows_wrapper_lifetime() {
        let registry = registry();
        let tracked = Tracked::wrap_in(contact(1), Arc::clone(&registry)).unwrap();

        assert!(registry.is_tracked(&tracked));
        let change_set = registry.change_set_for(&tracked).unwrap();
        assert!(Arc::ptr_eq(&change_set, tracked.change_set()));

        let record = tracked.into_inner();
        assert!(!registry.is_tracked(&record));
        assert!(registry.is_empty());
    }

    #[test]
    fn clean_through_registry_resets_baselines() {
        let registry = registry();
        let mut tracked = Tracked::wrap_in(contact(1), Arc::clone(&registry)).unwrap();
        tracked.set_field("first_name", "Grace").unwrap();

        registry.change_set_for(&tracked).unwrap().mark_clean();
        assert!(!tracked.is_dirty());

        tracked.set_field("first_name", "Ada").unwrap();
        assert!(tracked.is_field_dirty("first_name"));
    }

    #[test]
    fn discard_changes_keeps_tracking_switched_off() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();
        tracked.set_field("last_name", "Byron").unwrap();
        tracked.change_set().stop_tracking();

        tracked.discard_changes().unwrap();
        assert_eq!(tracked.last_name, "Lovelace");
        assert!(!tracked.change_set().is_tracking());

        tracked.set_field("last_name", "King").unwrap();
        assert!(!tracked.is_dirty());
    }

    #[test]
    fn discard_changes_resumes_tracking_when_it_was_on() {
        let mut tracked = Tracked::wrap_in(contact(1), registry()).unwrap();
        tracked.set_field("last_name", "Byron").unwrap();

        tracked.discard_changes().unwrap();
        assert!(tracked.change_set().is_tracking());
    }
}
