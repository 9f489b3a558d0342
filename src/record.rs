//! Record shapes as seen by the tracker.
//!
//! A record exposes a capability interface (`get`/`set` by field name) plus a
//! static descriptor with the mapping metadata the persistence side needs:
//! table, identity field, column names and the nullable "ignored" flag.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::core::{Result, TrackError, Value};
use crate::tracking::{ChangeSet, TrackingHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub column: &'static str,
    pub sql_type: &'static str,
    /// `None` when the mapping carries no opinion; treated as not ignored.
    pub ignored: Option<bool>,
    /// `false` for fields that cannot be written independently.
    pub settable: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            column: name,
            sql_type,
            ignored: None,
            settable: true,
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub type_name: &'static str,
    pub table: &'static str,
    pub identity: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl RecordDescriptor {
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn identity_field(&self) -> Option<&'static FieldDescriptor> {
        self.field(self.identity)
    }

    pub fn is_identity(&self, name: &str) -> bool {
        self.identity == name
    }

    /// Checks that every field of the shape can be intercepted.
    pub fn validate(&self) -> Result<()> {
        if self.identity_field().is_none() {
            return Err(TrackError::UnsupportedShape(format!(
                "{} has no identity field '{}'",
                self.type_name, self.identity
            )));
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in self.fields {
            if field.name.is_empty() {
                return Err(TrackError::UnsupportedShape(format!(
                    "{} declares a field with an empty name",
                    self.type_name
                )));
            }
            if !seen.insert(field.name) {
                return Err(TrackError::UnsupportedShape(format!(
                    "{} declares field '{}' twice",
                    self.type_name, field.name
                )));
            }
            if !field.settable {
                return Err(TrackError::UnsupportedShape(format!(
                    "{}.{} is not independently settable",
                    self.type_name, field.name
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn require_field(&self, name: &str) -> Result<&'static FieldDescriptor> {
        self.field(name).ok_or_else(|| TrackError::FieldNotFound {
            record: self.type_name.to_string(),
            field: name.to_string(),
        })
    }
}

/// Capability interface every trackable record implements.
///
/// Usually generated with `#[derive(Record)]`.
pub trait Record: Send + Sync + 'static {
    fn descriptor() -> &'static RecordDescriptor;

    /// Current value of `field`, or `None` if the record has no such field.
    fn get(&self, field: &str) -> Option<Value>;

    fn set(&mut self, field: &str, value: Value) -> Result<()>;
}

/// Point-in-time copy of a record's column values.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub descriptor: &'static RecordDescriptor,
    pub values: BTreeMap<&'static str, Value>,
}

impl RecordSnapshot {
    pub fn capture<R: Record>(record: &R) -> Self {
        let descriptor = R::descriptor();
        let values = descriptor
            .fields
            .iter()
            .map(|field| (field.name, record.get(field.name).unwrap_or(Value::Null)))
            .collect();

        Self { descriptor, values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn identity(&self) -> Option<&Value> {
        self.values
            .get(self.descriptor.identity)
            .filter(|value| !value.is_null())
    }
}

/// Anything the selective persistence path can write: plain records and
/// tracked wrappers alike.
pub trait Persistable: Send + Sync {
    fn record_descriptor(&self) -> &'static RecordDescriptor;
    fn snapshot(&self) -> RecordSnapshot;

    /// Change set of a tracked wrapper; `None` for plain records.
    fn change_set(&self) -> Option<&Arc<ChangeSet>> {
        None
    }

    fn tracking_handle(&self) -> Option<TrackingHandle> {
        None
    }
}

impl<R: Record> Persistable for R {
    fn record_descriptor(&self) -> &'static RecordDescriptor {
        R::descriptor()
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot::capture(self)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::FieldValue;

    /// Hand-written record used across unit tests.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Contact {
        pub id: i64,
        pub first_name: String,
        pub last_name: String,
        pub email: Option<String>,
        pub cached_label: String,
    }

    static CONTACT_FIELDS: [FieldDescriptor; 5] = [
        FieldDescriptor::new("id", "INTEGER"),
        FieldDescriptor::new("first_name", "TEXT"),
        FieldDescriptor::new("last_name", "TEXT"),
        FieldDescriptor {
            name: "email",
            column: "email_address",
            sql_type: "TEXT",
            ignored: Some(false),
            settable: true,
        },
        FieldDescriptor {
            name: "cached_label",
            column: "cached_label",
            sql_type: "TEXT",
            ignored: Some(true),
            settable: true,
        },
    ];

    static CONTACT: RecordDescriptor = RecordDescriptor {
        type_name: "Contact",
        table: "contacts",
        identity: "id",
        fields: &CONTACT_FIELDS,
    };

    impl Record for Contact {
        fn descriptor() -> &'static RecordDescriptor {
            &CONTACT
        }

        fn get(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.to_value()),
                "first_name" => Some(self.first_name.to_value()),
                "last_name" => Some(self.last_name.to_value()),
                "email" => Some(self.email.to_value()),
                "cached_label" => Some(self.cached_label.to_value()),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = FieldValue::from_value(value)?,
                "first_name" => self.first_name = FieldValue::from_value(value)?,
                "last_name" => self.last_name = FieldValue::from_value(value)?,
                "email" => self.email = FieldValue::from_value(value)?,
                "cached_label" => self.cached_label = FieldValue::from_value(value)?,
                other => {
                    return Err(TrackError::FieldNotFound {
                        record: "Contact".to_string(),
                        field: other.to_string(),
                    });
                }
            }
            Ok(())
        }
    }

    pub fn contact(id: i64) -> Contact {
        Contact {
            id,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            cached_label: "Ada L.".to_string(),
        }
    }

    /// Shape whose computed field cannot be intercepted.
    #[derive(Debug, Default)]
    pub struct Invoice {
        pub id: i64,
        pub total: f64,
    }

    static INVOICE_FIELDS: [FieldDescriptor; 2] = [
        FieldDescriptor::new("id", "INTEGER"),
        FieldDescriptor {
            name: "total",
            column: "total",
            sql_type: "FLOAT",
            ignored: None,
            settable: false,
        },
    ];

    static INVOICE: RecordDescriptor = RecordDescriptor {
        type_name: "Invoice",
        table: "invoices",
        identity: "id",
        fields: &INVOICE_FIELDS,
    };

    impl Record for Invoice {
        fn descriptor() -> &'static RecordDescriptor {
            &INVOICE
        }

        fn get(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.to_value()),
                "total" => Some(self.total.to_value()),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => {
                    self.id = FieldValue::from_value(value)?;
                    Ok(())
                }
                _ => Err(TrackError::UnsupportedShape(format!(
                    "Invoice.{} is computed",
                    field
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Invoice, contact};
    use super::*;

    #[test]
    fn snapshot_reads_every_declared_field() {
        let snapshot = contact(7).snapshot();
        assert_eq!(snapshot.identity(), Some(&Value::Integer(7)));
        assert_eq!(snapshot.get("first_name"), Some(&Value::from("Ada")));
        assert_eq!(snapshot.values.len(), 5);
    }

    #[test]
    fn validate_rejects_non_settable_fields() {
        let err = Invoice::descriptor().validate().unwrap_err();
        assert!(matches!(err, TrackError::UnsupportedShape(_)));
    }

    #[test]
    fn plain_records_are_not_tracked() {
        let record = contact(1);
        assert!(record.change_set().is_none());
        assert!(record.tracking_handle().is_none());
    }
}
