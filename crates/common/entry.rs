use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Visibility of a row inside a storage layer.
///
/// `Deleted` and `Purged` rows are never returned by point lookups.
/// `Purged` additionally means "drop from the cache": a purged row may be
/// re-fetched from the parent layer, a deleted one may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntryStatus {
    #[default]
    Normal,
    Modified,
    Deleted,
    Purged,
}

/// Schema of a table: a designated key field plus an ordered tuple of
/// value fields. Field order is fixed at creation and drives both entry
/// layout and dirty-row hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub key_field: String,
    pub value_fields: Vec<String>,
}

impl TableSchema {
    pub fn new(key_field: impl Into<String>, value_fields: &[&str]) -> Self {
        Self {
            key_field: key_field.into(),
            value_fields: value_fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.value_fields.iter().any(|f| f == name)
    }
}

/// One row: an ordered mapping of field name to bytes plus a status flag.
///
/// Field order mirrors the owning table's schema. Once an entry is stored,
/// later mutations go through a fresh copy (copy-on-write); layers never
/// hand out aliased mutable rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    fields: Vec<(String, Bytes)>,
    status: EntryStatus,
}

impl Entry {
    /// An empty entry bound to a schema: every value field present, empty.
    pub fn from_schema(schema: &TableSchema) -> Self {
        Self {
            fields: schema
                .value_fields
                .iter()
                .map(|f| (f.clone(), Bytes::new()))
                .collect(),
            status: EntryStatus::Normal,
        }
    }

    /// A tombstone row used by `remove`.
    pub fn deleted() -> Self {
        Self {
            fields: Vec::new(),
            status: EntryStatus::Deleted,
        }
    }

    /// A cache-eviction marker row.
    pub fn purged() -> Self {
        Self {
            fields: Vec::new(),
            status: EntryStatus::Purged,
        }
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EntryStatus) {
        self.status = status;
    }

    pub fn get_field(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.as_ref())
    }

    /// Field value as UTF-8, empty string when absent or non-UTF-8.
    pub fn field_str(&self, name: &str) -> &str {
        self.get_field(name)
            .and_then(|v| std::str::from_utf8(v).ok())
            .unwrap_or("")
    }

    /// Sets a field, appending it if the schema did not pre-populate it.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v.as_ref()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Sum of the lengths of the fields that participate in the table
    /// hash (all value fields). Drives memory-proportional gas billing
    /// and layer capacity accounting.
    pub fn capacity_of_hash_field(&self) -> usize {
        self.fields.iter().map(|(_, v)| v.len()).sum()
    }

    /// Bytes retained by this entry, field names included.
    pub fn size(&self) -> usize {
        self.fields.iter().map(|(f, v)| f.len() + v.len()).sum()
    }
}
