//! Static field lists and sparse change-sets.

use crate::status::JobStatus;
use serde::Serialize;
use std::fmt;

/// A single column value as seen by the diffing and update code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text column.
    Text(String),
    /// Integer column.
    Int(i64),
    /// Floating point column.
    Real(f64),
    /// Status column, stored as its code.
    Status(JobStatus),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => write!(f, "{text:?}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Real(value) => write!(f, "{value}"),
            FieldValue::Status(status) => write!(f, "{status}"),
        }
    }
}

/// One mutable column of a snapshot type.
///
/// `get` reads the current value; `set` writes a value back and returns
/// false when the value has the wrong shape for the column.
pub struct Field<S: 'static> {
    /// Column name in the store.
    pub column: &'static str,
    /// Reads the column from a record.
    pub get: fn(&S) -> FieldValue,
    /// Writes the column into a record.
    pub set: fn(&mut S, &FieldValue) -> bool,
}

impl<S> fmt::Debug for Field<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("column", &self.column).finish()
    }
}

/// A persisted entity kind with a fixed list of mutable columns.
pub trait Snapshot: Clone + Send + Sync + 'static {
    /// Mutable columns, in store order.
    const FIELDS: &'static [Field<Self>];

    /// Looks up a field by column name.
    fn field(column: &str) -> Option<&'static Field<Self>> {
        Self::FIELDS.iter().find(|field| field.column == column)
    }

    /// Returns true if `column` is one of the mutable columns.
    fn is_mutable_column(column: &str) -> bool {
        Self::field(column).is_some()
    }
}

/// Columns whose values differ from the last persisted snapshot.
///
/// Columns keep the order of the snapshot's field list. A change-set is
/// written as a single statement or not at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    changes: Vec<(&'static str, FieldValue)>,
}

impl ChangeSet {
    /// Creates an empty change-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a changed column.
    pub fn push(&mut self, column: &'static str, value: FieldValue) {
        self.changes.push((column, value));
    }

    /// Builder form of [`ChangeSet::push`].
    pub fn with(mut self, column: &'static str, value: FieldValue) -> Self {
        self.push(column, value);
        self
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed columns.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Changed column names.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.changes.iter().map(|(column, _)| *column)
    }

    /// Returns the new value of a column, if it changed.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.changes
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    /// Iterates `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> + '_ {
        self.changes.iter().map(|(column, value)| (*column, value))
    }

    /// Writes every change into `record`.
    ///
    /// Returns the first column that is unknown to `S` or carries a value of
    /// the wrong shape. Nothing is written in that case.
    pub fn apply_to<S: Snapshot>(&self, record: &mut S) -> Result<(), &'static str> {
        let mut updated = record.clone();
        for (column, value) in &self.changes {
            let field = S::field(column).ok_or(*column)?;
            if !(field.set)(&mut updated, value) {
                return Err(*column);
            }
        }
        *record = updated;
        Ok(())
    }
}
