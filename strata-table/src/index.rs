//! Secondary indexes mapping column values to row ids.
//!
//! An [`Index`] keeps its entries behind its own lock; the only way to read
//! or change them is through the [`IndexLock`] guard returned by
//! [`Index::lock`]. Appends hold the guards of every index of a table for
//! their whole duration.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use arrow::array::{Array, ArrayRef};
use parking_lot::{Mutex, MutexGuard};
use strata_result::{Error, Result};
use strata_types::{ColumnId, Literal, RowId};

/// One component of an index key. Floats order by `f64::total_cmp`.
#[derive(Debug, Clone)]
pub enum KeyPart {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Int(_) => 0,
            KeyPart::Float(_) => 1,
            KeyPart::Str(_) => 2,
            KeyPart::Bool(_) => 3,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Int(a), KeyPart::Int(b)) => a.cmp(b),
            (KeyPart::Float(a), KeyPart::Float(b)) => a.total_cmp(b),
            (KeyPart::Str(a), KeyPart::Str(b)) => a.cmp(b),
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(v) => write!(f, "{v}"),
            KeyPart::Float(v) => write!(f, "{v}"),
            KeyPart::Str(v) => write!(f, "{v}"),
            KeyPart::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl KeyPart {
    /// `None` for NULL.
    pub fn from_literal(literal: Literal) -> Option<Self> {
        match literal {
            Literal::Null => None,
            Literal::Int64(v) => Some(KeyPart::Int(v)),
            Literal::Float64(v) => Some(KeyPart::Float(v)),
            Literal::String(v) => Some(KeyPart::Str(v)),
            Literal::Boolean(v) => Some(KeyPart::Bool(v)),
        }
    }
}

pub type IndexKey = Vec<KeyPart>;

fn format_key(key: &IndexKey) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build one key per row. Rows with a NULL in any key column yield `None`
/// and are not indexed.
fn build_keys(columns: &[ArrayRef], rows: usize) -> Result<Vec<Option<IndexKey>>> {
    let mut keys = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut key = Vec::with_capacity(columns.len());
        for column in columns {
            match KeyPart::from_literal(Literal::from_array(column.as_ref(), row)?) {
                Some(part) => key.push(part),
                None => break,
            }
        }
        keys.push((key.len() == columns.len()).then_some(key));
    }
    Ok(keys)
}

#[derive(Debug, Default)]
struct IndexEntries {
    map: BTreeMap<IndexKey, Vec<RowId>>,
    rows: usize,
}

/// An ordered index over one or more table columns.
#[derive(Debug)]
pub struct Index {
    name: String,
    column_ids: Vec<ColumnId>,
    unique: bool,
    entries: Mutex<IndexEntries>,
}

impl Index {
    pub fn new(name: impl Into<String>, column_ids: Vec<ColumnId>, unique: bool) -> Self {
        Self {
            name: name.into(),
            column_ids,
            unique,
            entries: Mutex::new(IndexEntries::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table columns forming the key, in key order.
    pub fn column_ids(&self) -> &[ColumnId] {
        &self.column_ids
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Does an update of `updated` touch any key column?
    pub fn is_updated(&self, updated: &[ColumnId]) -> bool {
        updated.iter().any(|c| self.column_ids.contains(c))
    }

    pub fn lock(&self) -> IndexLock<'_> {
        IndexLock {
            index: self,
            entries: self.entries.lock(),
        }
    }

    /// Insert keys and row ids, taking the lock for the call.
    pub fn append(&self, columns: &[ArrayRef], row_ids: &[RowId]) -> Result<()> {
        self.lock().insert(columns, row_ids)
    }

    /// Row ids stored under `key`. A NULL key matches nothing.
    pub fn lookup(&self, key: &[Literal]) -> Vec<RowId> {
        let Some(key) = key
            .iter()
            .cloned()
            .map(KeyPart::from_literal)
            .collect::<Option<IndexKey>>()
        else {
            return Vec::new();
        };
        self.entries
            .lock()
            .map
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.entries.lock().rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to an index's entries.
pub struct IndexLock<'a> {
    index: &'a Index,
    entries: MutexGuard<'a, IndexEntries>,
}

impl IndexLock<'_> {
    pub fn index(&self) -> &Index {
        self.index
    }

    fn duplicate(&self, key: &IndexKey) -> Error {
        Error::constraint(format!(
            "duplicate key \"{}\" violates unique constraint on index {}",
            format_key(key),
            self.index.name
        ))
    }

    fn check_unique(&self, keys: &[Option<IndexKey>]) -> Result<()> {
        if !self.index.unique {
            return Ok(());
        }
        let mut seen = std::collections::BTreeSet::new();
        for key in keys.iter().flatten() {
            if self.entries.map.contains_key(key) || !seen.insert(key) {
                return Err(self.duplicate(key));
            }
        }
        Ok(())
    }

    fn check_shape(&self, columns: &[ArrayRef]) -> Result<usize> {
        if columns.len() != self.index.column_ids.len() {
            return Err(Error::InvalidArgumentError(format!(
                "index {} expects {} key columns, got {}",
                self.index.name,
                self.index.column_ids.len(),
                columns.len()
            )));
        }
        Ok(columns.first().map_or(0, |c| c.len()))
    }

    /// Fail if inserting `columns` would violate uniqueness. Does not modify.
    pub fn verify_append(&self, columns: &[ArrayRef]) -> Result<()> {
        let rows = self.check_shape(columns)?;
        self.check_unique(&build_keys(columns, rows)?)
    }

    /// Insert every row or none of them.
    pub fn insert(&mut self, columns: &[ArrayRef], row_ids: &[RowId]) -> Result<()> {
        let rows = self.check_shape(columns)?;
        if rows != row_ids.len() {
            return Err(Error::InvalidArgumentError(
                "index key columns and row ids differ in length".into(),
            ));
        }
        let keys = build_keys(columns, rows)?;
        self.check_unique(&keys)?;
        let entries = &mut *self.entries;
        for (key, &row_id) in keys.into_iter().zip(row_ids) {
            if let Some(key) = key {
                entries.map.entry(key).or_default().push(row_id);
                entries.rows += 1;
            }
        }
        Ok(())
    }

    /// Remove the given rows. Missing entries are ignored.
    pub fn delete(&mut self, columns: &[ArrayRef], row_ids: &[RowId]) -> Result<()> {
        let rows = self.check_shape(columns)?;
        let keys = build_keys(columns, rows)?;
        let entries = &mut *self.entries;
        for (key, row_id) in keys.into_iter().zip(row_ids) {
            let Some(key) = key else { continue };
            if let Some(ids) = entries.map.get_mut(&key) {
                if let Some(pos) = ids.iter().position(|id| id == row_id) {
                    ids.swap_remove(pos);
                    entries.rows -= 1;
                }
                if ids.is_empty() {
                    entries.map.remove(&key);
                }
            }
        }
        Ok(())
    }

    pub fn contains_row(&self, row_id: RowId) -> bool {
        self.entries.map.values().any(|ids| ids.contains(&row_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use std::sync::Arc;

    fn ints(values: Vec<Option<i64>>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    #[test]
    fn unique_rejects_duplicates_in_batch_and_table() {
        let index = Index::new("pk", vec![0], true);
        index.append(&[ints(vec![Some(1), Some(2)])], &[0, 1]).unwrap();

        let err = index.append(&[ints(vec![Some(3), Some(3)])], &[2, 3]).unwrap_err();
        assert!(err.is_constraint());
        let err = index.append(&[ints(vec![Some(4), Some(2)])], &[2, 3]).unwrap_err();
        assert!(err.is_constraint());
        // All-or-nothing: 4 was not inserted.
        assert!(index.lookup(&[Literal::from(4)]).is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn nulls_are_not_indexed() {
        let index = Index::new("u", vec![0], true);
        index.append(&[ints(vec![None, None, Some(1)])], &[0, 1, 2]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.lookup(&[Literal::Null]).is_empty());
    }

    #[test]
    fn delete_removes_single_row() {
        let index = Index::new("idx", vec![0, 1], false);
        let names: ArrayRef = Arc::new(StringArray::from(vec!["a", "a"]));
        let keys = [ints(vec![Some(1), Some(1)]), names];
        index.append(&keys, &[10, 11]).unwrap();
        assert_eq!(index.lookup(&[1.into(), "a".into()]).len(), 2);

        let mut lock = index.lock();
        lock.delete(&[keys[0].slice(0, 1), keys[1].slice(0, 1)], &[10]).unwrap();
        assert!(!lock.contains_row(10));
        assert!(lock.contains_row(11));
    }
}
