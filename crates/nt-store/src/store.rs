//! The event store abstraction consumed by the matching engine.

use std::collections::BTreeMap;

use nt_core::{Error, EventKey, Result};

use crate::field::FieldHandle;
use crate::schema::{Schema, Value};

/// Row position for [`EventStore::get_entry`](trait.EventStore.html#method.get_entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPos {
    /// Absolute row number.
    At(usize),
    /// The last row of the store (position `-1`).
    Last,
}

/// A row-oriented, read-only record stream.
///
/// Reads are positional. `row` must be below [`n_rows`](EventStore::n_rows)
/// and `column` must come from a [`FieldHandle`] resolved against this store's
/// schema; both are checked once at handle/cursor creation, not per call.
pub trait EventStore: Send + Sync {
    /// Stream name used in logs and errors.
    fn name(&self) -> &str;

    /// Number of rows.
    fn n_rows(&self) -> usize;

    /// Column layout.
    fn schema(&self) -> &Schema;

    /// Numeric read. Integers and booleans are widened.
    fn f64_at(&self, row: usize, column: usize) -> f64;

    /// Integer read. Floats are truncated, booleans map to `0`/`1`.
    fn i64_at(&self, row: usize, column: usize) -> i64;

    /// Boolean read. Numbers are `true` when non-zero.
    fn bool_at(&self, row: usize, column: usize) -> bool;

    /// Owned copy of one cell, for copy-through into sinks.
    fn value_at(&self, row: usize, column: usize) -> Value;

    /// Store-provided two-field index. `None` when the store has no such
    /// facility. Native indexes keep the last row on duplicate keys.
    fn native_index(&self, _major: usize, _minor: usize) -> Option<Result<NativeIndex>> {
        None
    }
}

impl dyn EventStore + '_ {
    /// Position on a row and return a view of it.
    pub fn get_entry(&self, pos: RowPos) -> Result<Record<'_>> {
        let n = self.n_rows();
        let row = match pos {
            RowPos::At(i) if i < n => i,
            RowPos::At(i) => {
                return Err(Error::Validation(format!(
                    "row {i} out of range for stream '{}' ({n} rows)",
                    self.name()
                )));
            }
            RowPos::Last => n.checked_sub(1).ok_or_else(|| {
                Error::Validation(format!("stream '{}' is empty, no last row", self.name()))
            })?,
        };
        Ok(Record { store: self, row })
    }

    /// Forward cursor over the first `max_rows` rows (all rows when `None`).
    pub fn cursor(&self, max_rows: Option<usize>) -> Cursor<'_> {
        let n = self.n_rows();
        let end = max_rows.map_or(n, |m| m.min(n));
        Cursor { store: self, next: 0, end }
    }
}

/// View of one positioned row.
#[derive(Clone, Copy)]
pub struct Record<'s> {
    store: &'s dyn EventStore,
    row: usize,
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record").field("store", &self.store.name()).field("row", &self.row).finish()
    }
}

impl<'s> Record<'s> {
    /// Row position in the store.
    pub fn row(&self) -> usize {
        self.row
    }

    /// The store this record belongs to.
    pub fn store(&self) -> &'s dyn EventStore {
        self.store
    }

    /// Numeric field value.
    pub fn f64(&self, h: FieldHandle) -> f64 {
        self.store.f64_at(self.row, h.column)
    }

    /// Integer field value.
    pub fn i64(&self, h: FieldHandle) -> i64 {
        self.store.i64_at(self.row, h.column)
    }

    /// Boolean field value.
    pub fn bool(&self, h: FieldHandle) -> bool {
        self.store.bool_at(self.row, h.column)
    }

    /// Owned cell value.
    pub fn value(&self, h: FieldHandle) -> Value {
        self.store.value_at(self.row, h.column)
    }

    /// All cells of the row, in schema order.
    pub fn values(&self) -> Vec<Value> {
        (0..self.store.schema().len()).map(|c| self.store.value_at(self.row, c)).collect()
    }
}

/// Monotonic forward cursor. The only backward access is
/// `get_entry(RowPos::Last)`.
pub struct Cursor<'s> {
    store: &'s dyn EventStore,
    next: usize,
    end: usize,
}

impl Cursor<'_> {
    /// Number of rows this cursor will visit in total.
    pub fn len(&self) -> usize {
        self.end
    }

    /// `true` if the cursor covers no rows.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

impl<'s> Iterator for Cursor<'s> {
    type Item = Record<'s>;

    fn next(&mut self) -> Option<Record<'s>> {
        if self.next >= self.end {
            return None;
        }
        let rec = Record { store: self.store, row: self.next };
        self.next += 1;
        Some(rec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.end - self.next;
        (rem, Some(rem))
    }
}

/// Sorted key → row map produced by a store's own index facility.
#[derive(Debug, Clone, Default)]
pub struct NativeIndex {
    map: BTreeMap<EventKey, usize>,
}

impl NativeIndex {
    /// Build from `(key, row)` pairs in row order; later rows win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (EventKey, usize)>) -> Self {
        let mut map = BTreeMap::new();
        for (k, r) in pairs {
            map.insert(k, r);
        }
        Self { map }
    }

    /// Row for `key`.
    pub fn get(&self, key: &EventKey) -> Option<usize> {
        self.map.get(key).copied()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if no key was indexed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl IntoIterator for NativeIndex {
    type Item = (EventKey, usize);
    type IntoIter = std::collections::btree_map::IntoIter<EventKey, usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}
