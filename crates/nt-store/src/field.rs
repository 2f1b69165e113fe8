//! Field handles resolved once per stream.

use nt_core::{Error, EventKey, Result};

use crate::schema::{FieldType, Schema};
use crate::store::Record;

/// Pre-resolved column reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHandle {
    /// Column position in the schema.
    pub column: usize,
    /// Storage type of the column.
    pub ty: FieldType,
}

impl FieldHandle {
    /// Resolve any field, including list fields.
    pub fn lookup(schema: &Schema, name: &str) -> Result<Self> {
        let column = schema
            .index_of(name)
            .ok_or_else(|| Error::SchemaMismatch(format!("missing field '{name}'")))?;
        Ok(Self { column, ty: schema.field(column).ty })
    }

    /// Resolve a field read as a single number.
    pub fn scalar(schema: &Schema, name: &str) -> Result<Self> {
        let h = Self::lookup(schema, name)?;
        if !h.ty.is_scalar() {
            return Err(Error::SchemaMismatch(format!(
                "field '{name}' is a list, a scalar is required"
            )));
        }
        Ok(h)
    }

    /// Resolve a scalar field if present.
    pub fn optional(schema: &Schema, name: &str) -> Option<Self> {
        Self::scalar(schema, name).ok()
    }
}

/// A set of scalar handles resolved together, in request order.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    handles: Vec<FieldHandle>,
}

impl FieldTable {
    /// Resolve `names`; the first missing or non-scalar name fails the whole
    /// table.
    pub fn resolve(schema: &Schema, names: &[&str]) -> Result<Self> {
        let handles = names.iter().map(|n| FieldHandle::scalar(schema, n)).collect::<Result<_>>()?;
        Ok(Self { handles })
    }

    /// Handle at position `i` of the request.
    pub fn handle(&self, i: usize) -> FieldHandle {
        self.handles[i]
    }
}

/// The two integer fields forming an [`EventKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFields {
    /// Major key (`runNumber`).
    pub run: FieldHandle,
    /// Minor key (`eventNumber`).
    pub event: FieldHandle,
}

impl KeyFields {
    /// Resolve both key fields; they must be integer-typed.
    pub fn resolve(schema: &Schema, run: &str, event: &str) -> Result<Self> {
        let run_h = FieldHandle::lookup(schema, run)?;
        let event_h = FieldHandle::lookup(schema, event)?;
        for (name, h) in [(run, run_h), (event, event_h)] {
            if h.ty != FieldType::Int {
                return Err(Error::SchemaMismatch(format!(
                    "key field '{name}' must be an integer, found {:?}",
                    h.ty
                )));
            }
        }
        Ok(Self { run: run_h, event: event_h })
    }

    /// Key of the positioned record.
    pub fn key(&self, rec: &Record<'_>) -> EventKey {
        EventKey::new(rec.i64(self.run), rec.i64(self.event))
    }
}
