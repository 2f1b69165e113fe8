//! In-memory columnar event table.

use nt_core::{Error, EventKey, Result};

use crate::schema::{FieldType, Schema, Value};
use crate::store::{EventStore, NativeIndex};

/// One typed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Booleans
    Bool(Vec<bool>),
    /// Integers
    Int(Vec<i64>),
    /// Floats
    Float(Vec<f64>),
    /// Float lists, stored flat with `offsets.len() == rows + 1`.
    FloatList {
        /// Start offset of every row, plus the final end offset.
        offsets: Vec<usize>,
        /// Concatenated list values.
        values: Vec<f64>,
    },
}

impl Column {
    /// Empty column of the given type.
    pub fn new(ty: FieldType) -> Self {
        match ty {
            FieldType::Bool => Column::Bool(Vec::new()),
            FieldType::Int => Column::Int(Vec::new()),
            FieldType::Float => Column::Float(Vec::new()),
            FieldType::FloatList => Column::FloatList { offsets: vec![0], values: Vec::new() },
        }
    }

    /// Storage type.
    pub fn ty(&self) -> FieldType {
        match self {
            Column::Bool(_) => FieldType::Bool,
            Column::Int(_) => FieldType::Int,
            Column::Float(_) => FieldType::Float,
            Column::FloatList { .. } => FieldType::FloatList,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::FloatList { offsets, .. } => offsets.len() - 1,
        }
    }

    /// `true` if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Caller has checked the type.
    fn push(&mut self, v: Value) {
        match (self, v) {
            (Column::Bool(c), Value::Bool(b)) => c.push(b),
            (Column::Int(c), Value::Int(i)) => c.push(i),
            (Column::Float(c), Value::Float(x)) => c.push(x),
            (Column::FloatList { offsets, values }, Value::FloatList(l)) => {
                values.extend_from_slice(&l);
                offsets.push(values.len());
            }
            _ => unreachable!("value type checked before push"),
        }
    }

    fn extend(&mut self, other: Column) {
        match (self, other) {
            (Column::Bool(a), Column::Bool(b)) => a.extend(b),
            (Column::Int(a), Column::Int(b)) => a.extend(b),
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (
                Column::FloatList { offsets, values },
                Column::FloatList { offsets: o2, values: v2 },
            ) => {
                let base = values.len();
                offsets.extend(o2.iter().skip(1).map(|o| o + base));
                values.extend(v2);
            }
            _ => unreachable!("schemas compared before extend"),
        }
    }

    /// List slice for row `i` (empty for scalar columns).
    pub fn list_at(&self, i: usize) -> &[f64] {
        match self {
            Column::FloatList { offsets, values } => &values[offsets[i]..offsets[i + 1]],
            _ => &[],
        }
    }

    /// Numeric read; lists read as NaN.
    pub fn f64_at(&self, i: usize) -> f64 {
        match self {
            Column::Bool(v) => f64::from(u8::from(v[i])),
            Column::Int(v) => v[i] as f64,
            Column::Float(v) => v[i],
            Column::FloatList { .. } => f64::NAN,
        }
    }

    /// Integer read; lists read as `0`.
    pub fn i64_at(&self, i: usize) -> i64 {
        match self {
            Column::Bool(v) => i64::from(v[i]),
            Column::Int(v) => v[i],
            Column::Float(v) => v[i] as i64,
            Column::FloatList { .. } => 0,
        }
    }

    /// Boolean read.
    pub fn bool_at(&self, i: usize) -> bool {
        match self {
            Column::Bool(v) => v[i],
            Column::Int(v) => v[i] != 0,
            Column::Float(v) => v[i] != 0.0,
            Column::FloatList { .. } => !self.list_at(i).is_empty(),
        }
    }

    /// Owned cell.
    pub fn value_at(&self, i: usize) -> Value {
        match self {
            Column::Bool(v) => Value::Bool(v[i]),
            Column::Int(v) => Value::Int(v[i]),
            Column::Float(v) => Value::Float(v[i]),
            Column::FloatList { .. } => Value::FloatList(self.list_at(i).to_vec()),
        }
    }
}

/// Columnar table implementing [`EventStore`].
#[derive(Debug, Clone)]
pub struct EventTable {
    name: String,
    schema: Schema,
    columns: Vec<Column>,
    n_rows: usize,
}

impl EventTable {
    /// Empty table with the given schema.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let columns = schema.fields().iter().map(|f| Column::new(f.ty)).collect();
        Self { name: name.into(), schema, columns, n_rows: 0 }
    }

    /// Assemble a table from ready-made columns.
    pub fn from_columns(
        name: impl Into<String>,
        schema: Schema,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let name = name.into();
        if columns.len() != schema.len() {
            return Err(Error::SchemaMismatch(format!(
                "table '{name}': {} columns for {} fields",
                columns.len(),
                schema.len()
            )));
        }
        let n_rows = columns.first().map_or(0, Column::len);
        for (f, c) in schema.fields().iter().zip(&columns) {
            if c.ty() != f.ty {
                return Err(Error::SchemaMismatch(format!(
                    "table '{name}': column '{}' is {:?}, field declares {:?}",
                    f.name,
                    c.ty(),
                    f.ty
                )));
            }
            if c.len() != n_rows {
                return Err(Error::SchemaMismatch(format!(
                    "table '{name}': column '{}' has {} rows, expected {n_rows}",
                    f.name,
                    c.len()
                )));
            }
        }
        Ok(Self { name, schema, columns, n_rows })
    }

    /// Append one row. The row is validated completely before any column is
    /// touched, so a rejected row leaves the table unchanged.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(Error::SchemaMismatch(format!(
                "table '{}': row has {} values, schema has {} fields",
                self.name,
                row.len(),
                self.schema.len()
            )));
        }
        for (f, v) in self.schema.fields().iter().zip(&row) {
            if v.field_type() != f.ty {
                return Err(Error::SchemaMismatch(format!(
                    "table '{}': field '{}' expects {:?}, got {:?}",
                    self.name,
                    f.name,
                    f.ty,
                    v.field_type()
                )));
            }
        }
        for (c, v) in self.columns.iter_mut().zip(row) {
            c.push(v);
        }
        self.n_rows += 1;
        Ok(())
    }

    /// Concatenate tables in order. Every part must share the first part's
    /// schema.
    pub fn chain(name: impl Into<String>, parts: Vec<EventTable>) -> Result<Self> {
        let name = name.into();
        let mut iter = parts.into_iter();
        let Some(mut out) = iter.next() else {
            return Err(Error::Validation(format!("stream '{name}' has no input tables")));
        };
        out.name = name;
        for part in iter {
            if part.schema != out.schema {
                return Err(Error::SchemaMismatch(format!(
                    "stream '{}': input '{}' has fields {:?}, expected {:?}",
                    out.name,
                    part.name,
                    part.schema.names(),
                    out.schema.names()
                )));
            }
            out.n_rows += part.n_rows;
            for (c, pc) in out.columns.iter_mut().zip(part.columns) {
                c.extend(pc);
            }
        }
        Ok(out)
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    /// All columns in schema order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rename the table.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl EventStore for EventTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn f64_at(&self, row: usize, column: usize) -> f64 {
        self.columns[column].f64_at(row)
    }

    fn i64_at(&self, row: usize, column: usize) -> i64 {
        self.columns[column].i64_at(row)
    }

    fn bool_at(&self, row: usize, column: usize) -> bool {
        self.columns[column].bool_at(row)
    }

    fn value_at(&self, row: usize, column: usize) -> Value {
        self.columns[column].value_at(row)
    }

    fn native_index(&self, major: usize, minor: usize) -> Option<Result<NativeIndex>> {
        let (Column::Int(a), Column::Int(b)) = (&self.columns[major], &self.columns[minor]) else {
            return Some(Err(Error::IndexBuild {
                stream: self.name.clone(),
                reason: "native index needs two integer columns".into(),
            }));
        };
        let pairs = a.iter().zip(b).enumerate().map(|(row, (&r, &e))| (EventKey::new(r, e), row));
        Some(Ok(NativeIndex::from_pairs(pairs)))
    }
}
