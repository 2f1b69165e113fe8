//! Output record sinks.
//!
//! A sink declares its schema once, at construction: the input stream's
//! fields, then `isMatched` and `isDummy`, then any extra columns. Rows are
//! complete [`OutputRow`] values, validated in full before they are appended.

use std::path::PathBuf;

use nt_core::{Error, Result};

use crate::parquet_io::write_parquet_table;
use crate::schema::{Field, FieldType, Schema, Value};
use crate::store::EventStore;
use crate::table::EventTable;

/// Name of the matched flag column.
pub const IS_MATCHED: &str = "isMatched";
/// Name of the dummy flag column.
pub const IS_DUMMY: &str = "isDummy";

/// Per-row pairing flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowFlags {
    /// Both sides present and accepted.
    pub is_matched: bool,
    /// Row is filler copied from the last row of its stream.
    pub is_dummy: bool,
}

impl RowFlags {
    /// Flags of a matched pair member.
    pub const MATCHED: RowFlags = RowFlags { is_matched: true, is_dummy: false };
    /// Flags of a real but unmatched row.
    pub const UNMATCHED: RowFlags = RowFlags { is_matched: false, is_dummy: false };
    /// Flags of a dummy filler row.
    pub const DUMMY: RowFlags = RowFlags { is_matched: false, is_dummy: true };
}

/// One immutable output row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    /// Copied input values, in input schema order.
    pub input: Vec<Value>,
    /// Pairing flags.
    pub flags: RowFlags,
    /// Extra column values, in the sink's extra-field order.
    pub extras: Vec<Value>,
}

/// Destination of output rows.
pub trait RecordSink {
    /// Output schema, fixed before the first row.
    fn schema(&self) -> &Schema;

    /// Append a complete row.
    fn append(&mut self, row: OutputRow) -> Result<()>;

    /// Rows appended so far.
    fn rows(&self) -> usize;

    /// Flush and close. Appending afterwards is an error.
    fn finish(&mut self) -> Result<()>;
}

/// Sink buffering rows in an [`EventTable`], optionally written to Parquet on
/// [`finish`](RecordSink::finish).
#[derive(Debug)]
pub struct TableSink {
    table: EventTable,
    n_input: usize,
    path: Option<PathBuf>,
    dummy_pad: Option<f64>,
    finished: bool,
}

impl TableSink {
    /// In-memory sink.
    pub fn new(name: &str, input: &Schema, extras: &[Field]) -> Result<Self> {
        let mut schema = input.clone();
        schema.push(Field::new(IS_MATCHED, FieldType::Bool))?;
        schema.push(Field::new(IS_DUMMY, FieldType::Bool))?;
        for f in extras {
            schema.push(f.clone())?;
        }
        Ok(Self {
            table: EventTable::new(name, schema),
            n_input: input.len(),
            path: None,
            dummy_pad: None,
            finished: false,
        })
    }

    /// Sink writing a Parquet file at `path` when finished.
    pub fn parquet(name: &str, input: &Schema, extras: &[Field], path: PathBuf) -> Result<Self> {
        let mut sink = Self::new(name, input, extras)?;
        sink.path = Some(path);
        Ok(sink)
    }

    /// Overwrite every value of dummy rows (flags excepted) with `pad`.
    pub fn with_dummy_pad(mut self, pad: Option<f64>) -> Self {
        self.dummy_pad = pad;
        self
    }

    /// Output path, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Buffered rows.
    pub fn table(&self) -> &EventTable {
        &self.table
    }

    /// Take the buffered rows.
    pub fn into_table(self) -> EventTable {
        self.table
    }
}

impl RecordSink for TableSink {
    fn schema(&self) -> &Schema {
        self.table.schema()
    }

    fn append(&mut self, row: OutputRow) -> Result<()> {
        if self.finished {
            return Err(Error::Validation(format!(
                "sink '{}' is already finished",
                self.table.name()
            )));
        }
        if row.input.len() != self.n_input {
            return Err(Error::SchemaMismatch(format!(
                "sink '{}': row has {} input values, expected {}",
                self.table.name(),
                row.input.len(),
                self.n_input
            )));
        }
        let pad = self.dummy_pad.filter(|_| row.flags.is_dummy);
        let mut values = Vec::with_capacity(self.table.schema().len());
        let padded = |v: Value| match pad {
            Some(p) => v.padded(p),
            None => v,
        };
        values.extend(row.input.into_iter().map(padded));
        values.push(Value::Bool(row.flags.is_matched));
        values.push(Value::Bool(row.flags.is_dummy));
        values.extend(row.extras.into_iter().map(padded));
        self.table.push_row(values)
    }

    fn rows(&self) -> usize {
        self.table.n_rows()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(path) = &self.path {
            write_parquet_table(&self.table, path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> Schema {
        Schema::new(vec![
            Field::new("runNumber", FieldType::Int),
            Field::new("eventNumber", FieldType::Int),
            Field::new("weight_mc", FieldType::Float),
        ])
        .unwrap()
    }

    fn row(flags: RowFlags) -> OutputRow {
        OutputRow {
            input: vec![Value::Int(1), Value::Int(2), Value::Float(0.25)],
            flags,
            extras: vec![Value::Float(3.0)],
        }
    }

    #[test]
    fn schema_layout() {
        let sink = TableSink::new("reco", &input(), &[Field::new("normalized_weight", FieldType::Float)])
            .unwrap();
        assert_eq!(
            sink.schema().names(),
            vec!["runNumber", "eventNumber", "weight_mc", "isMatched", "isDummy", "normalized_weight"]
        );
    }

    #[test]
    fn dummy_rows_are_padded_but_keep_flags() {
        let mut sink = TableSink::new("truth", &input(), &[Field::new("x", FieldType::Float)])
            .unwrap()
            .with_dummy_pad(Some(-99.0));
        sink.append(row(RowFlags::MATCHED)).unwrap();
        sink.append(row(RowFlags::DUMMY)).unwrap();
        assert_eq!(sink.rows(), 2);
        let t = sink.table();
        assert_eq!(t.f64_at(0, 2), 0.25);
        assert_eq!(t.i64_at(1, 0), -99);
        assert_eq!(t.f64_at(1, 5), -99.0);
        assert!(!t.bool_at(1, 3));
        assert!(t.bool_at(1, 4));
    }

    #[test]
    fn bad_rows_and_append_after_finish() {
        let mut sink = TableSink::new("reco", &input(), &[]).unwrap();
        let mut short = row(RowFlags::UNMATCHED);
        short.input.pop();
        short.extras.clear();
        assert!(matches!(sink.append(short), Err(Error::SchemaMismatch(_))));
        let extra = row(RowFlags::UNMATCHED);
        assert!(sink.append(extra).is_err());
        assert_eq!(sink.rows(), 0);

        sink.finish().unwrap();
        let mut ok = row(RowFlags::UNMATCHED);
        ok.extras.clear();
        assert!(matches!(sink.append(ok), Err(Error::Validation(_))));
    }

    #[test]
    fn flag_column_collision_is_rejected() {
        let mut s = input();
        s.push(Field::new(IS_DUMMY, FieldType::Bool)).unwrap();
        assert!(TableSink::new("reco", &s, &[]).is_err());
    }
}
