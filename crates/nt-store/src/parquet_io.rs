//! Parquet input and output for [`EventTable`].
//!
//! Loaded Arrow types: `Boolean`, every signed/unsigned integer width (widened
//! to `i64`), `Float16/32/64` (widened to `f64`) and `List`/`LargeList` of
//! numbers (as `List<f64>`). Other columns are skipped. Nulls read as zero,
//! `false` or an empty list.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Float64Builder, Int64Array, ListBuilder,
};
use ::arrow::compute::cast;
use ::arrow::datatypes::{
    DataType, Field as ArrowField, Float64Type, Int64Type, Schema as ArrowSchema,
};
use ::arrow::record_batch::RecordBatch;
use ::parquet::arrow::ArrowWriter;
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;
use nt_core::{Error, Result};

use crate::schema::{Field, FieldType, Schema};
use crate::store::EventStore;
use crate::table::{Column, EventTable};

const BATCH_SIZE: usize = 8192;

fn parquet_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Parquet(format!("{}: {e}", path.display()))
}

fn float_list_type() -> DataType {
    DataType::List(Arc::new(ArrowField::new_list_field(DataType::Float64, true)))
}

fn field_type_of(dt: &DataType) -> Option<FieldType> {
    match dt {
        DataType::Boolean => Some(FieldType::Bool),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Some(FieldType::Int),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => Some(FieldType::Float),
        DataType::List(inner) | DataType::LargeList(inner)
            if inner.data_type().is_numeric() =>
        {
            Some(FieldType::FloatList)
        }
        _ => None,
    }
}

fn append_array(col: &mut Column, arr: &ArrayRef, path: &Path) -> Result<()> {
    match col {
        Column::Bool(out) => {
            let a = arr.as_boolean();
            out.extend((0..a.len()).map(|i| a.is_valid(i) && a.value(i)));
        }
        Column::Int(out) => {
            let c = cast(arr, &DataType::Int64).map_err(|e| parquet_err(path, e))?;
            let a = c.as_primitive::<Int64Type>();
            out.extend((0..a.len()).map(|i| if a.is_valid(i) { a.value(i) } else { 0 }));
        }
        Column::Float(out) => {
            let c = cast(arr, &DataType::Float64).map_err(|e| parquet_err(path, e))?;
            let a = c.as_primitive::<Float64Type>();
            out.extend((0..a.len()).map(|i| if a.is_valid(i) { a.value(i) } else { 0.0 }));
        }
        Column::FloatList { offsets, values } => {
            let c = cast(arr, &float_list_type()).map_err(|e| parquet_err(path, e))?;
            let list = c.as_list::<i32>();
            for i in 0..list.len() {
                if list.is_valid(i) {
                    let item = list.value(i);
                    let xs = item.as_primitive::<Float64Type>();
                    values.extend((0..xs.len()).map(|j| if xs.is_valid(j) { xs.value(j) } else { 0.0 }));
                }
                offsets.push(values.len());
            }
        }
    }
    Ok(())
}

/// Read one Parquet file into a table called `name`.
pub fn read_parquet_table(name: &str, path: &Path) -> Result<EventTable> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| parquet_err(path, e))?
        .with_batch_size(BATCH_SIZE);

    let arrow_schema = builder.schema().clone();
    let mut picked = Vec::new();
    let mut fields = Vec::new();
    for (i, f) in arrow_schema.fields().iter().enumerate() {
        match field_type_of(f.data_type()) {
            Some(ty) => {
                picked.push(i);
                fields.push(Field::new(f.name().clone(), ty));
            }
            None => {
                tracing::debug!(file = %path.display(), column = %f.name(), data_type = ?f.data_type(), "skipping unsupported column");
            }
        }
    }
    let schema = Schema::new(fields)?;
    let mut columns: Vec<Column> = schema.fields().iter().map(|f| Column::new(f.ty)).collect();

    let reader = builder.build().map_err(|e| parquet_err(path, e))?;
    for batch in reader {
        let batch = batch.map_err(|e| parquet_err(path, e))?;
        for (col, &src) in columns.iter_mut().zip(&picked) {
            append_array(col, batch.column(src), path)?;
        }
    }

    let table = EventTable::from_columns(name, schema, columns)?;
    tracing::debug!(stream = name, file = %path.display(), rows = table.n_rows(), "loaded parquet file");
    Ok(table)
}

/// Read several files as one stream (files are concatenated in order and must
/// share their loaded schema).
pub fn read_parquet_chain(name: &str, paths: &[PathBuf]) -> Result<EventTable> {
    let parts = paths.iter().map(|p| read_parquet_table(name, p)).collect::<Result<Vec<_>>>()?;
    let table = EventTable::chain(name, parts)?;
    tracing::info!(stream = name, files = paths.len(), rows = table.n_rows(), "opened stream");
    Ok(table)
}

fn to_record_batch(table: &EventTable) -> std::result::Result<RecordBatch, ::arrow::error::ArrowError> {
    let mut fields = Vec::with_capacity(table.schema().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.schema().len());
    for (f, col) in table.schema().fields().iter().zip(table.columns()) {
        let (dt, arr): (DataType, ArrayRef) = match col {
            Column::Bool(v) => (DataType::Boolean, Arc::new(BooleanArray::from(v.clone()))),
            Column::Int(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            Column::Float(v) => (DataType::Float64, Arc::new(Float64Array::from(v.clone()))),
            Column::FloatList { offsets, values } => {
                let mut b = ListBuilder::new(Float64Builder::new());
                for w in offsets.windows(2) {
                    b.values().append_slice(&values[w[0]..w[1]]);
                    b.append(true);
                }
                (float_list_type(), Arc::new(b.finish()))
            }
        };
        fields.push(ArrowField::new(f.name.clone(), dt, false));
        arrays.push(arr);
    }
    RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), arrays)
}

/// Write `table` to `path`. The file is written to `<path>.tmp` first and
/// renamed into place once complete.
pub fn write_parquet_table(table: &EventTable, path: &Path) -> Result<()> {
    let batch = to_record_batch(table).map_err(|e| parquet_err(path, e))?;
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp)?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(|e| parquet_err(path, e))?;
    writer.write(&batch).map_err(|e| parquet_err(path, e))?;
    writer.close().map_err(|e| parquet_err(path, e))?;
    fs::rename(&tmp, path)?;

    tracing::debug!(file = %path.display(), rows = table.n_rows(), "wrote parquet file");
    Ok(())
}
