//! # nt-store
//!
//! Event store collaborator for ntupler.
//!
//! Provides the [`EventStore`] trait consumed by the matching engine, an
//! in-memory columnar [`EventTable`] implementation, field handles resolved
//! once per stream ([`FieldTable`]), a small expression engine for selections
//! and observables ([`CompiledExpr`]), Parquet input/output, and record sinks.
//!
//! ## Example
//!
//! ```no_run
//! use nt_store::{EventStore, FieldTable, RowPos, read_parquet_chain};
//!
//! let reco = read_parquet_chain("reco", &["reco_0.parquet".into()]).unwrap();
//! let fields = FieldTable::resolve(reco.schema(), &["runNumber", "eventNumber"]).unwrap();
//! let store: &dyn EventStore = &reco;
//! let last = store.get_entry(RowPos::Last).unwrap();
//! println!("last run = {}", last.i64(fields.handle(0)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod expr;
pub mod field;
pub mod parquet_io;
pub mod schema;
pub mod sink;
pub mod store;
pub mod table;

pub use expr::{BoundExpr, CompiledExpr};
pub use field::{FieldHandle, FieldTable, KeyFields};
pub use parquet_io::{read_parquet_chain, read_parquet_table, write_parquet_table};
pub use schema::{Field, FieldType, Schema, Value};
pub use sink::{IS_DUMMY, IS_MATCHED, OutputRow, RecordSink, RowFlags, TableSink};
pub use store::{Cursor, EventStore, NativeIndex, Record, RowPos};
pub use table::{Column, EventTable};
