//! `(runNumber, eventNumber)` → row index with duplicate detection.

use std::collections::{BTreeSet, HashMap, hash_map::Entry};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nt_core::{Error, EventKey, Result};
use nt_store::{EventStore, KeyFields};

/// Read-only key index over one stream.
///
/// Built once per stream and pass. With duplicate checking, every key seen
/// more than once is absent from the index and listed in
/// [`duplicates`](Self::duplicates). Without it, the last row of a repeated
/// key wins and `duplicates` stays empty.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    stream: String,
    rows: HashMap<EventKey, usize>,
    duplicates: BTreeSet<EventKey>,
}

impl KeyIndex {
    /// Scan every row of `store` once, in row order.
    pub fn build(store: &dyn EventStore, keys: KeyFields, check_duplicate: bool) -> Result<Self> {
        let t0 = Instant::now();
        let mut rows = HashMap::with_capacity(store.n_rows());
        let mut duplicates = BTreeSet::new();
        for rec in store.cursor(None) {
            let key = keys.key(&rec);
            match rows.entry(key) {
                Entry::Vacant(e) => {
                    e.insert(rec.row());
                }
                Entry::Occupied(mut e) => {
                    if check_duplicate {
                        duplicates.insert(key);
                    } else {
                        e.insert(rec.row());
                    }
                }
            }
        }
        for key in &duplicates {
            rows.remove(key);
        }
        let index = Self { stream: store.name().to_string(), rows, duplicates };
        index.check_not_empty(store.n_rows())?;
        tracing::debug!(
            stream = store.name(),
            keys = index.len(),
            duplicates = index.duplicates.len(),
            elapsed = ?t0.elapsed(),
            "built key index"
        );
        Ok(index)
    }

    /// Wrap the store's native index. No duplicate detection is possible.
    pub fn from_native(store: &dyn EventStore, keys: KeyFields) -> Result<Self> {
        let native = store.native_index(keys.run.column, keys.event.column).ok_or_else(|| {
            Error::IndexBuild {
                stream: store.name().to_string(),
                reason: "store has no native index".into(),
            }
        })??;
        let index = Self {
            stream: store.name().to_string(),
            rows: native.into_iter().collect(),
            duplicates: BTreeSet::new(),
        };
        index.check_not_empty(store.n_rows())?;
        tracing::debug!(stream = store.name(), keys = index.len(), "using native key index");
        Ok(index)
    }

    fn check_not_empty(&self, n_rows: usize) -> Result<()> {
        if n_rows > 0 && self.rows.is_empty() {
            return Err(Error::IndexBuild {
                stream: self.stream.clone(),
                reason: format!(
                    "{n_rows} rows but no unique key ({} duplicated)",
                    self.duplicates.len()
                ),
            });
        }
        Ok(())
    }

    /// Indexed stream name.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Row of `key`, if indexed.
    pub fn get(&self, key: &EventKey) -> Option<usize> {
        self.rows.get(key).copied()
    }

    /// `true` if `key` is indexed.
    pub fn contains(&self, key: &EventKey) -> bool {
        self.rows.contains_key(key)
    }

    /// `true` if `key` was seen more than once.
    pub fn is_duplicate(&self, key: &EventKey) -> bool {
        self.duplicates.contains(key)
    }

    /// Keys seen more than once, sorted.
    pub fn duplicates(&self) -> &BTreeSet<EventKey> {
        &self.duplicates
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indexed keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &EventKey> {
        self.rows.keys()
    }

    /// Log the duplicate keys and, with `path`, write them one `run event`
    /// pair per line.
    pub fn report(&self, path: Option<&Path>) -> Result<()> {
        if self.duplicates.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            stream = %self.stream,
            count = self.duplicates.len(),
            "duplicate event keys excluded"
        );
        for key in &self.duplicates {
            tracing::debug!(stream = %self.stream, run = key.run, event = key.event, "duplicate key");
        }
        if let Some(path) = path {
            let mut text = String::new();
            for key in &self.duplicates {
                let _ = writeln!(text, "{key}");
            }
            std::fs::write(path, text)?;
            tracing::info!(file = %path.display(), "wrote duplicate report");
        }
        Ok(())
    }
}

/// `<stem>_<stream><ext>` next to `base`.
pub fn report_path(base: &Path, stream: &str) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{stream}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stream}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nt_store::{EventTable, Field, FieldType, Schema, Value};

    fn stream(keys: &[(i64, i64)]) -> EventTable {
        let schema = Schema::new(vec![
            Field::new("runNumber", FieldType::Int),
            Field::new("eventNumber", FieldType::Int),
        ])
        .unwrap();
        let mut t = EventTable::new("reco", schema);
        for &(r, e) in keys {
            t.push_row(vec![Value::Int(r), Value::Int(e)]).unwrap();
        }
        t
    }

    fn key_fields(t: &EventTable) -> KeyFields {
        KeyFields::resolve(t.schema(), "runNumber", "eventNumber").unwrap()
    }

    #[test]
    fn duplicates_are_removed_entirely() {
        let t = stream(&[(1, 1), (1, 2), (1, 2), (1, 3), (1, 2)]);
        let idx = KeyIndex::build(&t, key_fields(&t), true).unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(&EventKey::new(1, 1)), Some(0));
        assert_eq!(idx.get(&EventKey::new(1, 3)), Some(3));
        assert!(!idx.contains(&EventKey::new(1, 2)));
        assert!(idx.is_duplicate(&EventKey::new(1, 2)));
        assert_eq!(idx.duplicates().len(), 1);
    }

    #[test]
    fn fast_mode_last_row_wins() {
        let t = stream(&[(1, 1), (1, 2), (1, 2)]);
        let idx = KeyIndex::build(&t, key_fields(&t), false).unwrap();
        assert_eq!(idx.get(&EventKey::new(1, 2)), Some(2));
        assert!(idx.duplicates().is_empty());
    }

    #[test]
    fn all_duplicates_is_index_build_error() {
        let t = stream(&[(1, 1), (1, 1)]);
        let err = KeyIndex::build(&t, key_fields(&t), true).unwrap_err();
        assert!(matches!(err, Error::IndexBuild { .. }));
    }

    #[test]
    fn empty_stream_is_an_empty_index() {
        let t = stream(&[]);
        let idx = KeyIndex::build(&t, key_fields(&t), true).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn native_backend_matches_fast_mode() {
        let t = stream(&[(2, 1), (1, 5), (2, 1)]);
        let native = KeyIndex::from_native(&t, key_fields(&t)).unwrap();
        let fast = KeyIndex::build(&t, key_fields(&t), false).unwrap();
        for k in fast.keys() {
            assert_eq!(native.get(k), fast.get(k));
        }
        assert_eq!(native.len(), fast.len());
    }

    #[test]
    fn report_file_and_path() {
        assert_eq!(
            report_path(Path::new("/tmp/out/dups.txt"), "reco"),
            PathBuf::from("/tmp/out/dups_reco.txt")
        );
        assert_eq!(report_path(Path::new("dups"), "parton"), PathBuf::from("dups_parton"));

        let t = stream(&[(3, 9), (1, 2), (3, 9), (1, 2), (4, 4)]);
        let idx = KeyIndex::build(&t, key_fields(&t), true).unwrap();
        let dir = std::env::temp_dir().join(format!("nt_key_index_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dups.txt");
        idx.report(Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 2\n3 9\n");
        std::fs::remove_dir_all(dir).ok();
    }
}
