//! Hierarchical histogram container (directory → name → histogram).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nt_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::hist1d::Hist1D;
use crate::hist2d::Hist2D;

/// A stored histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Histogram {
    /// One-dimensional
    H1(Hist1D),
    /// Two-dimensional
    H2(Hist2D),
}

impl Histogram {
    /// Histogram name.
    pub fn name(&self) -> &str {
        match self {
            Histogram::H1(h) => &h.name,
            Histogram::H2(h) => &h.name,
        }
    }
}

impl From<Hist1D> for Histogram {
    fn from(h: Hist1D) -> Self {
        Histogram::H1(h)
    }
}

impl From<Hist2D> for Histogram {
    fn from(h: Hist2D) -> Self {
        Histogram::H2(h)
    }
}

/// Ordered directories of named histograms, serialized as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistFile {
    /// Directory name → histogram name → histogram.
    pub dirs: BTreeMap<String, BTreeMap<String, Histogram>>,
}

impl HistFile {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `h` under `dir`, replacing any histogram of the same name.
    pub fn put(&mut self, dir: &str, h: impl Into<Histogram>) {
        let h = h.into();
        self.dirs.entry(dir.to_string()).or_default().insert(h.name().to_string(), h);
    }

    /// Look up a histogram.
    pub fn get(&self, dir: &str, name: &str) -> Option<&Histogram> {
        self.dirs.get(dir)?.get(name)
    }

    /// Look up a 1D histogram.
    pub fn get_1d(&self, dir: &str, name: &str) -> Option<&Hist1D> {
        match self.get(dir, name)? {
            Histogram::H1(h) => Some(h),
            Histogram::H2(_) => None,
        }
    }

    /// Look up a 2D histogram.
    pub fn get_2d(&self, dir: &str, name: &str) -> Option<&Hist2D> {
        match self.get(dir, name)? {
            Histogram::H2(h) => Some(h),
            Histogram::H1(_) => None,
        }
    }

    /// Total number of histograms.
    pub fn len(&self) -> usize {
        self.dirs.values().map(BTreeMap::len).sum()
    }

    /// `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write as pretty JSON via `<path>.tmp` and rename.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(file = %path.display(), histograms = self.len(), "wrote histogram file");
        Ok(())
    }

    /// Read a file written by [`write_json`](Self::write_json).
    pub fn read_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Histogram(format!("{}: not a histogram file: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;

    #[test]
    fn put_get_and_json_round_trip() {
        let ax = Axis::new(vec![0.0, 50.0, 100.0]).unwrap();
        let mut h = Hist1D::new("acc_flow", ax.clone());
        h.fill(10.0, 0.5);
        let mut f = HistFile::new();
        f.put("th_pt", h.clone());
        f.put("th_pt", Hist2D::new("response", ax.clone(), ax));
        assert_eq!(f.len(), 2);
        assert_eq!(f.get_1d("th_pt", "acc_flow"), Some(&h));
        assert!(f.get_1d("th_pt", "response").is_none());
        assert!(f.get_2d("th_pt", "response").is_some());
        assert!(f.get("mtt", "acc_flow").is_none());

        let dir = std::env::temp_dir().join(format!("nt_hist_file_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrections.json");
        f.write_json(&path).unwrap();
        let back = HistFile::read_json(&path).unwrap();
        assert_eq!(back, f);
        std::fs::remove_dir_all(dir).ok();
    }
}
