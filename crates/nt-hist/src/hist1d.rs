//! Weighted one-dimensional histogram.

use nt_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::axis::Axis;

/// 1D histogram. `sumw` and `sumw2` include both flow bins
/// (`len == n_bins + 2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    /// Histogram name.
    pub name: String,
    /// Binning.
    pub axis: Axis,
    /// Sum of weights per bin.
    pub sumw: Vec<f64>,
    /// Sum of squared weights per bin.
    pub sumw2: Vec<f64>,
    /// Number of fills.
    pub entries: u64,
}

impl Hist1D {
    /// Empty histogram.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        let n = axis.n_total();
        Self { name: name.into(), axis, sumw: vec![0.0; n], sumw2: vec![0.0; n], entries: 0 }
    }

    /// Add `w` at `x`.
    pub fn fill(&mut self, x: f64, w: f64) {
        let b = self.axis.find_bin(x);
        self.sumw[b] += w;
        self.sumw2[b] += w * w;
        self.entries += 1;
    }

    /// Content of bin `b` (flow bins included in the numbering).
    pub fn content(&self, b: usize) -> f64 {
        self.sumw[b]
    }

    /// Statistical error of bin `b`.
    pub fn error(&self, b: usize) -> f64 {
        self.sumw2[b].sqrt()
    }

    /// Bin-wise `num / den` over every bin including flow.
    ///
    /// A bin with zero denominator is `0` with error `0`. Otherwise the error
    /// is `sqrt((σn²·d² + σd²·n²) / d⁴)` for uncorrelated inputs.
    pub fn divide(name: impl Into<String>, num: &Hist1D, den: &Hist1D) -> Result<Hist1D> {
        if num.axis != den.axis {
            return Err(Error::Histogram(format!(
                "cannot divide '{}' by '{}': binning differs",
                num.name, den.name
            )));
        }
        let mut out = Hist1D::new(name, num.axis.clone());
        for b in 0..out.sumw.len() {
            let (n, d) = (num.sumw[b], den.sumw[b]);
            if d == 0.0 {
                continue;
            }
            let d2 = d * d;
            out.sumw[b] = n / d;
            out.sumw2[b] = (num.sumw2[b] * d2 + den.sumw2[b] * n * n) / (d2 * d2);
        }
        out.entries = num.entries;
        Ok(out)
    }
}
