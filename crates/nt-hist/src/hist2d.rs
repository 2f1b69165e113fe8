//! Weighted two-dimensional histogram with flow-aware projections.

use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::hist1d::Hist1D;

/// 2D histogram stored row-major over `(nx + 2) × (ny + 2)` bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    /// Histogram name.
    pub name: String,
    /// X binning.
    pub x: Axis,
    /// Y binning.
    pub y: Axis,
    /// Sum of weights, index `ix * (ny + 2) + iy`.
    pub sumw: Vec<f64>,
    /// Sum of squared weights.
    pub sumw2: Vec<f64>,
    /// Number of fills.
    pub entries: u64,
}

impl Hist2D {
    /// Empty histogram.
    pub fn new(name: impl Into<String>, x: Axis, y: Axis) -> Self {
        let n = x.n_total() * y.n_total();
        Self { name: name.into(), x, y, sumw: vec![0.0; n], sumw2: vec![0.0; n], entries: 0 }
    }

    fn idx(&self, bx: usize, by: usize) -> usize {
        bx * self.y.n_total() + by
    }

    /// Add `w` at `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64, w: f64) {
        let i = self.idx(self.x.find_bin(x), self.y.find_bin(y));
        self.sumw[i] += w;
        self.sumw2[i] += w * w;
        self.entries += 1;
    }

    /// Content of bin `(bx, by)`.
    pub fn content(&self, bx: usize, by: usize) -> f64 {
        self.sumw[self.idx(bx, by)]
    }

    /// Project onto X, summing over Y. With `flow` the Y under/overflow bins
    /// are included, otherwise only `1..=ny`.
    pub fn projection_x(&self, name: impl Into<String>, flow: bool) -> Hist1D {
        let ys = Self::range(&self.y, flow);
        let mut out = Hist1D::new(name, self.x.clone());
        for bx in 0..self.x.n_total() {
            for by in ys.clone() {
                let i = self.idx(bx, by);
                out.sumw[bx] += self.sumw[i];
                out.sumw2[bx] += self.sumw2[i];
            }
        }
        out.entries = self.entries;
        out
    }

    /// Project onto Y, summing over X (see [`projection_x`](Self::projection_x)).
    pub fn projection_y(&self, name: impl Into<String>, flow: bool) -> Hist1D {
        let xs = Self::range(&self.x, flow);
        let mut out = Hist1D::new(name, self.y.clone());
        for by in 0..self.y.n_total() {
            for bx in xs.clone() {
                let i = self.idx(bx, by);
                out.sumw[by] += self.sumw[i];
                out.sumw2[by] += self.sumw2[i];
            }
        }
        out.entries = self.entries;
        out
    }

    fn range(axis: &Axis, flow: bool) -> std::ops::RangeInclusive<usize> {
        if flow { 0..=axis.n_bins() + 1 } else { 1..=axis.n_bins() }
    }
}
