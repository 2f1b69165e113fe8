//! Variable-width binning.

use nt_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Sorted bin edges. Bins are left-closed: `[e[i-1], e[i])` is bin `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    /// Build from edges; at least two finite, strictly increasing values.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Histogram(format!(
                "axis needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Histogram("axis edges must be finite".into()));
        }
        if let Some(w) = edges.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::Histogram(format!(
                "axis edges must be strictly increasing ({} >= {})",
                w[0], w[1]
            )));
        }
        Ok(Self { edges })
    }

    /// Number of in-range bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Number of bins including underflow and overflow.
    pub fn n_total(&self) -> usize {
        self.edges.len() + 1
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin of `x`: `0` underflow, `n + 1` overflow. NaN goes to overflow.
    pub fn find_bin(&self, x: f64) -> usize {
        if x.is_nan() {
            return self.n_bins() + 1;
        }
        self.edges.partition_point(|&e| e <= x)
    }
}

impl TryFrom<Vec<f64>> for Axis {
    type Error = Error;

    fn try_from(edges: Vec<f64>) -> Result<Self> {
        Axis::new(edges)
    }
}

impl From<Axis> for Vec<f64> {
    fn from(a: Axis) -> Self {
        a.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_bin_edge_cases() {
        let a = Axis::new(vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(a.n_bins(), 3);
        assert_eq!(a.n_total(), 5);
        assert_eq!(a.find_bin(-0.5), 0);
        assert_eq!(a.find_bin(0.0), 1);
        assert_eq!(a.find_bin(1.0), 2);
        assert_eq!(a.find_bin(2.99), 3);
        assert_eq!(a.find_bin(3.0), 4);
        assert_eq!(a.find_bin(f64::NAN), 4);
    }

    #[test]
    fn rejects_bad_edges() {
        assert!(Axis::new(vec![1.0]).is_err());
        assert!(Axis::new(vec![0.0, 0.0]).is_err());
        assert!(Axis::new(vec![2.0, 1.0]).is_err());
        assert!(Axis::new(vec![0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn serde_as_edge_list() {
        let a = Axis::new(vec![325.0, 400.0, 480.0]).unwrap();
        let s = serde_json::to_string(&a).unwrap();
        assert_eq!(s, "[325.0,400.0,480.0]");
        let back: Axis = serde_json::from_str(&s).unwrap();
        assert_eq!(back, a);
        assert!(serde_json::from_str::<Axis>("[1.0, 0.0]").is_err());
    }
}
