//! # nt-hist
//!
//! Histogram store collaborator for ntupler: variable-width [`Axis`],
//! weighted [`Hist1D`] / [`Hist2D`] with sum-of-squared-weights tracking,
//! flow-aware projections, bin-wise division and the [`HistFile`] container.
//!
//! Bin numbering follows the usual convention: `0` is underflow, `1..=n` are
//! in range and `n + 1` is overflow.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod file;
pub mod hist1d;
pub mod hist2d;

pub use axis::Axis;
pub use file::{HistFile, Histogram};
pub use hist1d::Hist1D;
pub use hist2d::Hist2D;
