//! Acceptance and efficiency corrections from reco/truth matching.
//!
//! Per observable and channel group (`ejets`, `mjets`, inclusive `ljets`) the
//! accumulator fills:
//!
//! - `reco`: every selected reco event, reco weight;
//! - `truth`: every accepted truth event, truth weight;
//! - `response`: matched events, x = reco, y = truth, reco weight;
//! - `response_mcweight`: the same with the truth weight.
//!
//! Reco-side histograms (`reco`, `response`) are split by the reco channel,
//! truth-side ones (`truth`, `response_mcweight`) by the truth row's own
//! channel. A truth row without a unique channel fills only `ljets`.
//!
//! Finalizing derives
//!
//! ```text
//! acceptance       = response.projection_x / reco
//! efficiency       = response_mcweight.projection_y / truth
//! efficiency_wreco = response.projection_y / truth
//! ```
//!
//! each with (`flow`) and without (`_noflow`) the projected-out axis's flow
//! bins. The `efficiency_wreco` numerator is the reco-weighted response
//! split by truth channel.

use std::path::Path;

use nt_core::{ChannelLabel, Error, Result, StreamLevel};
use nt_hist::{Axis, Hist1D, Hist2D, HistFile};
use nt_store::{BoundExpr, CompiledExpr, Record, Schema};

use crate::config::ObservableConfig;

/// Inclusive channel group name.
pub const INCLUSIVE: &str = "ljets";

const GROUPS: [&str; 3] = ["ejets", "mjets", INCLUSIVE];

#[derive(Debug, Clone)]
struct BoundObservable {
    name: String,
    reco: BoundExpr,
    truth: BoundExpr,
    axis: Axis,
}

/// Observables bound to a reco and a truth schema.
#[derive(Debug, Clone, Default)]
pub struct ObservableSet {
    observables: Vec<BoundObservable>,
}

impl ObservableSet {
    /// Compile and bind `configs`.
    ///
    /// With `lenient` (the built-in observable set), observables referring to
    /// fields absent from either stream are dropped with a warning. Otherwise
    /// they are a `SchemaMismatch`.
    pub fn bind(
        configs: &[ObservableConfig],
        reco: &Schema,
        truth: &Schema,
        lenient: bool,
    ) -> Result<Self> {
        let mut observables = Vec::with_capacity(configs.len());
        for cfg in configs {
            let axis = Axis::new(cfg.bins.clone())?;
            let r = CompiledExpr::compile(&cfg.reco)?;
            let t = CompiledExpr::compile(&cfg.truth)?;
            match (r.bind(reco), t.bind(truth)) {
                (Ok(reco), Ok(truth)) => {
                    observables.push(BoundObservable { name: cfg.name.clone(), reco, truth, axis })
                }
                (Err(e), _) | (_, Err(e)) => {
                    if !lenient {
                        return Err(Error::SchemaMismatch(format!("observable '{}': {e}", cfg.name)));
                    }
                    tracing::warn!(observable = %cfg.name, error = %e, "observable dropped");
                }
            }
        }
        Ok(Self { observables })
    }

    /// Observable names, in fill order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.observables.iter().map(|o| o.name.as_str())
    }

    /// Number of observables.
    pub fn len(&self) -> usize {
        self.observables.len()
    }

    /// `true` if there is nothing to fill.
    pub fn is_empty(&self) -> bool {
        self.observables.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ObsHists {
    reco: Hist1D,
    truth: Hist1D,
    response: Hist2D,
    response_mcweight: Hist2D,
    // reco weight, truth channel
    response_wreco: Hist2D,
}

impl ObsHists {
    fn new(axis: &Axis) -> Self {
        Self {
            reco: Hist1D::new("reco", axis.clone()),
            truth: Hist1D::new("truth", axis.clone()),
            response: Hist2D::new("response", axis.clone(), axis.clone()),
            response_mcweight: Hist2D::new("response_mcweight", axis.clone(), axis.clone()),
            response_wreco: Hist2D::new("response_wreco", axis.clone(), axis.clone()),
        }
    }
}

/// Accumulator lifecycle before finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccState {
    /// No entry yet.
    Created,
    /// At least one fill.
    Filling,
}

/// Numerator/denominator histograms for every observable and channel group.
///
/// Finalizing consumes the accumulator, so no fill can follow it.
#[derive(Debug, Clone)]
pub struct CorrectionAccumulator {
    set: ObservableSet,
    // hists[group][observable]
    hists: [Vec<ObsHists>; 3],
    state: AccState,
}

impl CorrectionAccumulator {
    /// Empty accumulator over `set`.
    pub fn new(set: ObservableSet) -> Self {
        let make = || set.observables.iter().map(|o| ObsHists::new(&o.axis)).collect::<Vec<_>>();
        let hists = [make(), make(), make()];
        Self { set, hists, state: AccState::Created }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AccState {
        self.state
    }

    fn groups(channel: ChannelLabel) -> &'static [usize] {
        match channel {
            ChannelLabel::EJets => &[0, 2],
            ChannelLabel::MuJets => &[1, 2],
            ChannelLabel::None => &[2],
        }
    }

    /// Fill the reco or truth marginal of `channel` and the inclusive group.
    /// [`ChannelLabel::None`] fills the inclusive group only.
    pub fn fill_denominator(
        &mut self,
        level: StreamLevel,
        channel: ChannelLabel,
        rec: &Record<'_>,
        weight: f64,
    ) {
        let groups = Self::groups(channel);
        self.state = AccState::Filling;
        for (i, ob) in self.set.observables.iter().enumerate() {
            let x = match level {
                StreamLevel::Reco => ob.reco.eval(rec),
                StreamLevel::Truth(_) => ob.truth.eval(rec),
            };
            for &g in groups {
                let h = &mut self.hists[g][i];
                match level {
                    StreamLevel::Reco => h.reco.fill(x, weight),
                    StreamLevel::Truth(_) => h.truth.fill(x, weight),
                }
            }
        }
    }

    /// Fill the response matrices with a matched pair: `response` in the
    /// groups of `reco_channel`, the truth-split matrices in those of
    /// `truth_channel`.
    pub fn fill_numerator(
        &mut self,
        [reco_channel, truth_channel]: [ChannelLabel; 2],
        reco: &Record<'_>,
        truth: &Record<'_>,
        w_reco: f64,
        w_truth: f64,
    ) {
        self.state = AccState::Filling;
        for (i, ob) in self.set.observables.iter().enumerate() {
            let (x, y) = (ob.reco.eval(reco), ob.truth.eval(truth));
            for &g in Self::groups(reco_channel) {
                self.hists[g][i].response.fill(x, y, w_reco);
            }
            for &g in Self::groups(truth_channel) {
                let h = &mut self.hists[g][i];
                h.response_mcweight.fill(x, y, w_truth);
                h.response_wreco.fill(x, y, w_reco);
            }
        }
    }

    /// Derive the correction factors.
    pub fn finalize(self) -> Result<Corrections> {
        let mut file = HistFile::new();
        for (g, group) in GROUPS.iter().enumerate() {
            for (ob, h) in self.set.observables.iter().zip(&self.hists[g]) {
                let dir = format!("{group}/{}", ob.name);
                for (suffix, flow) in [("", true), ("_noflow", false)] {
                    let acc = Hist1D::divide(
                        format!("acceptance{suffix}"),
                        &h.response.projection_x("px", flow),
                        &h.reco,
                    )?;
                    let eff = Hist1D::divide(
                        format!("efficiency{suffix}"),
                        &h.response_mcweight.projection_y("py", flow),
                        &h.truth,
                    )?;
                    let eff_wreco = Hist1D::divide(
                        format!("efficiency_wreco{suffix}"),
                        &h.response_wreco.projection_y("py", flow),
                        &h.truth,
                    )?;
                    file.put(&dir, acc);
                    file.put(&dir, eff);
                    file.put(&dir, eff_wreco);
                }
                file.put(&dir, h.reco.clone());
                file.put(&dir, h.truth.clone());
                file.put(&dir, h.response.clone());
                file.put(&dir, h.response_mcweight.clone());
            }
        }
        tracing::debug!(histograms = file.len(), "finalized corrections");
        Ok(Corrections { file })
    }
}

/// Finalized, immutable correction histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrections {
    file: HistFile,
}

impl Corrections {
    /// 1D histogram `name` of `observable` in channel group `group`.
    pub fn get(&self, group: &str, observable: &str, name: &str) -> Option<&Hist1D> {
        self.file.get_1d(&format!("{group}/{observable}"), name)
    }

    /// 2D histogram `name` of `observable` in channel group `group`.
    pub fn get_2d(&self, group: &str, observable: &str, name: &str) -> Option<&Hist2D> {
        self.file.get_2d(&format!("{group}/{observable}"), name)
    }

    /// Underlying container.
    pub fn hist_file(&self) -> &HistFile {
        &self.file
    }

    /// Write the histograms as JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        self.file.write_json(path)
    }
}
