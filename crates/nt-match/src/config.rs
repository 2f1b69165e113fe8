//! Matching configuration (YAML or JSON).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nt_core::{Error, RecoAlgo, Result, TruthLevel};
use serde::{Deserialize, Serialize};

use crate::extras::TopPrefixes;
use crate::sum_weights::Campaign;

/// Which key index implementation to use for joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// [`KeyIndex`](crate::KeyIndex) built by scanning the stream; honours
    /// `check_duplicate`.
    #[default]
    Custom,
    /// The store's own two-field index. Duplicate-unsafe: the last row wins.
    Native,
}

/// One binned observable, filled at reco and truth level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableConfig {
    /// Directory name in the correction file.
    pub name: String,
    /// Reco-level expression.
    pub reco: String,
    /// Truth-level expression.
    pub truth: String,
    /// Bin edges shared by both axes.
    pub bins: Vec<f64>,
}

impl ObservableConfig {
    fn new(name: &str, reco: String, truth: String, bins: &[f64]) -> Self {
        Self { name: name.to_string(), reco, truth, bins: bins.to_vec() }
    }
}

const PT_BINS: [f64; 9] = [0.0, 50.0, 100.0, 160.0, 225.0, 300.0, 360.0, 475.0, 1000.0];
const Y_BINS: [f64; 11] = [-2.5, -1.7, -1.2, -0.8, -0.4, 0.0, 0.4, 0.8, 1.2, 1.7, 2.5];
const Y_ABS_BINS: [f64; 6] = [0.0, 0.4, 0.8, 1.2, 1.7, 2.5];
const MTT_BINS: [f64; 10] =
    [325.0, 400.0, 480.0, 580.0, 700.0, 860.0, 1020.0, 1250.0, 1500.0, 2000.0];
const PTT_BINS: [f64; 10] = [0.0, 40.0, 90.0, 150.0, 230.0, 310.0, 390.0, 470.0, 550.0, 800.0];
const YTT_BINS: [f64; 15] = [
    -2.5, -1.8, -1.4, -1.1, -0.8, -0.5, -0.25, 0.0, 0.25, 0.5, 0.8, 1.1, 1.4, 1.8, 2.5,
];
const YTT_ABS_BINS: [f64; 8] = [0.0, 0.25, 0.5, 0.8, 1.1, 1.4, 1.8, 2.5];

/// The standard ttbar differential observables for `algo` against `level`.
///
/// Parton-level transverse momenta and masses are stored in MeV and are
/// converted to GeV.
pub fn standard_observables(algo: RecoAlgo, level: TruthLevel) -> Vec<ObservableConfig> {
    let r = TopPrefixes::reco(algo);
    let t = TopPrefixes::truth(level);
    let gev = |expr: String| match level {
        TruthLevel::Parton => format!("{expr} / 1000"),
        TruthLevel::Particle => expr,
    };
    let abs = |expr: String| format!("abs({expr})");
    vec![
        ObservableConfig::new("th_pt", format!("{}_pt", r.thad), gev(format!("{}_pt", t.thad)), &PT_BINS),
        ObservableConfig::new("th_y", format!("{}_y", r.thad), format!("{}_y", t.thad), &Y_BINS),
        ObservableConfig::new(
            "th_y_abs",
            abs(format!("{}_y", r.thad)),
            abs(format!("{}_y", t.thad)),
            &Y_ABS_BINS,
        ),
        ObservableConfig::new("tl_pt", format!("{}_pt", r.tlep), gev(format!("{}_pt", t.tlep)), &PT_BINS),
        ObservableConfig::new("tl_y", format!("{}_y", r.tlep), format!("{}_y", t.tlep), &Y_BINS),
        ObservableConfig::new(
            "tl_y_abs",
            abs(format!("{}_y", r.tlep)),
            abs(format!("{}_y", t.tlep)),
            &Y_ABS_BINS,
        ),
        ObservableConfig::new("mtt", format!("{}_m", r.ttbar), gev(format!("{}_m", t.ttbar)), &MTT_BINS),
        ObservableConfig::new("ptt", format!("{}_pt", r.ttbar), gev(format!("{}_pt", t.ttbar)), &PTT_BINS),
        ObservableConfig::new("ytt", format!("{}_y", r.ttbar), format!("{}_y", t.ttbar), &YTT_BINS),
        ObservableConfig::new(
            "ytt_abs",
            abs(format!("{}_y", r.ttbar)),
            abs(format!("{}_y", t.ttbar)),
            &YTT_ABS_BINS,
        ),
    ]
}

fn default_run_field() -> String {
    "runNumber".into()
}

fn default_event_field() -> String {
    "eventNumber".into()
}

fn default_truth_levels() -> Vec<TruthLevel> {
    vec![TruthLevel::Parton, TruthLevel::Particle]
}

fn default_true() -> bool {
    true
}

fn default_klfitter_min_log_likelihood() -> Option<f64> {
    Some(-52.0)
}

fn default_reco_weight() -> String {
    "totalWeight_nominal".into()
}

fn default_truth_weight() -> String {
    "weight_mc".into()
}

fn default_upstream_truth_flag() -> Option<String> {
    Some("isTruthSemileptonic".into())
}

/// Matching and correction settings.
///
/// Every field has a default reproducing the standard l+jets analysis, so an
/// empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    /// Major key field.
    #[serde(default = "default_run_field")]
    pub run_field: String,
    /// Minor key field.
    #[serde(default = "default_event_field")]
    pub event_field: String,
    /// ttbar reconstruction used at reco level. When unset, KLFitter is used
    /// against parton level and PseudoTop against particle level.
    #[serde(default)]
    pub reco_algo: Option<RecoAlgo>,
    /// Truth levels to match against, one pass each.
    #[serde(default = "default_truth_levels")]
    pub truth_levels: Vec<TruthLevel>,
    /// Detect duplicate keys and drop every copy.
    ///
    /// When `false` the index keeps the last row of a repeated key without
    /// warning. This is much cheaper on large inputs but silently pairs the
    /// wrong rows if the input does contain duplicates.
    #[serde(default)]
    pub check_duplicate: bool,
    /// Write selected reco rows without an accepted truth counterpart.
    #[serde(default = "default_true")]
    pub save_unmatched_reco: bool,
    /// Write accepted truth rows never reached by the forward pass.
    #[serde(default = "default_true")]
    pub save_unmatched_truth: bool,
    /// Keep reco and truth outputs row-aligned by padding with dummy rows.
    #[serde(default = "default_true")]
    pub paired_output: bool,
    /// Scan at most this many rows of each stream.
    #[serde(default)]
    pub max_rows: Option<usize>,
    /// Key index implementation.
    #[serde(default)]
    pub index_backend: IndexBackend,
    /// Fill and finalize acceptance/efficiency histograms.
    #[serde(default = "default_true")]
    pub compute_corrections: bool,
    /// KLFitter events with a lower log-likelihood fail the reco selection.
    #[serde(default = "default_klfitter_min_log_likelihood")]
    pub klfitter_min_log_likelihood: Option<f64>,
    /// Additional reco selection expression.
    #[serde(default)]
    pub reco_cut: Option<String>,
    /// Reco event weight field.
    #[serde(default = "default_reco_weight")]
    pub reco_weight: String,
    /// Truth event weight field.
    #[serde(default = "default_truth_weight")]
    pub truth_weight: String,
    /// Observables; empty means [`standard_observables`].
    #[serde(default)]
    pub observables: Vec<ObservableConfig>,
    /// Overwrite the values of dummy rows with this number.
    #[serde(default)]
    pub dummy_pad: Option<f64>,
    /// Write duplicate keys here, one file per stream.
    #[serde(default)]
    pub duplicate_report: Option<PathBuf>,
    /// Truth-level flag on the reco stream compared against the recomputed
    /// parton acceptance.
    #[serde(default = "default_upstream_truth_flag")]
    pub upstream_truth_flag: Option<String>,
    /// Sum of MC weights per DSID and campaign, used when no `sumWeights`
    /// input is given.
    #[serde(default)]
    pub sum_weights: Option<BTreeMap<i64, BTreeMap<Campaign, f64>>>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            run_field: default_run_field(),
            event_field: default_event_field(),
            reco_algo: None,
            truth_levels: default_truth_levels(),
            check_duplicate: false,
            save_unmatched_reco: true,
            save_unmatched_truth: true,
            paired_output: true,
            max_rows: None,
            index_backend: IndexBackend::Custom,
            compute_corrections: true,
            klfitter_min_log_likelihood: default_klfitter_min_log_likelihood(),
            reco_cut: None,
            reco_weight: default_reco_weight(),
            truth_weight: default_truth_weight(),
            observables: Vec::new(),
            dummy_pad: None,
            duplicate_report: None,
            upstream_truth_flag: default_upstream_truth_flag(),
            sum_weights: None,
        }
    }
}

impl MatchConfig {
    /// Read a YAML (or JSON) file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        // YAML is a superset of JSON.
        let cfg: MatchConfig = serde_yaml_ng::from_slice(&bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic checks not expressible in serde.
    pub fn validate(&self) -> Result<()> {
        if self.run_field.trim().is_empty() || self.event_field.trim().is_empty() {
            return Err(Error::Validation("key field names must not be empty".into()));
        }
        if self.run_field == self.event_field {
            return Err(Error::Validation(format!(
                "run and event key fields are both '{}'",
                self.run_field
            )));
        }
        if self.max_rows == Some(0) {
            return Err(Error::Validation("max_rows must be positive".into()));
        }
        if self.truth_levels.is_empty() {
            return Err(Error::Validation("truth_levels must not be empty".into()));
        }
        for (i, lvl) in self.truth_levels.iter().enumerate() {
            if self.truth_levels[..i].contains(lvl) {
                return Err(Error::Validation(format!("truth level '{lvl}' listed twice")));
            }
        }
        for (i, ob) in self.observables.iter().enumerate() {
            if ob.name.is_empty() {
                return Err(Error::Validation(format!("observable #{i} has no name")));
            }
            if self.observables[..i].iter().any(|o| o.name == ob.name) {
                return Err(Error::Validation(format!("observable '{}' defined twice", ob.name)));
            }
            nt_hist::Axis::new(ob.bins.clone()).map_err(|e| {
                Error::Validation(format!("observable '{}': {e}", ob.name))
            })?;
        }
        Ok(())
    }

    /// Reco algorithm used against `level`.
    pub fn reco_algo_for(&self, level: TruthLevel) -> RecoAlgo {
        self.reco_algo.unwrap_or(match level {
            TruthLevel::Parton => RecoAlgo::KLFitter,
            TruthLevel::Particle => RecoAlgo::PseudoTop,
        })
    }

    /// Configured observables, and whether they are the standard set.
    pub fn observables_for(&self, level: TruthLevel) -> (Vec<ObservableConfig>, bool) {
        if self.observables.is_empty() {
            (standard_observables(self.reco_algo_for(level), level), true)
        } else {
            (self.observables.clone(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: MatchConfig = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(cfg, MatchConfig::default());
        assert!(!cfg.check_duplicate);
        assert!(cfg.paired_output);
        assert_eq!(cfg.klfitter_min_log_likelihood, Some(-52.0));
        cfg.validate().unwrap();
    }

    #[test]
    fn yaml_overrides() {
        let yaml = r#"
check_duplicate: true
reco_algo: pseudotop
truth_levels: [particle]
max_rows: 1000
index_backend: native
sum_weights:
  410470:
    mc16a: 1.5e9
    mc16e: 2.0e9
observables:
  - name: mtt
    reco: PseudoTop_Reco_ttbar_m
    truth: PseudoTop_Particle_ttbar_m
    bins: [300, 500, 1000]
"#;
        let cfg: MatchConfig = serde_yaml_ng::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert!(cfg.check_duplicate);
        assert_eq!(cfg.reco_algo_for(TruthLevel::Parton), RecoAlgo::PseudoTop);
        assert_eq!(cfg.index_backend, IndexBackend::Native);
        assert_eq!(cfg.sum_weights.as_ref().unwrap()[&410470][&Campaign::Mc16e], 2.0e9);
        let (obs, standard) = cfg.observables_for(TruthLevel::Particle);
        assert!(!standard);
        assert_eq!(obs[0].bins, vec![300.0, 500.0, 1000.0]);
    }

    #[test]
    fn json_is_accepted() {
        let cfg: MatchConfig =
            serde_yaml_ng::from_str(r#"{"save_unmatched_truth": false, "dummy_pad": -99}"#).unwrap();
        assert!(!cfg.save_unmatched_truth);
        assert_eq!(cfg.dummy_pad, Some(-99.0));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml_ng::from_str::<MatchConfig>("checkDuplicate: true").is_err());
    }

    #[test]
    fn validation_failures() {
        let bad = [
            MatchConfig { run_field: " ".into(), ..Default::default() },
            MatchConfig { event_field: "runNumber".into(), ..Default::default() },
            MatchConfig { max_rows: Some(0), ..Default::default() },
            MatchConfig { truth_levels: vec![], ..Default::default() },
            MatchConfig {
                truth_levels: vec![TruthLevel::Parton, TruthLevel::Parton],
                ..Default::default()
            },
            MatchConfig {
                observables: vec![ObservableConfig::new("x", "a".into(), "b".into(), &[1.0, 0.0])],
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(Error::Validation(_))), "{cfg:?}");
        }
    }

    #[test]
    fn per_level_defaults() {
        let cfg = MatchConfig::default();
        assert_eq!(cfg.reco_algo_for(TruthLevel::Parton), RecoAlgo::KLFitter);
        assert_eq!(cfg.reco_algo_for(TruthLevel::Particle), RecoAlgo::PseudoTop);

        let (obs, standard) = cfg.observables_for(TruthLevel::Parton);
        assert!(standard);
        let names: Vec<_> = obs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            ["th_pt", "th_y", "th_y_abs", "tl_pt", "tl_y", "tl_y_abs", "mtt", "ptt", "ytt", "ytt_abs"]
        );
        assert_eq!(obs[0].reco, "klfitter_bestPerm_topHad_pt");
        assert_eq!(obs[0].truth, "MC_thad_afterFSR_pt / 1000");
        assert_eq!(obs[1].truth, "MC_thad_afterFSR_y");
        assert_eq!(obs[9].truth, "abs(MC_ttbar_afterFSR_y)");

        let (obs, _) = cfg.observables_for(TruthLevel::Particle);
        assert_eq!(obs[6].reco, "PseudoTop_Reco_ttbar_m");
        assert_eq!(obs[6].truth, "PseudoTop_Particle_ttbar_m");
    }
}
