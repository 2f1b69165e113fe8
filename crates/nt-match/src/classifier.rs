//! Event selection and e+jets / μ+jets channel classification.
//!
//! A classifier is built once per stream from its schema. Per row it answers
//! two questions: does the row pass the level's selection
//! ([`accepts`](Classifier::accepts)), and if so, which single channel does it
//! belong to ([`select`](Classifier::select)).

use nt_core::{ChannelLabel, Error, RecoAlgo, Result, RowError, StreamLevel, TruthLevel};
use nt_store::{BoundExpr, CompiledExpr, FieldHandle, Record, Schema};

const EJETS_FLAG: &str = "passed_resolved_ejets_4j2b";
const MUJETS_FLAG: &str = "passed_resolved_mujets_4j2b";
const ELECTRON: i64 = 11;
const MUON: i64 = 13;

/// ttbar decay mode from the hadronic/leptonic nature of each W.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecayMode {
    /// Both W bosons decay leptonically.
    Dilepton,
    /// W from t leptonic, W from t̄ hadronic.
    LeptonicTop,
    /// W from t hadronic, W from t̄ leptonic.
    LeptonicAntitop,
    /// Both W bosons decay hadronically.
    AllHadronic,
}

impl DecayMode {
    /// Decay mode from the first W-decay product of t and t̄.
    ///
    /// A product id of `0` means the generator record is incomplete.
    pub fn from_pdgids(w_from_t: i64, w_from_tbar: i64) -> std::result::Result<Self, RowError> {
        if w_from_t == 0 || w_from_tbar == 0 {
            return Err(RowError::IndeterminateDecay);
        }
        let hadronic = |id: i64| (1..=6).contains(&id.abs());
        Ok(match (hadronic(w_from_t), hadronic(w_from_tbar)) {
            (false, false) => DecayMode::Dilepton,
            (false, true) => DecayMode::LeptonicTop,
            (true, false) => DecayMode::LeptonicAntitop,
            (true, true) => DecayMode::AllHadronic,
        })
    }

    /// Exactly one hadronic W.
    pub fn is_semileptonic(self) -> bool {
        matches!(self, DecayMode::LeptonicTop | DecayMode::LeptonicAntitop)
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelFlags {
    ejets: FieldHandle,
    mujets: FieldHandle,
}

impl ChannelFlags {
    fn resolve(schema: &Schema) -> Option<Self> {
        Some(Self {
            ejets: FieldHandle::optional(schema, EJETS_FLAG)?,
            mujets: FieldHandle::optional(schema, MUJETS_FLAG)?,
        })
    }

    fn eval(&self, rec: &Record<'_>) -> (bool, bool) {
        (rec.bool(self.ejets), rec.bool(self.mujets))
    }
}

#[derive(Debug, Clone, Copy)]
enum RecoChannels {
    Flags(ChannelFlags),
    /// `jet_n > 3 && bjet_n > 1` and the lepton flavour.
    Derived { jet_n: FieldHandle, bjet_n: FieldHandle, lep_pdgid: FieldHandle },
}

/// Reco-level selection.
#[derive(Debug, Clone)]
pub struct RecoSelection {
    channels: RecoChannels,
    log_likelihood: Option<(FieldHandle, f64)>,
    cut: Option<BoundExpr>,
}

/// Particle-level selection.
#[derive(Debug, Clone, Copy)]
pub struct ParticleSelection {
    passed: FieldHandle,
    channels: ChannelFlags,
}

#[derive(Debug, Clone, Copy)]
struct WDecays {
    first: FieldHandle,
    second: FieldHandle,
}

/// Parton-level selection.
#[derive(Debug, Clone, Copy)]
pub struct PartonSelection {
    from_t: WDecays,
    from_tbar: WDecays,
}

/// Selection and channel classification for one stream.
#[derive(Debug, Clone)]
pub enum Classifier {
    /// Detector level.
    Reco(RecoSelection),
    /// Particle level.
    Particle(ParticleSelection),
    /// Parton level.
    Parton(PartonSelection),
}

impl Classifier {
    /// Reco classifier for `algo`.
    ///
    /// `min_log_likelihood` applies to KLFitter only; if the likelihood field
    /// is missing the cut is dropped with a warning. `cut` is an extra
    /// selection expression.
    pub fn reco(
        schema: &Schema,
        algo: RecoAlgo,
        min_log_likelihood: Option<f64>,
        cut: Option<&str>,
    ) -> Result<Self> {
        let channels = match ChannelFlags::resolve(schema) {
            Some(flags) => RecoChannels::Flags(flags),
            None => {
                let derived = (|| {
                    Ok::<_, Error>(RecoChannels::Derived {
                        jet_n: FieldHandle::scalar(schema, "jet_n")?,
                        bjet_n: FieldHandle::scalar(schema, "bjet_n")?,
                        lep_pdgid: FieldHandle::scalar(schema, "lep_pdgid")?,
                    })
                })();
                derived.map_err(|e| {
                    Error::SchemaMismatch(format!(
                        "reco stream has neither {EJETS_FLAG}/{MUJETS_FLAG} nor the fields to derive them: {e}"
                    ))
                })?
            }
        };
        let log_likelihood = match (algo, min_log_likelihood) {
            (RecoAlgo::KLFitter, Some(min)) => {
                match FieldHandle::optional(schema, "klfitter_logLikelihood") {
                    Some(h) => Some((h, min)),
                    None => {
                        tracing::warn!("klfitter_logLikelihood not found, likelihood cut disabled");
                        None
                    }
                }
            }
            _ => None,
        };
        let cut = cut.map(|src| CompiledExpr::compile(src)?.bind(schema)).transpose()?;
        Ok(Classifier::Reco(RecoSelection { channels, log_likelihood, cut }))
    }

    /// Truth classifier for `level`.
    pub fn truth(schema: &Schema, level: TruthLevel) -> Result<Self> {
        match level {
            TruthLevel::Particle => {
                let passed = FieldHandle::scalar(schema, "passedPL")?;
                let channels = ChannelFlags::resolve(schema).ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "particle stream needs {EJETS_FLAG} and {MUJETS_FLAG}"
                    ))
                })?;
                Ok(Classifier::Particle(ParticleSelection { passed, channels }))
            }
            TruthLevel::Parton => {
                let w = |n: u8, side: &str| {
                    FieldHandle::scalar(schema, &format!("MC_Wdecay{n}_from_{side}_afterFSR_pdgid"))
                };
                Ok(Classifier::Parton(PartonSelection {
                    from_t: WDecays { first: w(1, "t")?, second: w(2, "t")? },
                    from_tbar: WDecays { first: w(1, "tbar")?, second: w(2, "tbar")? },
                }))
            }
        }
    }

    /// Stream level this classifier applies to.
    pub fn level(&self) -> StreamLevel {
        match self {
            Classifier::Reco(_) => StreamLevel::Reco,
            Classifier::Particle(_) => StreamLevel::Truth(TruthLevel::Particle),
            Classifier::Parton(_) => StreamLevel::Truth(TruthLevel::Parton),
        }
    }


    /// Level selection only, without requiring a unique channel.
    pub fn accepts(&self, rec: &Record<'_>) -> std::result::Result<bool, RowError> {
        match self {
            Classifier::Reco(r) => {
                if !r.passes_cuts(rec) {
                    return Ok(false);
                }
                let (e, m) = r.channels(rec);
                Ok(e || m)
            }
            Classifier::Particle(p) => Ok(rec.bool(p.passed)),
            Classifier::Parton(p) => Ok(p.decay_mode(rec)?.is_semileptonic()),
        }
    }

    /// Selection plus classification.
    ///
    /// `Ok(None)` if the row fails the selection. A selected row whose channel
    /// predicates do not hold exactly once is a
    /// [`RowError::ClassificationAmbiguity`].
    pub fn select(&self, rec: &Record<'_>) -> std::result::Result<Option<ChannelLabel>, RowError> {
        let (ejets, mujets) = match self {
            Classifier::Reco(r) => {
                if !r.passes_cuts(rec) {
                    return Ok(None);
                }
                let (e, m) = r.channels(rec);
                if !(e || m) {
                    return Ok(None);
                }
                (e, m)
            }
            Classifier::Particle(p) => {
                if !rec.bool(p.passed) {
                    return Ok(None);
                }
                p.channels.eval(rec)
            }
            Classifier::Parton(p) => {
                let lepton = match p.decay_mode(rec)? {
                    DecayMode::LeptonicTop => p.from_t,
                    DecayMode::LeptonicAntitop => p.from_tbar,
                    DecayMode::Dilepton | DecayMode::AllHadronic => return Ok(None),
                };
                let ids = [rec.i64(lepton.first).abs(), rec.i64(lepton.second).abs()];
                (ids.contains(&ELECTRON), ids.contains(&MUON))
            }
        };
        match ChannelLabel::from_predicates(ejets, mujets) {
            Ok(ChannelLabel::None) => Err(RowError::ClassificationAmbiguity { matches: 0 }),
            Ok(label) => Ok(Some(label)),
            Err(matches) => Err(RowError::ClassificationAmbiguity { matches }),
        }
    }
}

impl RecoSelection {
    fn passes_cuts(&self, rec: &Record<'_>) -> bool {
        if let Some((h, min)) = self.log_likelihood
            && rec.f64(h) < min
        {
            return false;
        }
        self.cut.as_ref().is_none_or(|c| c.test(rec))
    }

    fn channels(&self, rec: &Record<'_>) -> (bool, bool) {
        match self.channels {
            RecoChannels::Flags(f) => f.eval(rec),
            RecoChannels::Derived { jet_n, bjet_n, lep_pdgid } => {
                if !(rec.i64(jet_n) > 3 && rec.i64(bjet_n) > 1) {
                    return (false, false);
                }
                let id = rec.i64(lep_pdgid).abs();
                (id == ELECTRON, id == MUON)
            }
        }
    }
}

impl PartonSelection {
    fn decay_mode(&self, rec: &Record<'_>) -> std::result::Result<DecayMode, RowError> {
        DecayMode::from_pdgids(rec.i64(self.from_t.first), rec.i64(self.from_tbar.first))
    }
}
