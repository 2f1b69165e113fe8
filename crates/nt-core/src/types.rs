//! Common data types for ntupler

use std::fmt;

use serde::{Deserialize, Serialize};

/// Natural key of a collision event: `(runNumber, eventNumber)`.
///
/// Equality, ordering and hashing are structural. Uniqueness is a property of
/// a key index, not of a raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Run number
    pub run: i64,
    /// Event number within the run
    pub event: i64,
}

impl EventKey {
    /// Create a new key
    pub fn new(run: i64, event: i64) -> Self {
        Self { run, event }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.run, self.event)
    }
}

impl From<(i64, i64)> for EventKey {
    fn from((run, event): (i64, i64)) -> Self {
        Self { run, event }
    }
}

/// Mutually exclusive event category based on the lepton flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLabel {
    /// Electron + jets
    EJets,
    /// Muon + jets
    MuJets,
    /// No channel
    None,
}

impl ChannelLabel {
    /// The real (non-`None`) channels, in output order.
    pub const CHANNELS: [ChannelLabel; 2] = [ChannelLabel::EJets, ChannelLabel::MuJets];

    /// Short name used in file names and histogram directories.
    pub fn name(self) -> &'static str {
        match self {
            ChannelLabel::EJets => "ejets",
            ChannelLabel::MuJets => "mjets",
            ChannelLabel::None => "none",
        }
    }

    /// Position in [`ChannelLabel::CHANNELS`], `None` for [`ChannelLabel::None`].
    pub fn index(self) -> Option<usize> {
        match self {
            ChannelLabel::EJets => Some(0),
            ChannelLabel::MuJets => Some(1),
            ChannelLabel::None => None,
        }
    }

    /// Build a label from per-channel predicate results.
    ///
    /// Returns `Ok(None)` if no predicate holds and `Err(n)` if `n > 1` hold.
    pub fn from_predicates(ejets: bool, mujets: bool) -> std::result::Result<Self, usize> {
        match (ejets, mujets) {
            (true, false) => Ok(ChannelLabel::EJets),
            (false, true) => Ok(ChannelLabel::MuJets),
            (false, false) => Ok(ChannelLabel::None),
            (true, true) => Err(2),
        }
    }
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of joining one record against the other stream's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Both sides present and both pass their selections.
    Matched,
    /// Driving (reco) record without an accepted counterpart.
    UnmatchedDriving,
    /// Indexed (truth) record never covered by the forward pass.
    UnmatchedIndexed,
    /// Key is duplicated on at least one side; excluded everywhere.
    DuplicateSkip,
}

/// Granularity of the truth stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruthLevel {
    /// Generator-level tops and W decay products.
    Parton,
    /// Stable-particle-level pseudo-tops.
    Particle,
}

impl TruthLevel {
    /// Lower-case name (`"parton"` / `"particle"`).
    pub fn name(self) -> &'static str {
        match self {
            TruthLevel::Parton => "parton",
            TruthLevel::Particle => "particle",
        }
    }
}

impl fmt::Display for TruthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which stream a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamLevel {
    /// Detector-level reconstructed stream.
    Reco,
    /// Truth stream at the given granularity.
    Truth(TruthLevel),
}

impl StreamLevel {
    /// Short label used in output names (`reco`, `parton`, `particle`).
    pub fn name(self) -> &'static str {
        match self {
            StreamLevel::Reco => "reco",
            StreamLevel::Truth(t) => t.name(),
        }
    }
}

/// ttbar reconstruction algorithm used for the reco stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecoAlgo {
    /// KLFitter likelihood fit
    #[default]
    #[serde(rename = "klfitter", alias = "KLFitter")]
    KLFitter,
    /// PseudoTop reconstruction
    #[serde(rename = "pseudotop", alias = "PseudoTop")]
    PseudoTop,
}
