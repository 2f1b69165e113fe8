//! End-of-pass summary.

use std::collections::BTreeMap;
use std::path::Path;

use nt_core::{ChannelLabel, MatchOutcome, RecoAlgo, Result, RowError, TruthLevel};
use serde::{Deserialize, Serialize};

/// Row counts of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    /// Reco rows matched to an accepted truth row.
    pub matched: usize,
    /// Selected reco rows without an accepted truth counterpart.
    pub unmatched_reco: usize,
    /// Accepted truth rows without a selected reco counterpart.
    pub unmatched_truth: usize,
    /// Rows written to the reco output, dummies included.
    pub reco_rows: usize,
    /// Rows written to the truth output, dummies included.
    pub truth_rows: usize,
}

/// Totals of one truth-level pass, logged at `info` and written as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Truth level of the pass.
    pub level: TruthLevel,
    /// Reco algorithm of the pass.
    pub reco_algo: RecoAlgo,
    /// Reco rows visited by the forward pass.
    pub reco_rows_scanned: usize,
    /// Truth rows visited by the reverse pass.
    pub truth_rows_scanned: usize,
    /// Duplicated keys found per stream.
    pub duplicate_keys: BTreeMap<String, usize>,
    /// Rows skipped because their key is duplicated, per scanned stream.
    pub duplicate_skips: BTreeMap<String, usize>,
    /// Row errors per stream and reason.
    pub skipped: BTreeMap<String, BTreeMap<String, usize>>,
    /// Per channel row counts.
    pub channels: BTreeMap<ChannelLabel, ChannelCounts>,
    /// Matched-key truth rows where the upstream truth flag disagreed with
    /// the recomputed acceptance.
    pub upstream_flag_disagreements: usize,
    /// The pass was stopped before scanning every row.
    pub cancelled: bool,
}

impl RunSummary {
    /// Empty summary.
    pub fn new(level: TruthLevel, reco_algo: RecoAlgo) -> Self {
        Self {
            level,
            reco_algo,
            reco_rows_scanned: 0,
            truth_rows_scanned: 0,
            duplicate_keys: BTreeMap::new(),
            duplicate_skips: BTreeMap::new(),
            skipped: BTreeMap::new(),
            channels: ChannelLabel::CHANNELS.iter().map(|&c| (c, ChannelCounts::default())).collect(),
            upstream_flag_disagreements: 0,
            cancelled: false,
        }
    }

    /// Count a row error on `stream`.
    pub fn tally(&mut self, stream: &str, err: RowError) {
        *self
            .skipped
            .entry(stream.to_string())
            .or_default()
            .entry(err.reason().to_string())
            .or_insert(0) += 1;
    }

    /// Count a duplicate-key skip on `stream`.
    pub fn tally_duplicate(&mut self, stream: &str) {
        *self.duplicate_skips.entry(stream.to_string()).or_insert(0) += 1;
    }

    /// Count an outcome in `channel`.
    pub fn record(&mut self, outcome: MatchOutcome, channel: ChannelLabel) {
        let c = self.channels.entry(channel).or_default();
        match outcome {
            MatchOutcome::Matched => c.matched += 1,
            MatchOutcome::UnmatchedDriving => c.unmatched_reco += 1,
            MatchOutcome::UnmatchedIndexed => c.unmatched_truth += 1,
            MatchOutcome::DuplicateSkip => {}
        }
    }

    /// Row errors of `stream` with `reason`.
    pub fn skipped_count(&self, stream: &str, reason: &str) -> usize {
        self.skipped.get(stream).and_then(|m| m.get(reason)).copied().unwrap_or(0)
    }

    /// Counts of `channel`.
    pub fn channel(&self, channel: ChannelLabel) -> ChannelCounts {
        self.channels.get(&channel).copied().unwrap_or_default()
    }

    /// Log the summary.
    pub fn log(&self) {
        tracing::info!(
            level = %self.level,
            reco_rows = self.reco_rows_scanned,
            truth_rows = self.truth_rows_scanned,
            cancelled = self.cancelled,
            "pass finished"
        );
        for (stream, n) in &self.duplicate_keys {
            tracing::info!(level = %self.level, stream = %stream, keys = n, "duplicate keys");
        }
        for (stream, reasons) in &self.skipped {
            for (reason, n) in reasons {
                tracing::info!(level = %self.level, stream = %stream, reason = %reason, rows = n, "rows skipped");
            }
        }
        for (channel, c) in &self.channels {
            tracing::info!(
                level = %self.level,
                channel = %channel,
                matched = c.matched,
                unmatched_reco = c.unmatched_reco,
                unmatched_truth = c.unmatched_truth,
                "channel totals"
            );
        }
        if self.upstream_flag_disagreements > 0 {
            tracing::warn!(
                level = %self.level,
                rows = self.upstream_flag_disagreements,
                "upstream truth flag disagrees with recomputed acceptance"
            );
        }
    }

    /// Write as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
