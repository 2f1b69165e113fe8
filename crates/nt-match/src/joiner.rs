//! Forward join of the reco stream against a truth index, followed by the
//! reverse collection of truth-only rows.
//!
//! Row fates, per pass:
//!
//! | reco row                          | truth row                        | outcome              |
//! |-----------------------------------|----------------------------------|----------------------|
//! | key duplicated on either side     | -                                | `DuplicateSkip`      |
//! | selected, key found and accepted  | written with `isMatched`         | `Matched`            |
//! | selected, otherwise               | dummy (paired output)            | `UnmatchedDriving`   |
//! | dummy (paired output)             | accepted, not covered by reco    | `UnmatchedIndexed`   |
//!
//! A truth row is "covered" when its key is in the reco index and that reco
//! row, within the forward scan range, passes the reco selection with a
//! unique channel. This is re-derived in the reverse pass. Without duplicate
//! checking the reco index keeps the last copy of a key only, so truth rows
//! paired by the forward pass are also marked and never paired or emitted
//! again.
//!
//! Matching uses the truth acceptance alone. Truth-side histograms use the
//! truth row's own channel; an accepted truth row without a unique channel
//! is tallied and fills only the inclusive group.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use nt_core::{ChannelLabel, Error, EventKey, MatchOutcome, RecoAlgo, Result, StreamLevel, TruthLevel};
use nt_store::{
    EventStore, FieldHandle, KeyFields, OutputRow, Record, RecordSink, RowFlags, RowPos, TableSink,
};

use crate::accumulator::{CorrectionAccumulator, Corrections, ObservableSet};
use crate::classifier::Classifier;
use crate::config::{IndexBackend, MatchConfig};
use crate::extras::{ExtraSpec, TopPrefixes};
use crate::key_index::{KeyIndex, report_path};
use crate::sum_weights::SumWeights;
use crate::summary::RunSummary;

const PROGRESS_EVERY: usize = 10_000;

/// Cooperative cancellation flag shared between a caller and running passes.
///
/// A pass checks it before each row. Once set, the pass stops scanning,
/// skips the reverse pass, flushes what it has written and reports
/// `cancelled` in its summary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where channel outputs go.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Keep rows in memory.
    Memory,
    /// Write `<dir>/<name>_<level>_<channel>_{reco,<level>}.parquet`.
    Parquet {
        /// Output directory.
        dir: PathBuf,
        /// File name prefix.
        name: String,
    },
}

/// Reco and truth outputs of one channel. Rows are aligned when the output
/// is paired.
#[derive(Debug)]
pub struct ChannelOutput {
    /// Channel.
    pub channel: ChannelLabel,
    /// Reco rows.
    pub reco: TableSink,
    /// Truth rows.
    pub truth: TableSink,
}

/// Everything a pass produced.
#[derive(Debug)]
pub struct JoinResult {
    /// Counters.
    pub summary: RunSummary,
    /// One entry per [`ChannelLabel::CHANNELS`], in that order.
    pub outputs: Vec<ChannelOutput>,
    /// Correction histograms, if requested.
    pub corrections: Option<Corrections>,
}

impl JoinResult {
    /// Output of `channel`.
    pub fn output(&self, channel: ChannelLabel) -> Option<&ChannelOutput> {
        self.outputs.get(channel.index()?)
    }
}

struct Side<'a> {
    store: &'a dyn EventStore,
    keys: KeyFields,
    classifier: Classifier,
    extras: ExtraSpec,
}

impl Side<'_> {
    fn output_row(&self, rec: &Record<'_>, flags: RowFlags) -> Result<OutputRow> {
        Ok(OutputRow { input: rec.values(), flags, extras: self.extras.compute(rec)?.into_vec() })
    }

    /// Last row of the stream, flagged as dummy. `None` for an empty stream.
    fn dummy(&self) -> Result<Option<OutputRow>> {
        if self.store.n_rows() == 0 {
            tracing::warn!(stream = self.store.name(), "stream is empty, dummy padding disabled");
            return Ok(None);
        }
        let rec = self.store.get_entry(RowPos::Last)?;
        self.output_row(&rec, RowFlags::DUMMY).map(Some)
    }

    fn index(&self, backend: IndexBackend, check_duplicate: bool) -> Result<KeyIndex> {
        match backend {
            IndexBackend::Custom => KeyIndex::build(self.store, self.keys, check_duplicate),
            IndexBackend::Native => KeyIndex::from_native(self.store, self.keys),
        }
    }
}

struct PassState {
    summary: RunSummary,
    outputs: Vec<ChannelOutput>,
    acc: Option<CorrectionAccumulator>,
}

impl PassState {
    /// Channel of an accepted truth row; [`ChannelLabel::None`] when it has
    /// no unique channel.
    fn truth_channel(&mut self, side: &Side<'_>, rec: &Record<'_>, stream: &str) -> ChannelLabel {
        match side.classifier.select(rec) {
            Ok(Some(c)) => c,
            Ok(None) => ChannelLabel::None,
            Err(e) => {
                tracing::debug!(stream, row = rec.row(), error = %e, "truth row has no channel");
                self.summary.tally(stream, e);
                ChannelLabel::None
            }
        }
    }

    fn output(&mut self, channel: ChannelLabel) -> Result<&mut ChannelOutput> {
        channel
            .index()
            .and_then(|i| self.outputs.get_mut(i))
            .ok_or_else(|| Error::Validation(format!("no output for channel '{channel}'")))
    }
}

/// One reco × truth pass, with every field lookup resolved up front.
pub struct Joiner<'a> {
    cfg: &'a MatchConfig,
    level: TruthLevel,
    algo: RecoAlgo,
    reco: Side<'a>,
    truth: Side<'a>,
    upstream_flag: Option<FieldHandle>,
    observables: Option<ObservableSet>,
    cancel: CancelToken,
}

impl<'a> Joiner<'a> {
    /// Resolve keys, selections, extras and observables on both streams.
    ///
    /// Any missing required field is a `SchemaMismatch`.
    pub fn open(
        cfg: &'a MatchConfig,
        level: TruthLevel,
        reco: &'a dyn EventStore,
        truth: &'a dyn EventStore,
        sum_weights: Option<Arc<SumWeights>>,
    ) -> Result<Self> {
        let algo = cfg.reco_algo_for(level);
        let keys = |s: &dyn EventStore| {
            KeyFields::resolve(s.schema(), &cfg.run_field, &cfg.event_field)
                .map_err(|e| Error::SchemaMismatch(format!("stream '{}': {e}", s.name())))
        };
        let reco_side = Side {
            store: reco,
            keys: keys(reco)?,
            classifier: Classifier::reco(
                reco.schema(),
                algo,
                cfg.klfitter_min_log_likelihood,
                cfg.reco_cut.as_deref(),
            )?,
            extras: ExtraSpec::new(
                reco.schema(),
                StreamLevel::Reco,
                TopPrefixes::reco(algo),
                &cfg.reco_weight,
                &cfg.run_field,
                sum_weights.clone(),
            )?,
        };
        let truth_side = Side {
            store: truth,
            keys: keys(truth)?,
            classifier: Classifier::truth(truth.schema(), level)?,
            extras: ExtraSpec::new(
                truth.schema(),
                StreamLevel::Truth(level),
                TopPrefixes::truth(level),
                &cfg.truth_weight,
                &cfg.run_field,
                sum_weights,
            )?,
        };
        let upstream_flag = match level {
            TruthLevel::Parton => cfg
                .upstream_truth_flag
                .as_deref()
                .and_then(|name| FieldHandle::optional(reco.schema(), name)),
            TruthLevel::Particle => None,
        };
        let observables = if cfg.compute_corrections {
            let (configs, standard) = cfg.observables_for(level);
            Some(ObservableSet::bind(&configs, reco.schema(), truth.schema(), standard)?)
        } else {
            None
        };
        Ok(Self {
            cfg,
            level,
            algo,
            reco: reco_side,
            truth: truth_side,
            upstream_flag,
            observables,
            cancel: CancelToken::new(),
        })
    }

    /// Observe `token` while running.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Truth level of this pass.
    pub fn level(&self) -> TruthLevel {
        self.level
    }

    fn sinks(&self, target: &OutputTarget) -> Result<Vec<ChannelOutput>> {
        let level = self.level.name();
        ChannelLabel::CHANNELS
            .iter()
            .map(|&channel| {
                let reco_name = format!("{level}_{channel}_reco");
                let truth_name = format!("{level}_{channel}_{level}");
                let reco_schema = self.reco.store.schema();
                let truth_schema = self.truth.store.schema();
                let (reco, truth) = match target {
                    OutputTarget::Memory => (
                        TableSink::new(&reco_name, reco_schema, self.reco.extras.fields())?,
                        TableSink::new(&truth_name, truth_schema, self.truth.extras.fields())?,
                    ),
                    OutputTarget::Parquet { dir, name } => (
                        TableSink::parquet(
                            &reco_name,
                            reco_schema,
                            self.reco.extras.fields(),
                            dir.join(format!("{name}_{reco_name}.parquet")),
                        )?,
                        TableSink::parquet(
                            &truth_name,
                            truth_schema,
                            self.truth.extras.fields(),
                            dir.join(format!("{name}_{truth_name}.parquet")),
                        )?,
                    ),
                };
                Ok(ChannelOutput {
                    channel,
                    reco: reco.with_dummy_pad(self.cfg.dummy_pad),
                    truth: truth.with_dummy_pad(self.cfg.dummy_pad),
                })
            })
            .collect()
    }

    fn report_duplicates(&self, index: &KeyIndex, stream: &str, summary: &mut RunSummary) -> Result<()> {
        summary.duplicate_keys.insert(stream.to_string(), index.duplicates().len());
        let path = self.cfg.duplicate_report.as_deref().map(|p| report_path(p, stream));
        index.report(path.as_deref())
    }

    /// Run both scans and close the outputs.
    pub fn run(self, target: &OutputTarget) -> Result<JoinResult> {
        let t0 = Instant::now();
        let cfg = self.cfg;
        let reco_stream = StreamLevel::Reco.name();
        let truth_stream = self.level.name();

        let mut check_duplicate = cfg.check_duplicate;
        if check_duplicate && cfg.index_backend == IndexBackend::Native {
            tracing::warn!("native index cannot detect duplicates, duplicate check disabled");
            check_duplicate = false;
        }

        let mut state = PassState {
            summary: RunSummary::new(self.level, self.algo),
            outputs: self.sinks(target)?,
            acc: self.observables.clone().map(CorrectionAccumulator::new),
        };

        let truth_index = self.truth.index(cfg.index_backend, check_duplicate)?;
        self.report_duplicates(&truth_index, truth_stream, &mut state.summary)?;
        let mut reco_index = if check_duplicate {
            let idx = self.reco.index(cfg.index_backend, true)?;
            self.report_duplicates(&idx, reco_stream, &mut state.summary)?;
            Some(idx)
        } else {
            None
        };

        let (dummy_reco, dummy_truth) = if cfg.paired_output {
            (self.reco.dummy()?, self.truth.dummy()?)
        } else {
            (None, None)
        };

        let is_duplicate = |key: EventKey, reco_index: &Option<KeyIndex>| {
            truth_index.is_duplicate(&key)
                || reco_index.as_ref().is_some_and(|i| i.is_duplicate(&key))
        };

        let mut paired = vec![false; self.truth.store.n_rows()];

        // Forward pass.
        let cursor = self.reco.store.cursor(cfg.max_rows);
        let forward_end = cursor.len();
        for rec in cursor {
            if self.cancel.is_cancelled() {
                state.summary.cancelled = true;
                break;
            }
            let row = rec.row();
            if row > 0 && row % PROGRESS_EVERY == 0 {
                tracing::debug!(level = truth_stream, row, total = forward_end, "forward pass");
            }
            state.summary.reco_rows_scanned += 1;

            let key = self.reco.keys.key(&rec);
            if is_duplicate(key, &reco_index) {
                state.summary.tally_duplicate(reco_stream);
                continue;
            }
            let channel = match self.reco.classifier.select(&rec) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(stream = reco_stream, row, error = %e, "row skipped");
                    state.summary.tally(reco_stream, e);
                    continue;
                }
            };

            let matched = match truth_index.get(&key) {
                Some(j) if paired[j] => {
                    tracing::debug!(row, truth_row = j, "truth row already paired");
                    None
                }
                Some(j) => {
                    let trec = self.truth.store.get_entry(RowPos::At(j))?;
                    let accepted = match self.truth.classifier.accepts(&trec) {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::debug!(stream = truth_stream, row = j, error = %e, "truth row not accepted");
                            false
                        }
                    };
                    if let Some(flag) = self.upstream_flag
                        && rec.bool(flag) != accepted
                    {
                        tracing::debug!(row, upstream = rec.bool(flag), accepted, "upstream truth flag disagrees");
                        state.summary.upstream_flag_disagreements += 1;
                    }
                    accepted.then_some((j, trec))
                }
                None => None,
            };

            let w_reco = self.reco.extras.weight(&rec);
            if let Some(acc) = state.acc.as_mut() {
                acc.fill_denominator(StreamLevel::Reco, channel, &rec, w_reco);
            }

            match matched {
                Some((j, trec)) => {
                    paired[j] = true;
                    let truth_channel = state.truth_channel(&self.truth, &trec, truth_stream);
                    state.summary.record(MatchOutcome::Matched, channel);
                    let reco_row = self.reco.output_row(&rec, RowFlags::MATCHED)?;
                    let truth_row = self.truth.output_row(&trec, RowFlags::MATCHED)?;
                    let out = state.output(channel)?;
                    out.reco.append(reco_row)?;
                    out.truth.append(truth_row)?;
                    if let Some(acc) = state.acc.as_mut() {
                        let w_truth = self.truth.extras.weight(&trec);
                        acc.fill_numerator([channel, truth_channel], &rec, &trec, w_reco, w_truth);
                        acc.fill_denominator(StreamLevel::Truth(self.level), truth_channel, &trec, w_truth);
                    }
                }
                None => {
                    state.summary.record(MatchOutcome::UnmatchedDriving, channel);
                    if cfg.save_unmatched_reco {
                        let reco_row = self.reco.output_row(&rec, RowFlags::UNMATCHED)?;
                        let out = state.output(channel)?;
                        out.reco.append(reco_row)?;
                        if let Some(d) = &dummy_truth {
                            out.truth.append(d.clone())?;
                        }
                    }
                }
            }
        }

        // Reverse pass.
        if !state.summary.cancelled && (cfg.save_unmatched_truth || cfg.compute_corrections) {
            if reco_index.is_none() {
                reco_index = Some(self.reco.index(cfg.index_backend, false)?);
            }
            let rindex = reco_index.as_ref();
            let cursor = self.truth.store.cursor(cfg.max_rows);
            let total = cursor.len();
            for trec in cursor {
                if self.cancel.is_cancelled() {
                    state.summary.cancelled = true;
                    break;
                }
                let row = trec.row();
                if row > 0 && row % PROGRESS_EVERY == 0 {
                    tracing::debug!(level = truth_stream, row, total, "reverse pass");
                }
                state.summary.truth_rows_scanned += 1;

                let key = self.truth.keys.key(&trec);
                if is_duplicate(key, &reco_index) {
                    state.summary.tally_duplicate(truth_stream);
                    continue;
                }
                if paired[row] {
                    continue;
                }
                match self.truth.classifier.accepts(&trec) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::debug!(stream = truth_stream, row, error = %e, "row skipped");
                        state.summary.tally(truth_stream, e);
                        continue;
                    }
                }
                if let Some(j) = rindex.and_then(|i| i.get(&key))
                    && j < forward_end
                {
                    let rrec = self.reco.store.get_entry(RowPos::At(j))?;
                    if matches!(self.reco.classifier.select(&rrec), Ok(Some(_))) {
                        continue;
                    }
                }
                let channel = state.truth_channel(&self.truth, &trec, truth_stream);
                if channel != ChannelLabel::None {
                    state.summary.record(MatchOutcome::UnmatchedIndexed, channel);
                }
                if cfg.save_unmatched_truth && channel != ChannelLabel::None {
                    let truth_row = self.truth.output_row(&trec, RowFlags::UNMATCHED)?;
                    let out = state.output(channel)?;
                    out.truth.append(truth_row)?;
                    if let Some(d) = &dummy_reco {
                        out.reco.append(d.clone())?;
                    }
                }
                if let Some(acc) = state.acc.as_mut() {
                    let w_truth = self.truth.extras.weight(&trec);
                    acc.fill_denominator(StreamLevel::Truth(self.level), channel, &trec, w_truth);
                }
            }
        }

        let PassState { mut summary, mut outputs, acc } = state;
        for out in &mut outputs {
            out.reco.finish()?;
            out.truth.finish()?;
            let c = summary.channels.entry(out.channel).or_default();
            c.reco_rows = out.reco.rows();
            c.truth_rows = out.truth.rows();
        }
        let corrections = acc.map(CorrectionAccumulator::finalize).transpose()?;
        tracing::info!(
            level = truth_stream,
            elapsed = ?t0.elapsed(),
            "join finished"
        );
        Ok(JoinResult { summary, outputs, corrections })
    }
}
