//! One join pass per truth level over shared, read-only input stores.

use std::sync::Arc;

use nt_core::{Result, TruthLevel};
use nt_store::EventStore;
use rayon::prelude::*;

use crate::config::MatchConfig;
use crate::joiner::{CancelToken, JoinResult, Joiner, OutputTarget};
use crate::sum_weights::SumWeights;

/// A truth stream and its level.
#[derive(Clone, Copy)]
pub struct TruthInput<'a> {
    /// Truth level.
    pub level: TruthLevel,
    /// Truth rows.
    pub store: &'a dyn EventStore,
}

/// Outcome of one pass. A failed pass does not affect the others.
#[derive(Debug)]
pub struct PassReport {
    /// Truth level of the pass.
    pub level: TruthLevel,
    /// Pass result.
    pub result: Result<JoinResult>,
}

/// Runs the configured passes.
pub struct Pipeline<'a> {
    cfg: &'a MatchConfig,
    reco: &'a dyn EventStore,
    truths: Vec<TruthInput<'a>>,
    sum_weights: Option<SumWeights>,
    parallel: bool,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    /// Pipeline driving over `reco`.
    pub fn new(cfg: &'a MatchConfig, reco: &'a dyn EventStore) -> Self {
        Self {
            cfg,
            reco,
            truths: Vec::new(),
            sum_weights: None,
            parallel: true,
            cancel: CancelToken::new(),
        }
    }

    /// Add a truth stream.
    pub fn with_truth(mut self, level: TruthLevel, store: &'a dyn EventStore) -> Self {
        self.truths.push(TruthInput { level, store });
        self
    }

    /// Sum of weights from a `sumWeights` stream. Entries from the
    /// configuration take precedence.
    pub fn with_sum_weights(mut self, sum_weights: SumWeights) -> Self {
        self.sum_weights = Some(sum_weights);
        self
    }

    /// Allow passes to run concurrently (default). Bounded runs
    /// (`max_rows`) are always sequential.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Share `token` with every pass.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    fn sum_weights(&self) -> Option<Arc<SumWeights>> {
        let mut sw = self.sum_weights.clone().unwrap_or_default();
        if let Some(map) = &self.cfg.sum_weights {
            sw.merge(SumWeights::from_map(map.clone()));
        }
        (!sw.is_empty()).then(|| Arc::new(sw))
    }

    /// Passes that will run, in configuration order.
    pub fn passes(&self) -> Vec<TruthInput<'a>> {
        let mut out = Vec::new();
        for &level in &self.cfg.truth_levels {
            match self.truths.iter().find(|t| t.level == level) {
                Some(t) => out.push(*t),
                None => tracing::warn!(%level, "no truth input, pass skipped"),
            }
        }
        out
    }

    fn run_one(
        &self,
        input: TruthInput<'a>,
        sum_weights: Option<Arc<SumWeights>>,
        target: &OutputTarget,
    ) -> Result<JoinResult> {
        let result = Joiner::open(self.cfg, input.level, self.reco, input.store, sum_weights)?
            .with_cancel(self.cancel.clone())
            .run(target)?;
        if let OutputTarget::Parquet { dir, name } = target {
            let level = input.level.name();
            if let Some(c) = &result.corrections {
                c.write_json(&dir.join(format!("{name}_{level}_corrections.json")))?;
            }
            result.summary.write_json(&dir.join(format!("{name}_{level}_summary.json")))?;
        }
        result.summary.log();
        Ok(result)
    }

    /// Run every pass. Failures are logged and reported per pass.
    pub fn run(&self, target: &OutputTarget) -> Result<Vec<PassReport>> {
        if let OutputTarget::Parquet { dir, .. } = target {
            std::fs::create_dir_all(dir)?;
        }
        let sum_weights = self.sum_weights();
        if sum_weights.is_none() {
            tracing::info!("no sum of weights, event weights are not normalized");
        }
        let passes = self.passes();
        let run = |input: &TruthInput<'a>| {
            let result = self.run_one(*input, sum_weights.clone(), target);
            if let Err(e) = &result {
                tracing::error!(level = %input.level, error = %e, "pass abandoned");
            }
            PassReport { level: input.level, result }
        };
        let reports = if self.parallel && self.cfg.max_rows.is_none() && passes.len() > 1 {
            passes.par_iter().map(run).collect()
        } else {
            passes.iter().map(run).collect()
        };
        Ok(reports)
    }
}
