//! Sum of generator weights per sample, used to normalize MC event weights.

use std::collections::BTreeMap;
use std::fmt;

use nt_core::{Error, Result};
use nt_store::{EventStore, FieldTable};
use serde::{Deserialize, Serialize};

/// MC16 sub-campaign, inferred from the data-taking run number assigned to an
/// MC event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Campaign {
    /// 2015–2016 conditions.
    Mc16a,
    /// 2017 conditions.
    Mc16d,
    /// 2018 conditions.
    Mc16e,
}

impl Campaign {
    /// Campaign whose run range contains `run`.
    pub fn from_run(run: i64) -> Option<Self> {
        match run {
            276073..=311481 => Some(Campaign::Mc16a),
            325713..=340453 => Some(Campaign::Mc16d),
            348885..=364292 => Some(Campaign::Mc16e),
            _ => None,
        }
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Campaign::Mc16a => "mc16a",
            Campaign::Mc16d => "mc16d",
            Campaign::Mc16e => "mc16e",
        }
    }
}

impl fmt::Display for Campaign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sum-of-weights lookup.
///
/// Two sources are supported: a per-campaign table from the configuration,
/// and per-sample totals summed from a `sumWeights` stream. A per-campaign
/// entry takes precedence for its DSID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SumWeights {
    by_campaign: BTreeMap<i64, BTreeMap<Campaign, f64>>,
    totals: BTreeMap<i64, f64>,
}

impl SumWeights {
    /// Table keyed by DSID and campaign.
    pub fn from_map(by_campaign: BTreeMap<i64, BTreeMap<Campaign, f64>>) -> Self {
        Self { by_campaign, totals: BTreeMap::new() }
    }

    /// Sum `totalEventsWeighted` per `dsid` over every row of `store`.
    pub fn from_store(store: &dyn EventStore) -> Result<Self> {
        let fields = FieldTable::resolve(store.schema(), &["dsid", "totalEventsWeighted"])
            .map_err(|e| Error::SchemaMismatch(format!("sum of weights '{}': {e}", store.name())))?;
        let (dsid, sumw) = (fields.handle(0), fields.handle(1));
        let mut totals = BTreeMap::new();
        for rec in store.cursor(None) {
            *totals.entry(rec.i64(dsid)).or_insert(0.0) += rec.f64(sumw);
        }
        tracing::info!(stream = store.name(), samples = totals.len(), "loaded sum of weights");
        Ok(Self { by_campaign: BTreeMap::new(), totals })
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: SumWeights) {
        for (dsid, m) in other.by_campaign {
            self.by_campaign.entry(dsid).or_default().extend(m);
        }
        self.totals.extend(other.totals);
    }

    /// `true` if no sample is known.
    pub fn is_empty(&self) -> bool {
        self.by_campaign.is_empty() && self.totals.is_empty()
    }

    /// Sum of weights for an event of sample `dsid` with run number `run`.
    pub fn get(&self, dsid: i64, run: i64) -> Result<f64> {
        if let Some(per) = self.by_campaign.get(&dsid) {
            let campaign = Campaign::from_run(run).ok_or_else(|| {
                Error::Validation(format!("run number {run} is outside every MC16 campaign"))
            })?;
            return per.get(&campaign).copied().ok_or_else(|| {
                Error::Validation(format!("no sum of weights for DSID {dsid} in {campaign}"))
            });
        }
        self.totals
            .get(&dsid)
            .copied()
            .ok_or_else(|| Error::Validation(format!("no sum of weights for DSID {dsid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nt_store::{EventTable, Field, FieldType, Schema, Value};

    #[test]
    fn campaign_ranges() {
        assert_eq!(Campaign::from_run(276073), Some(Campaign::Mc16a));
        assert_eq!(Campaign::from_run(311481), Some(Campaign::Mc16a));
        assert_eq!(Campaign::from_run(311482), None);
        assert_eq!(Campaign::from_run(330000), Some(Campaign::Mc16d));
        assert_eq!(Campaign::from_run(364292), Some(Campaign::Mc16e));
        assert_eq!(Campaign::from_run(0), None);
    }

    #[test]
    fn lookup_by_campaign() {
        let mut m = BTreeMap::new();
        m.insert(410470, BTreeMap::from([(Campaign::Mc16a, 10.0), (Campaign::Mc16e, 30.0)]));
        let sw = SumWeights::from_map(m);
        assert_eq!(sw.get(410470, 300000).unwrap(), 10.0);
        assert_eq!(sw.get(410470, 350000).unwrap(), 30.0);
        assert!(sw.get(410470, 330000).is_err());
        assert!(sw.get(410470, 1).is_err());
        assert!(sw.get(410471, 300000).is_err());
    }

    #[test]
    fn totals_from_store() {
        let schema = Schema::new(vec![
            Field::new("dsid", FieldType::Int),
            Field::new("totalEventsWeighted", FieldType::Float),
        ])
        .unwrap();
        let mut t = EventTable::new("sumWeights", schema);
        for (dsid, w) in [(410470, 1.5), (410470, 2.5), (410471, 7.0)] {
            t.push_row(vec![Value::Int(dsid), Value::Float(w)]).unwrap();
        }
        let mut sw = SumWeights::from_store(&t).unwrap();
        assert_eq!(sw.get(410470, 0).unwrap(), 4.0);
        assert_eq!(sw.get(410471, 350000).unwrap(), 7.0);

        sw.merge(SumWeights::from_map(BTreeMap::from([(
            410470,
            BTreeMap::from([(Campaign::Mc16d, 2.0)]),
        )])));
        assert_eq!(sw.get(410470, 330000).unwrap(), 2.0);
        assert_eq!(sw.get(410471, 350000).unwrap(), 7.0);
    }

    #[test]
    fn store_without_fields_is_schema_mismatch() {
        let t = EventTable::new("sumWeights", Schema::new(vec![]).unwrap());
        assert!(matches!(SumWeights::from_store(&t), Err(Error::SchemaMismatch(_))));
    }
}
