#![allow(dead_code)]

use nt_core::{EventKey, TruthLevel};
use nt_match::{MatchConfig, ObservableConfig};
use nt_store::{Column, EventStore, EventTable, Field, FieldType, IS_DUMMY, IS_MATCHED, Schema, Value};

/// t → e ν, t̄ hadronic.
pub const E: [i64; 4] = [-11, 12, 2, -1];
/// t hadronic, t̄ → μ ν.
pub const MU: [i64; 4] = [1, -2, 13, -14];
/// Both W hadronic.
pub const HAD: [i64; 4] = [2, -1, 3, -4];
/// τ lepton.
pub const TAU: [i64; 4] = [-15, 16, 2, -1];
/// Incomplete generator record.
pub const ZERO: [i64; 4] = [0, 0, 2, -1];

/// Reco channel of a fixture row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reco {
    E,
    Mu,
    Both,
    None,
}

pub fn reco(rows: &[(i64, i64, Reco)]) -> EventTable {
    let schema = Schema::new(vec![
        Field::new("runNumber", FieldType::Int),
        Field::new("eventNumber", FieldType::Int),
        Field::new("totalWeight_nominal", FieldType::Float),
        Field::new("passed_resolved_ejets_4j2b", FieldType::Bool),
        Field::new("passed_resolved_mujets_4j2b", FieldType::Bool),
        Field::new("klfitter_logLikelihood", FieldType::Float),
        Field::new("isTruthSemileptonic", FieldType::Bool),
        Field::new("klfitter_bestPerm_ttbar_m", FieldType::Float),
    ])
    .unwrap();
    let mut t = EventTable::new("reco", schema);
    for &(run, event, ch) in rows {
        let (e, m) = match ch {
            Reco::E => (true, false),
            Reco::Mu => (false, true),
            Reco::Both => (true, true),
            Reco::None => (false, false),
        };
        t.push_row(vec![
            Value::Int(run),
            Value::Int(event),
            Value::Float(1.0),
            Value::Bool(e),
            Value::Bool(m),
            Value::Float(-30.0),
            Value::Bool(true),
            Value::Float(450.0),
        ])
        .unwrap();
    }
    t
}

pub fn parton(rows: &[(i64, i64, [i64; 4])]) -> EventTable {
    let schema = Schema::new(vec![
        Field::new("runNumber", FieldType::Int),
        Field::new("eventNumber", FieldType::Int),
        Field::new("weight_mc", FieldType::Float),
        Field::new("MC_Wdecay1_from_t_afterFSR_pdgid", FieldType::Int),
        Field::new("MC_Wdecay2_from_t_afterFSR_pdgid", FieldType::Int),
        Field::new("MC_Wdecay1_from_tbar_afterFSR_pdgid", FieldType::Int),
        Field::new("MC_Wdecay2_from_tbar_afterFSR_pdgid", FieldType::Int),
        Field::new("MC_ttbar_afterFSR_m", FieldType::Float),
    ])
    .unwrap();
    let mut t = EventTable::new("parton", schema);
    for &(run, event, ids) in rows {
        let mut row = vec![Value::Int(run), Value::Int(event), Value::Float(2.0)];
        row.extend(ids.iter().map(|&i| Value::Int(i)));
        row.push(Value::Float(450_000.0));
        t.push_row(row).unwrap();
    }
    t
}

/// Parton-only configuration with one `mtt` observable.
pub fn config() -> MatchConfig {
    MatchConfig {
        truth_levels: vec![TruthLevel::Parton],
        check_duplicate: true,
        observables: vec![ObservableConfig {
            name: "mtt".into(),
            reco: "klfitter_bestPerm_ttbar_m".into(),
            truth: "MC_ttbar_afterFSR_m / 1000".into(),
            bins: vec![300.0, 400.0, 500.0, 1000.0],
        }],
        ..Default::default()
    }
}

/// One output row, reduced to what the tests check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flagged {
    pub key: EventKey,
    pub matched: bool,
    pub dummy: bool,
}

fn col<'t>(t: &'t EventTable, name: &str) -> &'t Column {
    t.column(name).unwrap_or_else(|| panic!("missing column {name}"))
}

pub fn rows(t: &EventTable) -> Vec<Flagged> {
    let (run, ev) = (col(t, "runNumber"), col(t, "eventNumber"));
    let (m, d) = (col(t, IS_MATCHED), col(t, IS_DUMMY));
    (0..t.n_rows())
        .map(|i| Flagged {
            key: EventKey::new(run.i64_at(i), ev.i64_at(i)),
            matched: m.bool_at(i),
            dummy: d.bool_at(i),
        })
        .collect()
}

pub fn key(run: i64, event: i64) -> EventKey {
    EventKey::new(run, event)
}
