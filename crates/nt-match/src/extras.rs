//! Derived per-row columns: normalized event weight and ttbar kinematics.

use std::f64::consts::PI;
use std::sync::Arc;

use nt_core::{Error, RecoAlgo, Result, StreamLevel, TruthLevel};
use nt_store::{Field, FieldHandle, FieldType, Record, Schema, Value};

use crate::sum_weights::SumWeights;

/// Field prefixes of the hadronic top, leptonic top and ttbar system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopPrefixes {
    /// Hadronically decaying top.
    pub thad: &'static str,
    /// Leptonically decaying top.
    pub tlep: &'static str,
    /// ttbar system.
    pub ttbar: &'static str,
}

impl TopPrefixes {
    /// Reco-level prefixes of `algo`.
    pub fn reco(algo: RecoAlgo) -> Self {
        match algo {
            RecoAlgo::KLFitter => Self {
                thad: "klfitter_bestPerm_topHad",
                tlep: "klfitter_bestPerm_topLep",
                ttbar: "klfitter_bestPerm_ttbar",
            },
            RecoAlgo::PseudoTop => Self {
                thad: "PseudoTop_Reco_top_had",
                tlep: "PseudoTop_Reco_top_lep",
                ttbar: "PseudoTop_Reco_ttbar",
            },
        }
    }

    /// Truth-level prefixes of `level`.
    pub fn truth(level: TruthLevel) -> Self {
        match level {
            TruthLevel::Parton => Self {
                thad: "MC_thad_afterFSR",
                tlep: "MC_tlep_afterFSR",
                ttbar: "MC_ttbar_afterFSR",
            },
            TruthLevel::Particle => Self {
                thad: "PseudoTop_Particle_top_had",
                tlep: "PseudoTop_Particle_top_lep",
                ttbar: "PseudoTop_Particle_ttbar",
            },
        }
    }
}

/// Extra column values of one output row, in [`ExtraSpec::fields`] order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraValues(Vec<Value>);

impl ExtraValues {
    /// Values in column order.
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Take the values.
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct P4 {
    pt: FieldHandle,
    eta: FieldHandle,
    phi: FieldHandle,
    m: FieldHandle,
    y: FieldHandle,
}

impl P4 {
    fn resolve(schema: &Schema, prefix: &str) -> Option<Self> {
        let h = |v: &str| FieldHandle::optional(schema, &format!("{prefix}_{v}"));
        Some(Self { pt: h("pt")?, eta: h("eta")?, phi: h("phi")?, m: h("m")?, y: h("y")? })
    }

    fn momentum(&self, rec: &Record<'_>) -> [f64; 3] {
        let (pt, eta, phi) = (rec.f64(self.pt), rec.f64(self.eta), rec.f64(self.phi));
        [pt * phi.cos(), pt * phi.sin(), pt * eta.sinh()]
    }
}

#[derive(Debug, Clone, Copy)]
enum Derived {
    Energy(P4),
    Pout { along: P4, of: P4 },
    DeltaPhi(P4, P4),
    Ht(P4, P4),
    YStar(P4, P4),
    YBoost(P4, P4),
    Chi(P4, P4),
}

impl Derived {
    fn eval(&self, rec: &Record<'_>) -> f64 {
        match *self {
            Derived::Energy(p) => energy(rec.f64(p.pt), rec.f64(p.eta), rec.f64(p.m)),
            Derived::Pout { along, of } => pout(along.momentum(rec), of.momentum(rec)),
            Derived::DeltaPhi(h, l) => delta_phi(rec.f64(h.phi), rec.f64(l.phi)).abs(),
            Derived::Ht(h, l) => rec.f64(h.pt) + rec.f64(l.pt),
            Derived::YStar(h, l) => (rec.f64(h.y) - rec.f64(l.y)) / 2.0,
            Derived::YBoost(h, l) => (rec.f64(h.y) + rec.f64(l.y)) / 2.0,
            Derived::Chi(h, l) => (rec.f64(h.y) - rec.f64(l.y)).abs().exp(),
        }
    }
}

/// Energy from `pt`, `eta` and mass.
pub fn energy(pt: f64, eta: f64, m: f64) -> f64 {
    let p = pt * eta.cosh();
    (p * p + m * m).sqrt()
}

/// Momentum of `of` out of the plane spanned by `along` and the beam axis.
pub fn pout(along: [f64; 3], of: [f64; 3]) -> f64 {
    let norm = (along[0] * along[0] + along[1] * along[1] + along[2] * along[2]).sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    (along[1] * of[0] - along[0] * of[1]) / norm
}

/// `a - b` wrapped into `[-π, π]`.
pub fn delta_phi(a: f64, b: f64) -> f64 {
    let mut d = (a - b) % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d < -PI {
        d += 2.0 * PI;
    }
    d
}

#[derive(Debug, Clone)]
enum Normalization {
    /// No sum-of-weights table: the raw weight is kept.
    Raw,
    Table {
        dsid: FieldHandle,
        run: FieldHandle,
        xs_times_lumi: Option<FieldHandle>,
        fake_weight: Option<FieldHandle>,
        table: Arc<SumWeights>,
    },
}

/// Extra output columns of one stream, resolved at open time.
#[derive(Debug, Clone)]
pub struct ExtraSpec {
    fields: Vec<Field>,
    weight: Option<FieldHandle>,
    normalization: Normalization,
    derived: Vec<Derived>,
}

impl ExtraSpec {
    /// Resolve the extras for a stream of `level`.
    ///
    /// Energies are added for reco and particle level only. Columns whose
    /// name already exists in `schema` are not recomputed; kinematic blocks
    /// with missing fields are skipped with a warning.
    pub fn new(
        schema: &Schema,
        level: StreamLevel,
        prefixes: TopPrefixes,
        weight_field: &str,
        run_field: &str,
        sum_weights: Option<Arc<SumWeights>>,
    ) -> Result<Self> {
        let weight = FieldHandle::optional(schema, weight_field);
        if weight.is_none() {
            tracing::warn!(field = weight_field, level = level.name(), "weight field missing, using 1");
        }
        let weight_col = match level {
            StreamLevel::Reco => "normalized_weight",
            StreamLevel::Truth(_) => "normalized_weight_mc",
        };

        let mut fields = Vec::new();
        let mut derived = Vec::new();

        let normalization = match sum_weights {
            Some(table) => {
                let dsid = FieldHandle::scalar(schema, "mcChannelNumber").map_err(|e| {
                    Error::SchemaMismatch(format!("{} stream: {e}", level.name()))
                })?;
                let run = FieldHandle::scalar(schema, run_field)?;
                fields.push(Field::new(weight_col, FieldType::Float));
                fields.push(Field::new("sum_weights", FieldType::Float));
                Normalization::Table {
                    dsid,
                    run,
                    xs_times_lumi: FieldHandle::optional(schema, "xs_times_lumi"),
                    fake_weight: FieldHandle::lookup(schema, "ASM_weight").ok(),
                    table,
                }
            }
            None => {
                fields.push(Field::new(weight_col, FieldType::Float));
                Normalization::Raw
            }
        };

        let compute_energy = level != StreamLevel::Truth(TruthLevel::Parton);
        let mut add = |name: String, d: Derived, fields: &mut Vec<Field>| {
            if schema.contains(&name) {
                tracing::debug!(column = %name, "extra column already in input, not recomputed");
                return;
            }
            fields.push(Field::new(name, FieldType::Float));
            derived.push(d);
        };

        let block = |prefix: &str| {
            let p4 = P4::resolve(schema, prefix);
            if p4.is_none() {
                tracing::warn!(prefix, level = level.name(), "kinematic fields missing, extras skipped");
            }
            p4
        };
        let (thad, tlep, ttbar) =
            (block(prefixes.thad), block(prefixes.tlep), block(prefixes.ttbar));

        if compute_energy {
            for (prefix, p4) in [(prefixes.thad, thad), (prefixes.tlep, tlep), (prefixes.ttbar, ttbar)] {
                if let Some(p) = p4 {
                    add(format!("{prefix}_E"), Derived::Energy(p), &mut fields);
                }
            }
        }
        if let (Some(h), Some(l)) = (thad, tlep) {
            let t = prefixes.ttbar;
            add(format!("{}_pout", prefixes.thad), Derived::Pout { along: l, of: h }, &mut fields);
            add(format!("{}_pout", prefixes.tlep), Derived::Pout { along: h, of: l }, &mut fields);
            add(format!("{t}_dphi"), Derived::DeltaPhi(h, l), &mut fields);
            add(format!("{t}_Ht"), Derived::Ht(h, l), &mut fields);
            add(format!("{t}_ystar"), Derived::YStar(h, l), &mut fields);
            add(format!("{t}_yboost"), Derived::YBoost(h, l), &mut fields);
            add(format!("{t}_chi"), Derived::Chi(h, l), &mut fields);
        }

        Ok(Self { fields, weight, normalization, derived })
    }

    /// Extra columns, in value order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Raw event weight (`1` when the weight field is missing).
    pub fn weight(&self, rec: &Record<'_>) -> f64 {
        self.weight.map_or(1.0, |h| rec.f64(h))
    }

    /// Compute every extra column of `rec`.
    ///
    /// Fails if the sample or campaign of an MC row has no sum of weights.
    pub fn compute(&self, rec: &Record<'_>) -> Result<ExtraValues> {
        let mut out = Vec::with_capacity(self.fields.len());
        let w = self.weight(rec);
        match &self.normalization {
            Normalization::Raw => out.push(Value::Float(w)),
            Normalization::Table { dsid, run, xs_times_lumi, fake_weight, table } => {
                let dsid = rec.i64(*dsid);
                if dsid < 1 {
                    // Data, or data-driven fakes.
                    let fw = fake_weight.map_or(1.0, |h| match rec.value(h) {
                        Value::FloatList(v) => v.first().copied().unwrap_or(1.0),
                        v => v.as_f64().unwrap_or(1.0),
                    });
                    out.push(Value::Float(fw));
                    out.push(Value::Float(-1.0));
                } else {
                    let sw = table.get(dsid, rec.i64(*run))?;
                    let xs = xs_times_lumi.map_or(1.0, |h| rec.f64(h));
                    out.push(Value::Float(w * xs / sw));
                    out.push(Value::Float(sw));
                }
            }
        }
        out.extend(self.derived.iter().map(|d| Value::Float(d.eval(rec))));
        Ok(ExtraValues(out))
    }
}
