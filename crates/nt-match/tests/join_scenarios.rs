mod common;

use approx::assert_relative_eq;
use common::*;
use nt_core::{ChannelLabel, Error, TruthLevel};
use nt_match::{CancelToken, JoinResult, Joiner, MatchConfig, OutputTarget, Pipeline};
use nt_store::{EventStore, EventTable};

fn join(cfg: &MatchConfig, reco: &EventTable, truth: &EventTable) -> JoinResult {
    Joiner::open(cfg, TruthLevel::Parton, reco, truth, None)
        .unwrap()
        .run(&OutputTarget::Memory)
        .unwrap()
}

fn ejets(r: &JoinResult) -> (Vec<Flagged>, Vec<Flagged>) {
    let out = r.output(ChannelLabel::EJets).unwrap();
    (rows(out.reco.table()), rows(out.truth.table()))
}

#[test]
fn duplicate_key_is_excluded_everywhere() {
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E), (1, 2, Reco::E)]);
    let truth = parton(&[(1, 1, E), (1, 3, E)]);
    let r = join(&config(), &reco, &truth);

    let (reco_rows, truth_rows) = ejets(&r);
    assert_eq!(
        reco_rows,
        vec![
            Flagged { key: key(1, 1), matched: true, dummy: false },
            // Dummy pad for the truth-only (1,3): the last reco row.
            Flagged { key: key(1, 2), matched: false, dummy: true },
        ]
    );
    assert_eq!(
        truth_rows,
        vec![
            Flagged { key: key(1, 1), matched: true, dummy: false },
            Flagged { key: key(1, 3), matched: false, dummy: false },
        ]
    );

    let s = &r.summary;
    let c = s.channel(ChannelLabel::EJets);
    assert_eq!((c.matched, c.unmatched_reco, c.unmatched_truth), (1, 0, 1));
    assert_eq!(s.duplicate_keys["reco"], 1);
    assert_eq!(s.duplicate_keys["parton"], 0);
    assert_eq!(s.duplicate_skips["reco"], 2);
    assert_eq!(s.reco_rows_scanned, 3);
    assert_eq!(s.truth_rows_scanned, 2);

    let corr = r.corrections.as_ref().unwrap();
    let reco_h = corr.get("ejets", "mtt", "reco").unwrap();
    assert_eq!(reco_h.entries, 1);
    let truth_h = corr.get("ejets", "mtt", "truth").unwrap();
    assert_relative_eq!(truth_h.content(2), 4.0);
    assert_relative_eq!(corr.get("ejets", "mtt", "acceptance").unwrap().content(2), 1.0);
    assert_relative_eq!(corr.get("ejets", "mtt", "efficiency").unwrap().content(2), 0.5);
    assert_relative_eq!(corr.get("ljets", "mtt", "efficiency").unwrap().content(2), 0.5);
}

#[test]
fn indeterminate_decay_is_excluded_from_truth() {
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E)]);
    let truth = parton(&[(1, 1, E), (1, 2, ZERO)]);
    let r = join(&config(), &reco, &truth);

    assert_eq!(r.summary.skipped_count("parton", "indeterminate_decay"), 1);
    let (reco_rows, truth_rows) = ejets(&r);
    assert_eq!(reco_rows.len(), 2);
    assert!(!reco_rows[1].matched);
    // (1,2) only appears on the truth side as the dummy pad.
    assert!(truth_rows.iter().filter(|f| f.key == key(1, 2)).all(|f| f.dummy));
    for ch in ChannelLabel::CHANNELS {
        let out = r.output(ch).unwrap();
        assert!(rows(out.truth.table()).iter().all(|f| f.key != key(1, 2) || f.dummy));
    }

    let corr = r.corrections.as_ref().unwrap();
    // Only (1,1) reaches the efficiency denominator.
    assert_eq!(corr.get("ljets", "mtt", "truth").unwrap().entries, 1);
    assert_eq!(corr.get("ljets", "mtt", "reco").unwrap().entries, 2);
    assert_relative_eq!(corr.get("ljets", "mtt", "acceptance").unwrap().content(2), 0.5);
}

#[test]
fn empty_bins_have_zero_factors() {
    let reco = reco(&[(1, 1, Reco::Mu)]);
    let truth = parton(&[(1, 1, MU)]);
    let r = join(&config(), &reco, &truth);
    let corr = r.corrections.unwrap();
    for name in ["acceptance", "acceptance_noflow", "efficiency", "efficiency_noflow"] {
        let h = corr.get("mjets", "mtt", name).unwrap();
        assert_eq!(h.content(1), 0.0, "{name}");
        assert_eq!(h.sumw2[1], 0.0, "{name}");
        assert_eq!(h.content(3), 0.0, "{name}");
        assert_relative_eq!(h.content(2), 1.0);
    }
    assert!(corr.get("ejets", "mtt", "acceptance").unwrap().sumw.iter().all(|&v| v == 0.0));
}

#[test]
fn channels_are_split_and_ambiguity_tallied() {
    let reco = reco(&[
        (1, 1, Reco::E),
        (1, 2, Reco::Mu),
        (1, 3, Reco::Both),
        (1, 4, Reco::None),
        (1, 5, Reco::Mu),
    ]);
    let truth = parton(&[(1, 1, E), (1, 2, MU), (1, 3, E), (1, 4, E), (1, 5, HAD), (1, 6, TAU)]);
    let r = join(&config(), &reco, &truth);
    let s = &r.summary;
    assert_eq!(s.skipped_count("reco", "classification_ambiguity"), 1);
    // τ: accepted but has no channel.
    assert_eq!(s.skipped_count("parton", "classification_ambiguity"), 1);

    let e = s.channel(ChannelLabel::EJets);
    let m = s.channel(ChannelLabel::MuJets);
    assert_eq!((e.matched, e.unmatched_reco, e.unmatched_truth), (1, 0, 2));
    // (1,5) is all-hadronic at parton level.
    assert_eq!((m.matched, m.unmatched_reco, m.unmatched_truth), (1, 1, 0));

    let mu = r.output(ChannelLabel::MuJets).unwrap();
    let keys: Vec<_> = rows(mu.reco.table()).iter().map(|f| f.key).collect();
    assert_eq!(keys, vec![key(1, 2), key(1, 5)]);
    let truth_mu = rows(mu.truth.table());
    assert!(truth_mu[0].matched);
    assert!(truth_mu[1].dummy);
}

#[test]
fn dummies_never_matched_nor_counted() {
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E), (1, 7, Reco::Mu)]);
    let truth = parton(&[(1, 1, E), (1, 3, E), (1, 4, MU)]);
    let r = join(&config(), &reco, &truth);
    let corr = r.corrections.as_ref().unwrap();
    for ch in ChannelLabel::CHANNELS {
        let out = r.output(ch).unwrap();
        let (rr, tr) = (rows(out.reco.table()), rows(out.truth.table()));
        assert_eq!(rr.len(), tr.len(), "paired output is row-aligned");
        for f in rr.iter().chain(&tr) {
            assert!(!(f.dummy && f.matched));
        }
        let c = r.summary.channel(ch);
        let reco_real = rr.iter().filter(|f| !f.dummy).count();
        let truth_real = tr.iter().filter(|f| !f.dummy).count();
        assert_eq!(reco_real, c.matched + c.unmatched_reco);
        assert_eq!(truth_real, c.matched + c.unmatched_truth);
        assert_eq!(corr.get(ch.name(), "mtt", "reco").unwrap().entries as usize, reco_real);
        assert_eq!(corr.get(ch.name(), "mtt", "truth").unwrap().entries as usize, truth_real);
    }
}

#[test]
fn unpaired_and_unsaved_outputs() {
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E)]);
    let truth = parton(&[(1, 1, E), (1, 3, E)]);

    let cfg = MatchConfig { paired_output: false, ..config() };
    let r = join(&cfg, &reco, &truth);
    let (rr, tr) = ejets(&r);
    assert_eq!(rr.iter().map(|f| f.key).collect::<Vec<_>>(), vec![key(1, 1), key(1, 2)]);
    assert_eq!(tr.iter().map(|f| f.key).collect::<Vec<_>>(), vec![key(1, 1), key(1, 3)]);
    assert!(rr.iter().chain(&tr).all(|f| !f.dummy));

    let cfg = MatchConfig { save_unmatched_reco: false, save_unmatched_truth: false, ..config() };
    let r = join(&cfg, &reco, &truth);
    let (rr, tr) = ejets(&r);
    assert_eq!(rr.len(), 1);
    assert_eq!(tr.len(), 1);
    assert!(rr[0].matched && tr[0].matched);
    // Denominators are still complete.
    let corr = r.corrections.unwrap();
    assert_eq!(corr.get("ejets", "mtt", "reco").unwrap().entries, 2);
    assert_eq!(corr.get("ejets", "mtt", "truth").unwrap().entries, 2);
}

#[test]
fn fast_mode_pairs_each_truth_row_once() {
    let reco = reco(&[(1, 1, Reco::E), (1, 1, Reco::E)]);
    let truth = parton(&[(1, 1, E)]);
    let cfg = MatchConfig { check_duplicate: false, ..config() };
    let r = join(&cfg, &reco, &truth);
    let c = r.summary.channel(ChannelLabel::EJets);
    assert_eq!((c.matched, c.unmatched_reco, c.unmatched_truth), (1, 1, 0));
    assert!(r.summary.duplicate_skips.is_empty());
    let (_, truth_rows) = ejets(&r);
    assert_eq!(truth_rows.iter().filter(|f| !f.dummy).count(), 1);
}

#[test]
fn fast_mode_unselected_last_copy_keeps_the_pair() {
    // The reco index keeps the last copy of (1,1), which fails the selection.
    let reco = reco(&[(1, 1, Reco::E), (1, 1, Reco::None)]);
    let truth = parton(&[(1, 1, E)]);
    let cfg = MatchConfig { check_duplicate: false, ..config() };
    let r = join(&cfg, &reco, &truth);
    let c = r.summary.channel(ChannelLabel::EJets);
    assert_eq!((c.matched, c.unmatched_reco, c.unmatched_truth), (1, 0, 0));
    let (_, truth_rows) = ejets(&r);
    assert_eq!(truth_rows, vec![Flagged { key: key(1, 1), matched: true, dummy: false }]);

    let corr = r.corrections.as_ref().unwrap();
    assert_eq!(corr.get("ejets", "mtt", "truth").unwrap().entries, 1);
    assert_relative_eq!(corr.get("ejets", "mtt", "efficiency").unwrap().content(2), 1.0);
}

#[test]
fn tau_events_count_whether_reconstructed_or_not() {
    let reco = reco(&[(1, 1, Reco::E)]);
    let truth = parton(&[(1, 1, TAU), (1, 2, TAU)]);
    let r = join(&config(), &reco, &truth);
    let s = &r.summary;
    assert_eq!(s.skipped_count("parton", "classification_ambiguity"), 2);
    let c = s.channel(ChannelLabel::EJets);
    assert_eq!((c.matched, c.unmatched_reco, c.unmatched_truth), (1, 0, 0));

    let corr = r.corrections.as_ref().unwrap();
    let truth_h = corr.get("ljets", "mtt", "truth").unwrap();
    assert_eq!(truth_h.entries, 2);
    assert_relative_eq!(corr.get("ljets", "mtt", "efficiency").unwrap().content(2), 0.5);
    assert_relative_eq!(corr.get("ljets", "mtt", "acceptance").unwrap().content(2), 1.0);
    assert_eq!(corr.get("ejets", "mtt", "truth").unwrap().entries, 0);
    assert_relative_eq!(corr.get("ejets", "mtt", "acceptance").unwrap().content(2), 1.0);
}

#[test]
fn truth_side_histograms_use_the_truth_channel() {
    // Reconstructed as e+jets, generated as mu+jets.
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::Mu)]);
    let truth = parton(&[(1, 1, MU), (1, 2, MU)]);
    let r = join(&config(), &reco, &truth);
    assert_eq!(r.summary.channel(ChannelLabel::EJets).matched, 1);

    let corr = r.corrections.as_ref().unwrap();
    assert_eq!(corr.get("ejets", "mtt", "truth").unwrap().entries, 0);
    assert_eq!(corr.get("mjets", "mtt", "truth").unwrap().entries, 2);
    assert_relative_eq!(corr.get("ejets", "mtt", "acceptance").unwrap().content(2), 1.0);
    assert_relative_eq!(corr.get("mjets", "mtt", "efficiency").unwrap().content(2), 1.0);
    assert_eq!(corr.get("ejets", "mtt", "efficiency").unwrap().content(2), 0.0);
    assert_eq!(corr.get_2d("ejets", "mtt", "response").unwrap().entries, 1);
    assert_eq!(corr.get_2d("ejets", "mtt", "response_mcweight").unwrap().entries, 0);
    assert_eq!(corr.get_2d("mjets", "mtt", "response_mcweight").unwrap().entries, 2);
}

#[test]
fn max_rows_bounds_both_scans() {
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E), (1, 3, Reco::E)]);
    let truth = parton(&[(1, 3, E), (1, 2, E), (1, 1, E)]);
    let cfg = MatchConfig { max_rows: Some(2), ..config() };
    let r = join(&cfg, &reco, &truth);
    assert_eq!(r.summary.reco_rows_scanned, 2);
    assert_eq!(r.summary.truth_rows_scanned, 2);
    let c = r.summary.channel(ChannelLabel::EJets);
    assert_eq!(c.matched, 2);
    // (1,3) was never reached by the forward scan.
    assert_eq!(c.unmatched_truth, 1);
}

#[test]
fn upstream_flag_disagreement_is_counted() {
    let mut cfg = config();
    cfg.upstream_truth_flag = Some("isTruthSemileptonic".into());
    let reco = reco(&[(1, 1, Reco::E), (1, 2, Reco::E)]);
    // The reco fixture has the flag set everywhere; (1,2) is all-hadronic.
    let truth = parton(&[(1, 1, E), (1, 2, HAD)]);
    let r = join(&cfg, &reco, &truth);
    assert_eq!(r.summary.upstream_flag_disagreements, 1);
    assert_eq!(r.summary.channel(ChannelLabel::EJets).unmatched_reco, 1);
}

#[test]
fn cancelled_pass_flushes_and_reports() {
    let reco = reco(&[(1, 1, Reco::E)]);
    let truth = parton(&[(1, 1, E)]);
    let cfg = config();
    let token = CancelToken::new();
    token.cancel();
    let r = Joiner::open(&cfg, TruthLevel::Parton, &reco, &truth, None)
        .unwrap()
        .with_cancel(token)
        .run(&OutputTarget::Memory)
        .unwrap();
    assert!(r.summary.cancelled);
    assert_eq!(r.summary.reco_rows_scanned, 0);
    assert_eq!(r.summary.truth_rows_scanned, 0);
    assert!(r.outputs.iter().all(|o| o.reco.table().n_rows() == 0));
}

#[test]
fn reruns_are_identical() {
    let reco = reco(&[(1, 1, Reco::E), (2, 5, Reco::Mu), (1, 2, Reco::E), (1, 2, Reco::Mu)]);
    let truth = parton(&[(2, 5, MU), (1, 1, E), (3, 3, E), (1, 9, TAU)]);
    let cfg = MatchConfig { max_rows: Some(3), ..config() };
    let a = join(&cfg, &reco, &truth);
    let b = join(&cfg, &reco, &truth);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.corrections, b.corrections);
    for ch in ChannelLabel::CHANNELS {
        let (oa, ob) = (a.output(ch).unwrap(), b.output(ch).unwrap());
        assert_eq!(rows(oa.reco.table()), rows(ob.reco.table()));
        assert_eq!(rows(oa.truth.table()), rows(ob.truth.table()));
    }
}

#[test]
fn empty_truth_index_abandons_only_that_pass() {
    let reco = reco(&[(1, 1, Reco::E)]);
    let dup_truth = parton(&[(1, 1, E), (1, 1, E)]);
    let cfg = config();
    let err = Joiner::open(&cfg, TruthLevel::Parton, &reco, &dup_truth, None)
        .unwrap()
        .run(&OutputTarget::Memory)
        .unwrap_err();
    assert!(matches!(err, Error::IndexBuild { .. }));

    let reports = Pipeline::new(&cfg, &reco)
        .with_truth(TruthLevel::Parton, &dup_truth)
        .run(&OutputTarget::Memory)
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_err());
}

#[test]
fn schema_mismatch_at_open() {
    let reco = reco(&[(1, 1, Reco::E)]);
    let truth = parton(&[(1, 1, E)]);
    let cfg = MatchConfig { event_field: "eventNo".into(), ..config() };
    let err = Joiner::open(&cfg, TruthLevel::Parton, &reco, &truth, None).err().unwrap();
    assert!(matches!(err, Error::SchemaMismatch(_)));

    // Particle selection fields are absent from a parton stream.
    let err = Joiner::open(&config(), TruthLevel::Particle, &reco, &truth, None).err().unwrap();
    assert!(matches!(err, Error::SchemaMismatch(_)));
}

#[test]
fn empty_reco_stream_disables_reco_dummies() {
    let reco = reco(&[]);
    let truth = parton(&[(1, 1, E)]);
    let r = join(&config(), &reco, &truth);
    let (rr, tr) = ejets(&r);
    assert!(rr.is_empty());
    assert_eq!(tr.len(), 1);
    assert_eq!(reco.n_rows(), 0);
}
