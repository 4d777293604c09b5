use ssgd_rs::error_model::{ErrorType, SequenceErrorModel};
use ssgd_rs::nucleotide::{A_STATE, AMBIGUOUS, C_STATE, G_STATE, T_STATE};
use ssgd_rs::site_rates::SiteRates;
use ssgd_rs::taxa::TaxonList;
use ssgd_rs::{HkyModel, HkySkylineIntegrator, PairedPatterns, PairwiseCompositeLikelihood, Skyline};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn two_taxa() -> TaxonList {
    TaxonList::from_pairs([("recent", 0.0), ("old", 300.0)]).expect("valid taxa")
}

fn hky() -> HkyModel {
    HkyModel::new(2.0, [0.3, 0.2, 0.2, 0.3]).expect("valid hky")
}

fn skyline() -> Skyline {
    Skyline::new(vec![1000.0, 400.0], vec![500.0]).expect("valid skyline")
}

fn sample_patterns() -> PairedPatterns {
    let mut table = PairedPatterns::new(two_taxa()).expect("table");
    table
        .add_pattern(0, A_STATE, 1, A_STATE, 5.0)
        .expect("add");
    table
        .add_pattern(0, A_STATE, 1, G_STATE, 2.0)
        .expect("add");
    table
        .add_pattern(0, C_STATE, 1, T_STATE, 1.0)
        .expect("add");
    table
        .add_pattern(0, A_STATE, 1, AMBIGUOUS, 1.0)
        .expect("add");
    table
}

#[test]
fn log_likelihood_matches_direct_sum() {
    let mu = 1e-3;
    let mut l = PairwiseCompositeLikelihood::new(
        sample_patterns(),
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        mu,
    )
    .expect("likelihood");
    let got = l.log_likelihood();
    assert!(got.is_finite());

    let mut integrator = HkySkylineIntegrator::new(hky(), skyline());
    let mut joint = |i: u8, j: u8| integrator.joint_probability(i, 0.0, j, 300.0, mu);
    let want = 5.0 * joint(A_STATE, A_STATE).ln()
        + 2.0 * joint(A_STATE, G_STATE).ln()
        + 1.0 * joint(C_STATE, T_STATE).ln()
        // An ambiguous partner marginalises to the stationary frequency.
        + 1.0 * 0.3f64.ln();
    approx_eq(got, want, 1e-9);
}

#[test]
fn invariant_category_adds_identity_term() {
    let mu = 1e-3;
    let p_inv = 0.25;
    let rates = SiteRates::discrete_gamma(1.0, 1, p_inv).expect("rates");
    let mut table = PairedPatterns::new(two_taxa()).expect("table");
    table
        .add_pattern(0, A_STATE, 1, A_STATE, 1.0)
        .expect("add");
    let mut l = PairwiseCompositeLikelihood::new(table, hky(), skyline(), rates, mu)
        .expect("likelihood");

    let mut integrator = HkySkylineIntegrator::new(hky(), skyline());
    let variable = integrator.joint_probability(A_STATE, 0.0, A_STATE, 300.0, mu / (1.0 - p_inv));
    let want = ((1.0 - p_inv) * variable + p_inv * 0.3).ln();
    approx_eq(l.log_likelihood(), want, 1e-12);
}

#[test]
fn zero_probability_pattern_gives_negative_infinity() {
    // With a vanishing rate no transversion can happen.
    let mu = 1e-300;
    let mut same = PairedPatterns::new(two_taxa()).expect("table");
    same.add_pattern(0, G_STATE, 1, G_STATE, 3.0).expect("add");
    let mut l = PairwiseCompositeLikelihood::new(
        same.clone(),
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        mu,
    )
    .expect("likelihood");
    assert!(l.log_likelihood().is_finite());

    let mut different = same;
    different
        .add_pattern(0, A_STATE, 1, C_STATE, 1.0)
        .expect("add");
    l.set_patterns(different).expect("same taxa");
    let value = l.log_likelihood();
    assert!(
        value.is_infinite() && value < 0.0,
        "expected -inf, got {value}"
    );
}

#[test]
fn zero_weight_patterns_are_ignored() {
    let mut table = PairedPatterns::new(two_taxa()).expect("table");
    table
        .add_pattern(0, T_STATE, 1, T_STATE, 0.0)
        .expect("add");
    let mut l = PairwiseCompositeLikelihood::new(
        table,
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        1e-3,
    )
    .expect("likelihood");
    approx_eq(l.log_likelihood(), 0.0, 0.0);
    assert_eq!(l.integrator().cached_len(), 0);
}

#[test]
fn setters_control_the_memo() {
    let mut l = PairwiseCompositeLikelihood::new(
        sample_patterns(),
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        1e-3,
    )
    .expect("likelihood");
    let before = l.log_likelihood();
    let cached = l.integrator().cached_len();
    assert!(cached > 0);

    l.set_patterns(sample_patterns()).expect("same taxa");
    assert_eq!(l.integrator().cached_len(), cached);
    approx_eq(l.log_likelihood(), before, 0.0);

    l.set_sizes(&[2000.0, 400.0]).expect("sizes");
    assert_eq!(l.integrator().cached_len(), 0);
    let after = l.log_likelihood();
    assert!((after - before).abs() > 1e-9);

    l.set_mu(2e-3).expect("mu");
    assert_eq!(l.integrator().cached_len(), 0);
    assert!(l.set_mu(0.0).is_err());

    let other = TaxonList::from_pairs([("x", 0.0), ("y", 1.0)]).expect("taxa");
    let foreign = PairedPatterns::new(other).expect("table");
    assert!(l.set_patterns(foreign).is_err());
}

#[test]
fn model_replacements_clear_the_memo() {
    let mut l = PairwiseCompositeLikelihood::new(
        sample_patterns(),
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        1e-3,
    )
    .expect("likelihood");
    let before = l.log_likelihood();
    assert!(l.integrator().cached_len() > 0);

    l.set_hky(HkyModel::new(2.0, [0.1, 0.4, 0.4, 0.1]).expect("valid hky"));
    assert_eq!(l.integrator().cached_len(), 0);
    let skewed = l.log_likelihood();
    assert!((skewed - before).abs() > 1e-9);
    l.set_hky(hky());
    assert_eq!(l.integrator().cached_len(), 0);
    assert_eq!(l.log_likelihood().to_bits(), before.to_bits());

    l.set_demography(Skyline::constant(700.0).expect("valid skyline"));
    assert_eq!(l.integrator().cached_len(), 0);
    assert!((l.log_likelihood() - before).abs() > 1e-9);
    l.set_demography(skyline());
    assert_eq!(l.integrator().cached_len(), 0);
    assert_eq!(l.log_likelihood().to_bits(), before.to_bits());

    assert!(l.integrator().cached_len() > 0);
    l.set_site_rates(SiteRates::discrete_gamma(0.5, 4, 0.0).expect("rates"));
    assert_eq!(l.integrator().cached_len(), 0);
    assert!((l.log_likelihood() - before).abs() > 1e-9);
    l.set_site_rates(SiteRates::homogeneous());
    assert_eq!(l.integrator().cached_len(), 0);
    assert_eq!(l.log_likelihood().to_bits(), before.to_bits());
}

#[test]
fn error_model_spreads_tip_mass() {
    let mu = 1e-3;
    let mut table = PairedPatterns::new(two_taxa()).expect("table");
    table
        .add_pattern(0, A_STATE, 1, A_STATE, 1.0)
        .expect("add");
    let mut l = PairwiseCompositeLikelihood::new(
        table,
        hky(),
        skyline(),
        SiteRates::homogeneous(),
        mu,
    )
    .expect("likelihood");
    let exact = l.log_likelihood();

    let model = SequenceErrorModel::new(2, ErrorType::TransitionsOnly, Some(vec![0.1]), None)
        .expect("error model");
    l.set_error_model(Some(model)).expect("matching taxa");
    let damaged = l.log_likelihood();

    let mut integrator = HkySkylineIntegrator::new(hky(), skyline());
    let tip = [0.9, 0.0, 0.1, 0.0];
    let mut p = 0.0;
    for x in 0..4u8 {
        for y in 0..4u8 {
            p += tip[x as usize]
                * tip[y as usize]
                * integrator.joint_probability(x, 0.0, y, 300.0, mu);
        }
    }
    approx_eq(damaged, p.ln(), 1e-12);
    assert!((damaged - exact).abs() > 1e-6);

    let wrong = SequenceErrorModel::new(3, ErrorType::AllSubstitutions, Some(vec![0.1]), None)
        .expect("error model");
    assert!(l.set_error_model(Some(wrong)).is_err());
}
