use serde_json::Value;
use ssgd_rs::analysis::{AnalysisConfig, SsgdAnalysis};
use ssgd_rs::bootstrap::{
    BootstrapConfig, default_bootstrap_path, new_rng, run_bootstrap, summarize_replicates,
    write_bootstrap_summary_json, write_replicates_tsv,
};
use ssgd_rs::simulate::{PatternSimulator, simulate_genealogy};
use ssgd_rs::site_rates::SiteRates;
use ssgd_rs::taxa::TaxonList;
use ssgd_rs::{HkyModel, PairwiseCompositeLikelihood, SitePatterns, Skyline};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn taxa() -> TaxonList {
    TaxonList::from_pairs([("t0", 0.0), ("t1", 0.0), ("t2", 200.0), ("t3", 1000.0)])
        .expect("valid taxa")
}

fn simulator(loci: usize, length: usize) -> PatternSimulator {
    PatternSimulator {
        taxa: taxa(),
        demography: Skyline::constant(1000.0).expect("valid skyline"),
        hky: HkyModel::new(2.0, [0.3, 0.2, 0.2, 0.3]).expect("valid hky"),
        site_rates: SiteRates::homogeneous(),
        mu: 1e-3,
        locus_length: length,
        locus_count: loci,
    }
}

fn analysis_for(sites: &[SitePatterns], config: AnalysisConfig) -> SsgdAnalysis {
    let likelihoods = sites
        .iter()
        .map(|s| {
            PairwiseCompositeLikelihood::new(
                s.to_paired().expect("paired"),
                HkyModel::new(1.0, [0.3, 0.2, 0.2, 0.3]).expect("valid hky"),
                Skyline::constant(300.0).expect("valid skyline"),
                SiteRates::homogeneous(),
                1e-3,
            )
            .expect("likelihood")
        })
        .collect();
    SsgdAnalysis::new(likelihoods, config).expect("analysis")
}

#[test]
fn genealogy_spans_every_sample() {
    let sky = Skyline::new(vec![500.0, 50.0], vec![100.0]).expect("valid skyline");
    let mut rng = new_rng(7);
    for _ in 0..20 {
        let tree = simulate_genealogy(&taxa(), &sky, &mut rng).expect("genealogy");
        assert_eq!(tree.node_count(), 7);
        assert!(tree.root_height() > 1000.0);
    }
    let single = TaxonList::from_pairs([("only", 0.0)]).expect("valid taxa");
    assert!(simulate_genealogy(&single, &sky, &mut rng).is_err());
}

#[test]
fn simulator_is_reproducible_and_sized() {
    let sim = simulator(4, 50);
    let loci = sim.simulate_loci(&mut new_rng(3)).expect("simulation");
    assert_eq!(loci.len(), 4);
    for alignment in &loci {
        assert_eq!(alignment.len(), 4);
        assert!(alignment.iter().all(|seq| seq.len() == 50));
        assert!(alignment.iter().flatten().all(|s| *s < 4));
    }
    let again = sim.simulate_loci(&mut new_rng(3)).expect("simulation");
    assert_eq!(loci, again);

    let sites = sim.simulate(&mut new_rng(3)).expect("simulation");
    assert!((sites.site_count() - 200.0).abs() < 1e-12);
}

#[test]
fn fit_improves_the_composite_likelihood() {
    let sites = vec![simulator(20, 200).simulate(&mut new_rng(5)).expect("simulation")];
    let mut analysis = analysis_for(&sites, AnalysisConfig::default());
    assert_eq!(analysis.parameter_names(), vec!["kappa", "N_0"]);

    let start = analysis.log_likelihood();
    let fit = analysis.run().expect("fit");
    assert!(fit.log_likelihood.is_finite());
    assert!(fit.log_likelihood >= start, "{} < {start}", fit.log_likelihood);
    assert!(fit.evaluations > 0);
    assert_eq!(fit.sizes.len(), 1);
    let config = analysis.config();
    assert!(fit.kappa >= config.kappa_bounds.lo && fit.kappa <= config.kappa_bounds.hi);
    assert_eq!(fit.params(true), vec![fit.kappa, fit.sizes[0]]);
    assert_eq!(analysis.current_params(), fit.params(true));
}

#[test]
fn fixed_kappa_is_left_alone() {
    let sites = vec![simulator(5, 100).simulate(&mut new_rng(9)).expect("simulation")];
    let config = AnalysisConfig {
        fit_kappa: false,
        ..AnalysisConfig::default()
    };
    let mut analysis = analysis_for(&sites, config);
    assert_eq!(analysis.parameter_names(), vec!["N_0"]);
    let fit = analysis.run().expect("fit");
    assert_eq!(fit.kappa, 1.0);
    assert!(analysis.apply_params(&[1.0, 2.0]).is_err());
}

#[test]
fn bootstrap_records_and_summaries() {
    let sim = simulator(5, 100);
    let mut rng = new_rng(21);
    let sites = vec![
        sim.simulate(&mut rng).expect("simulation"),
        sim.simulate(&mut rng).expect("simulation"),
    ];
    let mut config = AnalysisConfig::default();
    config.lbfgs.max_iters = 5;
    let mut analysis = analysis_for(&sites, config);
    let initial = analysis.current_params();
    let names = analysis.parameter_names();

    let bs = BootstrapConfig {
        replicates: 3,
        seed: 99,
        rescale: true,
    };
    let mut seen = Vec::new();
    let records = run_bootstrap(&mut analysis, &sites, &bs, |r| seen.push(r.replicate))
        .expect("bootstrap");
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.params.len() == initial.len()));

    let summary = summarize_replicates(&records, &names, 99).expect("summary");
    assert_eq!(summary.n_replicates, 3);
    for p in &summary.parameters {
        assert!(p.q025 <= p.q500 && p.q500 <= p.q975);
    }

    let tsv = unique_temp_path("ssgd_bootstrap", "tsv");
    write_replicates_tsv(&tsv, &names, &records).expect("write tsv");
    let text = fs::read_to_string(&tsv).expect("read tsv");
    assert!(text.starts_with("replicate\tlog_likelihood\tkappa\tN_0\n"));
    assert_eq!(text.lines().count(), 5);

    let json = tsv.with_extension("json");
    write_bootstrap_summary_json(&json, &summary).expect("write summary");
    let v: Value = serde_json::from_str(&fs::read_to_string(&json).expect("read summary"))
        .expect("summary json is invalid");
    assert_eq!(v["n_replicates"], 3);
    assert_eq!(v["parameters"][1]["name"], "N_0");

    assert!(run_bootstrap(&mut analysis, &sites[..1], &bs, |_| {}).is_err());
    assert!(summarize_replicates(&records[..1], &names, 99).is_err());

    let _ = fs::remove_file(tsv);
    let _ = fs::remove_file(json);
}

#[test]
fn bootstrap_path_sits_next_to_output() {
    assert_eq!(
        default_bootstrap_path(Path::new("out/fit.json")),
        PathBuf::from("out/fit.bootstrap.tsv")
    );
}
