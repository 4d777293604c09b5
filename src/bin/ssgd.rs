use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;

use ssgd_rs::analysis::{AnalysisConfig, SsgdAnalysis};
use ssgd_rs::bootstrap::{
    BootstrapConfig, default_bootstrap_path, new_rng, run_bootstrap, summarize_replicates,
    write_bootstrap_summary_json, write_replicates_tsv,
};
use ssgd_rs::error_model::{ErrorType, SequenceErrorModel};
use ssgd_rs::io::lambert::{read_lambert, write_lambert};
use ssgd_rs::io::params::{SsgdParamsFile, load_params, save_params};
use ssgd_rs::io::taxa::read_taxa;
use ssgd_rs::opt::Bounds;
use ssgd_rs::patterns::{PairedPatterns, SitePatterns, rescale_all};
use ssgd_rs::progress;
use ssgd_rs::simulate::PatternSimulator;
use ssgd_rs::site_rates::SiteRates;
use ssgd_rs::{HkyModel, PairwiseCompositeLikelihood, Skyline};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ErrorKind {
    All,
    Transitions,
}

#[derive(Parser, Debug)]
#[command(name = "ssgd")]
#[command(about = "Skyline demography from serially sampled sequences", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    threads: Option<usize>,
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a skyline (and kappa) by maximum pairwise composite likelihood
    Fit(FitArgs),
    /// Simulate Lambert-format loci under a skyline and HKY
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct FitArgs {
    taxa: PathBuf,
    output_file: PathBuf,
    /// Lambert pattern files; each becomes its own likelihood term
    #[arg(required = true)]
    patterns: Vec<PathBuf>,
    /// Starting parameters; command-line values take precedence
    #[arg(long)]
    init: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    epochs: usize,
    #[arg(long, default_value_t = 1000.0)]
    epoch_width: f64,
    /// Explicit epoch durations (one fewer than the number of epochs)
    #[arg(long, value_delimiter = ',')]
    durations: Option<Vec<f64>>,
    #[arg(long, default_value_t = 1000.0)]
    initial_size: f64,
    #[arg(long)]
    kappa: Option<f64>,
    #[arg(long)]
    fix_kappa: bool,
    /// Base frequencies A,C,G,T; estimated from the patterns when omitted
    #[arg(long, value_delimiter = ',')]
    frequencies: Option<Vec<f64>>,
    #[arg(long)]
    mu: Option<f64>,
    #[arg(long)]
    gamma_shape: Option<f64>,
    #[arg(long, default_value_t = 4)]
    gamma_categories: usize,
    #[arg(long)]
    p_invariant: Option<f64>,
    #[arg(long, help = "Scale all pattern weights to a total of one")]
    rescale: bool,
    #[arg(long, default_value_t = 1.0)]
    min_size: f64,
    #[arg(long, default_value_t = 1e8)]
    max_size: f64,
    #[arg(long, default_value_t = 200, help = "L-BFGS iterations; 0 only evaluates")]
    max_iters: usize,
    /// Base sequencing error rate, one value or one per taxon
    #[arg(long, value_delimiter = ',')]
    error_rate: Option<Vec<f64>>,
    #[arg(long)]
    error_age_rate: Option<f64>,
    #[arg(long, value_enum, default_value_t = ErrorKind::All)]
    error_type: ErrorKind,
    #[arg(long, value_delimiter = ',')]
    error_exclude: Vec<String>,
    #[arg(long, default_value_t = 0)]
    bootstrap: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, help = "Per-replicate TSV (default: <output>.bootstrap.tsv)")]
    bootstrap_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    taxa: PathBuf,
    output_file: PathBuf,
    #[arg(long, value_delimiter = ',', default_value = "1000")]
    sizes: Vec<f64>,
    #[arg(long, value_delimiter = ',')]
    durations: Vec<f64>,
    #[arg(long, default_value_t = 2.0)]
    kappa: f64,
    #[arg(long, value_delimiter = ',', default_value = "0.25,0.25,0.25,0.25")]
    frequencies: Vec<f64>,
    #[arg(long, default_value_t = 1e-3)]
    mu: f64,
    #[arg(long)]
    gamma_shape: Option<f64>,
    #[arg(long, default_value_t = 4)]
    gamma_categories: usize,
    #[arg(long, default_value_t = 0.0)]
    p_invariant: f64,
    #[arg(long, default_value_t = 10)]
    loci: usize,
    #[arg(long, default_value_t = 1000)]
    length: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Some(n_threads) = cli.threads {
        if n_threads == 0 {
            bail!("--threads must be >= 1");
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| anyhow!("failed to configure Rayon global thread pool: {e}"))?;
    }
    match cli.command {
        Command::Fit(args) => fit(args, !cli.no_progress),
        Command::Simulate(args) => simulate(args),
    }
}

fn to_frequencies(values: &[f64]) -> Result<[f64; 4]> {
    <[f64; 4]>::try_from(values)
        .map_err(|_| anyhow!("expected 4 base frequencies, got {}", values.len()))
}

fn site_rates(shape: Option<f64>, categories: usize, p_invariant: f64) -> Result<SiteRates> {
    match shape {
        Some(shape) => SiteRates::discrete_gamma(shape, categories, p_invariant),
        None if p_invariant > 0.0 => SiteRates::invariant(p_invariant),
        None => Ok(SiteRates::homogeneous()),
    }
}

fn pooled_frequencies(tables: &[PairedPatterns]) -> Result<[f64; 4]> {
    let mut freqs = [0.0; 4];
    let mut total = 0.0;
    for t in tables {
        let w = t.total_weight();
        for (f, p) in freqs.iter_mut().zip(t.approximate_frequencies()) {
            *f += w * p;
        }
        total += w;
    }
    if total <= 0.0 {
        bail!("pattern tables are empty, cannot estimate base frequencies");
    }
    for f in freqs.iter_mut() {
        *f /= total;
    }
    if freqs.iter().any(|f| *f <= 0.0) {
        bail!(
            "base frequencies estimated from patterns contain a zero ({freqs:?}); pass --frequencies"
        );
    }
    Ok(freqs)
}

fn fit(cli: FitArgs, show_progress: bool) -> Result<()> {
    if cli.bootstrap > 0 && cli.max_iters == 0 {
        bail!("--bootstrap needs optimisation, it cannot be combined with --max-iters 0");
    }
    let taxa = read_taxa(&cli.taxa)?;
    info!("{} taxa loaded from {:?}", taxa.len(), cli.taxa);

    let pb = progress::maybe(progress::spinner("IO", "Reading patterns"), show_progress);
    let sites = cli
        .patterns
        .iter()
        .map(|p| read_lambert(p, &taxa))
        .collect::<Result<Vec<SitePatterns>>>()
        .context("failed to read pattern input")?;
    pb.finish_with_message("Reading patterns done");
    let mut paired = sites
        .iter()
        .map(SitePatterns::to_paired)
        .collect::<Result<Vec<_>>>()?;
    if cli.rescale {
        rescale_all(&mut paired)?;
    }

    let init = cli.init.as_deref().map(load_params).transpose()?;
    let kappa = cli
        .kappa
        .or(init.as_ref().map(|p| p.kappa))
        .unwrap_or(2.0);
    let frequencies = match (&cli.frequencies, &init) {
        (Some(f), _) => to_frequencies(f)?,
        (None, Some(p)) => p.frequencies,
        (None, None) => pooled_frequencies(&paired)?,
    };
    let mu = cli.mu.or(init.as_ref().map(|p| p.mu)).unwrap_or(1e-3);
    let gamma_shape = cli.gamma_shape.or(init.as_ref().and_then(|p| p.gamma_shape));
    let p_invariant = cli
        .p_invariant
        .or(init.as_ref().map(|p| p.p_invariant))
        .unwrap_or(0.0);

    let durations = match (&cli.durations, &init) {
        (Some(d), _) => d.clone(),
        (None, Some(p)) => p.durations.clone(),
        (None, None) => {
            if cli.epochs == 0 {
                bail!("--epochs must be >= 1");
            }
            vec![cli.epoch_width; cli.epochs - 1]
        }
    };
    let sizes = match &init {
        Some(p) if p.sizes.len() == durations.len() + 1 => p.sizes.clone(),
        _ => vec![cli.initial_size; durations.len() + 1],
    };

    let hky = HkyModel::new(kappa, frequencies)?;
    let skyline = Skyline::new(sizes, durations)?;
    let rates = site_rates(gamma_shape, cli.gamma_categories, p_invariant)?;
    let error_model = if cli.error_rate.is_some() || cli.error_age_rate.is_some() {
        let error_type = match cli.error_type {
            ErrorKind::All => ErrorType::AllSubstitutions,
            ErrorKind::Transitions => ErrorType::TransitionsOnly,
        };
        let mut excluded = vec![false; taxa.len()];
        for name in &cli.error_exclude {
            let Some(i) = taxa.index_of(name) else {
                bail!("no taxon with id={name}");
            };
            excluded[i] = true;
        }
        Some(
            SequenceErrorModel::new(
                taxa.len(),
                error_type,
                cli.error_rate.clone(),
                cli.error_age_rate,
            )?
            .with_excluded(excluded)?,
        )
    } else {
        None
    };
    info!(
        "model: kappa={kappa}, frequencies={frequencies:?}, mu={mu}, {} epochs, {} rate categories",
        skyline.epoch_count(),
        rates.category_count()
    );

    let likelihoods = paired
        .into_iter()
        .map(|p| {
            let mut l = PairwiseCompositeLikelihood::new(
                p,
                hky.clone(),
                skyline.clone(),
                rates.clone(),
                mu,
            )?;
            l.set_error_model(error_model.clone())?;
            Ok(l)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut config = AnalysisConfig {
        fit_kappa: !cli.fix_kappa,
        size_bounds: Bounds {
            lo: cli.min_size,
            hi: cli.max_size,
        },
        ..AnalysisConfig::default()
    };
    config.lbfgs.max_iters = cli.max_iters;
    let mut analysis = SsgdAnalysis::new(likelihoods, config)?;
    let names = analysis.parameter_names();

    let log_likelihood = if cli.max_iters == 0 {
        analysis.log_likelihood()
    } else if cli.bootstrap > 0 {
        let bs_config = BootstrapConfig {
            replicates: cli.bootstrap,
            seed: cli.seed,
            rescale: cli.rescale,
        };
        let pb = progress::maybe(
            progress::replicates(cli.bootstrap as u64 + 1),
            show_progress,
        );
        let records = run_bootstrap(&mut analysis, &sites, &bs_config, |r| {
            pb.set_message(format!("logL {:.4}", r.log_likelihood));
            pb.inc(1);
        })?;
        pb.finish_with_message("bootstrap done");

        let tsv = cli
            .bootstrap_out
            .clone()
            .unwrap_or_else(|| default_bootstrap_path(&cli.output_file));
        write_replicates_tsv(&tsv, &names, &records)?;
        let summary = summarize_replicates(&records, &names, cli.seed)?;
        let summary_path = tsv.with_extension("json");
        write_bootstrap_summary_json(&summary_path, &summary)?;
        for p in &summary.parameters {
            println!(
                "{}\t{:.6e}\t[{:.6e}, {:.6e}]",
                p.name, p.main, p.q025, p.q975
            );
        }
        println!("Bootstrap replicates: {}", tsv.display());
        println!("Bootstrap summary: {}", summary_path.display());

        // Report the fit to the unperturbed data.
        let main = &records[0];
        analysis.apply_params(&main.params)?;
        main.log_likelihood
    } else {
        analysis.run()?.log_likelihood
    };
    println!("Composite logL: {log_likelihood}");

    let first = &analysis.likelihoods()[0];
    let params = SsgdParamsFile {
        kappa: first.hky().kappa(),
        frequencies: *first.hky().frequencies(),
        sizes: first.demography().sizes().to_vec(),
        durations: first.demography().durations().to_vec(),
        mu,
        gamma_shape: first.site_rates().gamma_shape(),
        gamma_categories: first.site_rates().gamma_categories(),
        p_invariant: first.site_rates().p_invariant(),
        log_likelihood: Some(log_likelihood),
    };
    save_params(&cli.output_file, &params)?;
    println!("Parameters: {}", cli.output_file.display());
    Ok(())
}

fn simulate(cli: SimulateArgs) -> Result<()> {
    let taxa = read_taxa(&cli.taxa)?;
    let demography = Skyline::new(cli.sizes.clone(), cli.durations.clone())?;
    let hky = HkyModel::new(cli.kappa, to_frequencies(&cli.frequencies)?)?;
    let rates = site_rates(cli.gamma_shape, cli.gamma_categories, cli.p_invariant)?;
    let simulator = PatternSimulator {
        taxa: taxa.clone(),
        demography,
        hky,
        site_rates: rates,
        mu: cli.mu,
        locus_length: cli.length,
        locus_count: cli.loci,
    };
    let mut rng = new_rng(cli.seed);
    let loci = simulator
        .simulate_loci(&mut rng)
        .context("simulation failed")?;
    write_lambert(&cli.output_file, &taxa, &loci)?;
    println!(
        "Simulated {} loci of {} sites: {}",
        cli.loci,
        cli.length,
        cli.output_file.display()
    );
    Ok(())
}
