use anyhow::{Context, Result, bail};
use log::info;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::analysis::{FitResult, SsgdAnalysis};
use crate::patterns::{SitePatterns, rescale_all};
use crate::utils::quantile;

#[derive(Debug, Clone, Serialize)]
pub struct ReplicateRecord {
    pub replicate: usize,
    pub log_likelihood: f64,
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub main: f64,
    pub q025: f64,
    pub q500: f64,
    pub q975: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    pub n_replicates: usize,
    pub seed: u64,
    pub parameters: Vec<ParameterSummary>,
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub replicates: usize,
    pub seed: u64,
    pub rescale: bool,
}

pub fn default_bootstrap_path(output_json: &Path) -> PathBuf {
    let stem = output_json
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ssgd");
    output_json.with_file_name(format!("{stem}.bootstrap.tsv"))
}

pub fn new_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

pub fn run_bootstrap<F>(
    analysis: &mut SsgdAnalysis,
    sites: &[SitePatterns],
    config: &BootstrapConfig,
    mut on_done: F,
) -> Result<Vec<ReplicateRecord>>
where
    F: FnMut(&ReplicateRecord),
{
    if sites.len() != analysis.likelihoods().len() {
        bail!(
            "{} site pattern inputs for {} likelihoods",
            sites.len(),
            analysis.likelihoods().len()
        );
    }
    let initial = analysis.current_params();
    let fit_kappa = analysis.config().fit_kappa;
    let mut rng = new_rng(config.seed);
    let mut records = Vec::with_capacity(config.replicates + 1);

    for replicate in 0..=config.replicates {
        let tables = if replicate == 0 {
            sites.to_vec()
        } else {
            sites
                .iter()
                .map(|s| s.bootstrap(&mut rng))
                .collect::<Result<Vec<_>>>()?
        };
        let mut paired = tables
            .iter()
            .map(SitePatterns::to_paired)
            .collect::<Result<Vec<_>>>()?;
        if config.rescale {
            rescale_all(&mut paired)?;
        }
        analysis.set_patterns(paired)?;
        analysis.apply_params(&initial)?;

        let fit: FitResult = analysis
            .run()
            .with_context(|| format!("bootstrap replicate {replicate} failed"))?;
        info!("replicate {replicate}: logL = {}", fit.log_likelihood);
        let record = ReplicateRecord {
            replicate,
            log_likelihood: fit.log_likelihood,
            params: fit.params(fit_kappa),
        };
        on_done(&record);
        records.push(record);
    }
    Ok(records)
}

pub fn summarize_replicates(
    records: &[ReplicateRecord],
    names: &[String],
    seed: u64,
) -> Result<BootstrapSummary> {
    let Some(main) = records.iter().find(|r| r.replicate == 0) else {
        bail!("bootstrap records have no replicate 0");
    };
    let resampled: Vec<&ReplicateRecord> = records.iter().filter(|r| r.replicate > 0).collect();
    if resampled.is_empty() {
        bail!("bootstrap records have no resampled replicates");
    }
    if main.params.len() != names.len() {
        bail!(
            "{} parameter names for {} parameters",
            names.len(),
            main.params.len()
        );
    }

    let mut parameters = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let mut vals: Vec<f64> = resampled.iter().map(|r| r.params[i]).collect();
        parameters.push(ParameterSummary {
            name: name.clone(),
            main: main.params[i],
            q025: quantile(&mut vals, 0.025),
            q500: quantile(&mut vals, 0.5),
            q975: quantile(&mut vals, 0.975),
        });
    }
    Ok(BootstrapSummary {
        n_replicates: resampled.len(),
        seed,
        parameters,
    })
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir {parent:?}"))?;
    }
    Ok(())
}

pub fn write_replicates_tsv(path: &Path, names: &[String], records: &[ReplicateRecord]) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let mut w = BufWriter::new(file);
    write!(w, "replicate\tlog_likelihood")?;
    for name in names {
        write!(w, "\t{name}")?;
    }
    writeln!(w)?;
    for r in records {
        write!(w, "{}\t{:.10e}", r.replicate, r.log_likelihood)?;
        for v in &r.params {
            write!(w, "\t{v:.8e}")?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_bootstrap_summary_json(path: &Path, summary: &BootstrapSummary) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, summary)
        .with_context(|| format!("failed to write {path:?}"))?;
    Ok(())
}
