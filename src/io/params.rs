use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsgdParamsFile {
    pub kappa: f64,
    pub frequencies: [f64; 4],
    pub sizes: Vec<f64>,
    pub durations: Vec<f64>,
    pub mu: f64,
    #[serde(default)]
    pub gamma_shape: Option<f64>,
    #[serde(default = "default_categories")]
    pub gamma_categories: usize,
    #[serde(default)]
    pub p_invariant: f64,
    #[serde(default)]
    pub log_likelihood: Option<f64>,
}

fn default_categories() -> usize {
    1
}

pub fn save_params(path: &Path, params: &SsgdParamsFile) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, params)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_params(path: &Path) -> Result<SsgdParamsFile> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let params =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(params)
}
