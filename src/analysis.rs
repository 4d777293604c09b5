use anyhow::{Result, bail};
use log::{info, warn};
use serde::Serialize;

use crate::likelihood::PairwiseCompositeLikelihood;
use crate::opt::{Bounds, LbfgsConfig, Objective, ObjectiveView, Strategy, minimize_lbfgs};
use crate::patterns::PairedPatterns;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub fit_kappa: bool,
    pub kappa_bounds: Bounds,
    pub size_bounds: Bounds,
    pub lbfgs: LbfgsConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fit_kappa: true,
            kappa_bounds: Bounds { lo: 1e-2, hi: 100.0 },
            size_bounds: Bounds { lo: 1.0, hi: 1e8 },
            lbfgs: LbfgsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    pub log_likelihood: f64,
    pub kappa: f64,
    pub sizes: Vec<f64>,
    pub iterations: usize,
    pub evaluations: usize,
}

impl FitResult {
    pub fn params(&self, fit_kappa: bool) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.sizes.len() + 1);
        if fit_kappa {
            out.push(self.kappa);
        }
        out.extend_from_slice(&self.sizes);
        out
    }
}

pub struct SsgdAnalysis {
    likelihoods: Vec<PairwiseCompositeLikelihood>,
    config: AnalysisConfig,
    evaluations: usize,
}

impl SsgdAnalysis {
    pub fn new(likelihoods: Vec<PairwiseCompositeLikelihood>, config: AnalysisConfig) -> Result<Self> {
        let Some(first) = likelihoods.first() else {
            bail!("an analysis needs at least one likelihood");
        };
        let n_epochs = first.demography().epoch_count();
        if likelihoods
            .iter()
            .any(|l| l.demography().epoch_count() != n_epochs)
        {
            bail!("all likelihoods must share the same number of epochs");
        }
        Ok(Self {
            likelihoods,
            config,
            evaluations: 0,
        })
    }

    pub fn likelihoods(&self) -> &[PairwiseCompositeLikelihood] {
        &self.likelihoods
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn n_epochs(&self) -> usize {
        self.likelihoods[0].demography().epoch_count()
    }

    fn offset(&self) -> usize {
        usize::from(self.config.fit_kappa)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dimension());
        if self.config.fit_kappa {
            names.push("kappa".to_string());
        }
        names.extend((0..self.n_epochs()).map(|k| format!("N_{k}")));
        names
    }

    pub fn current_params(&self) -> Vec<f64> {
        let first = &self.likelihoods[0];
        let mut out = Vec::with_capacity(self.dimension());
        if self.config.fit_kappa {
            out.push(first.hky().kappa());
        }
        out.extend_from_slice(first.demography().sizes());
        out
    }

    pub fn apply_params(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.dimension() {
            bail!(
                "expected {} parameters, got {}",
                self.dimension(),
                x.len()
            );
        }
        let offset = self.offset();
        for l in self.likelihoods.iter_mut() {
            if self.config.fit_kappa {
                l.set_kappa(x[0])?;
            }
            l.set_sizes(&x[offset..])?;
        }
        Ok(())
    }

    pub fn log_likelihood(&mut self) -> f64 {
        self.likelihoods
            .iter_mut()
            .map(|l| l.log_likelihood())
            .sum()
    }

    pub fn set_patterns(&mut self, patterns: Vec<PairedPatterns>) -> Result<()> {
        if patterns.len() != self.likelihoods.len() {
            bail!(
                "expected {} pattern tables, got {}",
                self.likelihoods.len(),
                patterns.len()
            );
        }
        for (l, p) in self.likelihoods.iter_mut().zip(patterns) {
            l.set_patterns(p)?;
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<FitResult> {
        self.evaluations = 0;
        let bounds = self.bounds();
        let start: Vec<f64> = self
            .current_params()
            .iter()
            .zip(bounds.iter())
            .map(|(v, b)| v.clamp(b.lo, b.hi))
            .collect();
        let lbfgs = self.config.lbfgs.clone();

        let (x, iterations) = {
            let mut view = ObjectiveView::new(self, Strategy::Rescaled(start.clone()))?;
            let x0 = view.from_inner(&start);
            let minimum = minimize_lbfgs(&mut view, &x0, &lbfgs)?;
            let x = view.to_inner(&minimum.x);
            (x, minimum.iterations)
        };

        self.apply_params(&x)?;
        let log_likelihood = self.log_likelihood();
        self.warn_if_near_bounds(&x);

        let first = &self.likelihoods[0];
        let result = FitResult {
            log_likelihood,
            kappa: first.hky().kappa(),
            sizes: first.demography().sizes().to_vec(),
            iterations,
            evaluations: self.evaluations,
        };
        info!(
            "fit finished: logL = {} after {} iterations ({} evaluations)",
            result.log_likelihood, result.iterations, result.evaluations
        );
        Ok(result)
    }

    fn warn_if_near_bounds(&self, x: &[f64]) {
        let names = self.parameter_names();
        let mut hits = Vec::new();
        for (i, v) in x.iter().enumerate() {
            let (lo, hi) = (self.lower_bound(i), self.upper_bound(i));
            let tol = (hi - lo).abs() * 1e-6;
            if (v - lo).abs() <= tol {
                hits.push(format!("{}≈lo({lo})", names[i]));
            } else if (v - hi).abs() <= tol {
                hits.push(format!("{}≈hi({hi})", names[i]));
            }
        }
        if !hits.is_empty() {
            warn!(
                "{} parameters are on/near optimisation bounds: {}. Consider wider bounds.",
                hits.len(),
                hits.join(", ")
            );
        }
    }
}

impl Objective for SsgdAnalysis {
    fn dimension(&self) -> usize {
        self.offset() + self.n_epochs()
    }

    fn lower_bound(&self, i: usize) -> f64 {
        if self.config.fit_kappa && i == 0 {
            self.config.kappa_bounds.lo
        } else {
            self.config.size_bounds.lo
        }
    }

    fn upper_bound(&self, i: usize) -> f64 {
        if self.config.fit_kappa && i == 0 {
            self.config.kappa_bounds.hi
        } else {
            self.config.size_bounds.hi
        }
    }

    fn evaluate(&mut self, x: &[f64]) -> Result<f64> {
        self.evaluations += 1;
        self.apply_params(x)?;
        Ok(self.log_likelihood())
    }
}
