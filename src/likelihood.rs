use anyhow::{Result, bail};
use log::debug;

use crate::demography::Skyline;
use crate::error_model::{SequenceErrorModel, exact_partials};
use crate::hky::HkyModel;
use crate::integrator::{HkySkylineIntegrator, ProbabilityKey};
use crate::nucleotide::{N_OBSERVED, N_STATES};
use crate::patterns::PairedPatterns;
use crate::site_rates::SiteRates;

type TipTable = Vec<[[f64; N_STATES]; N_OBSERVED]>;

#[derive(Debug, Clone)]
pub struct PairwiseCompositeLikelihood {
    patterns: PairedPatterns,
    integrator: HkySkylineIntegrator,
    site_rates: SiteRates,
    mu: f64,
    error_model: Option<SequenceErrorModel>,
}

impl PairwiseCompositeLikelihood {
    pub fn new(
        patterns: PairedPatterns,
        hky: HkyModel,
        demography: Skyline,
        site_rates: SiteRates,
        mu: f64,
    ) -> Result<Self> {
        validate_mu(mu)?;
        Ok(Self {
            patterns,
            integrator: HkySkylineIntegrator::new(hky, demography),
            site_rates,
            mu,
            error_model: None,
        })
    }

    pub fn patterns(&self) -> &PairedPatterns {
        &self.patterns
    }

    pub fn hky(&self) -> &HkyModel {
        self.integrator.hky()
    }

    pub fn demography(&self) -> &Skyline {
        self.integrator.demography()
    }

    pub fn site_rates(&self) -> &SiteRates {
        &self.site_rates
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn integrator(&self) -> &HkySkylineIntegrator {
        &self.integrator
    }

    pub fn set_patterns(&mut self, patterns: PairedPatterns) -> Result<()> {
        if patterns.taxa() != self.patterns.taxa() {
            bail!("replacement pattern table must have the same taxa");
        }
        // Heights are part of every memo key, so cached values stay valid.
        self.patterns = patterns;
        Ok(())
    }

    pub fn set_hky(&mut self, hky: HkyModel) {
        self.integrator.set_hky(hky);
    }

    pub fn set_kappa(&mut self, kappa: f64) -> Result<()> {
        self.integrator.set_kappa(kappa)
    }

    pub fn set_demography(&mut self, demography: Skyline) {
        self.integrator.set_demography(demography);
    }

    pub fn set_sizes(&mut self, sizes: &[f64]) -> Result<()> {
        self.integrator.set_sizes(sizes)
    }

    pub fn set_site_rates(&mut self, site_rates: SiteRates) {
        self.site_rates = site_rates;
        self.integrator.invalidate();
    }

    pub fn set_mu(&mut self, mu: f64) -> Result<()> {
        validate_mu(mu)?;
        self.mu = mu;
        self.integrator.invalidate();
        Ok(())
    }

    pub fn set_error_model(&mut self, model: Option<SequenceErrorModel>) -> Result<()> {
        if let Some(m) = &model
            && m.excluded.len() != self.patterns.taxa().len()
        {
            bail!(
                "error model covers {} taxa, pattern table has {}",
                m.excluded.len(),
                self.patterns.taxa().len()
            );
        }
        self.error_model = model;
        Ok(())
    }

    fn tip_table(&self) -> TipTable {
        let taxa = self.patterns.taxa();
        (0..taxa.len())
            .map(|t| {
                let mut rows = [[0.0; N_STATES]; N_OBSERVED];
                for (s, row) in rows.iter_mut().enumerate() {
                    *row = match &self.error_model {
                        Some(m) => m.tip_partials(t, taxa.height(t), s as u8),
                        None => exact_partials(s as u8),
                    };
                }
                rows
            })
            .collect()
    }

    fn required_keys(&self, tips: &TipTable) -> Vec<ProbabilityKey> {
        let taxa = self.patterns.taxa();
        let mut keys = Vec::new();
        for (a, b, row) in self.patterns.pair_rows() {
            let (ha, hb) = (taxa.height(a), taxa.height(b));
            for (col, w) in row.iter().enumerate() {
                if *w <= 0.0 {
                    continue;
                }
                let (i, j) = (col / N_OBSERVED, col % N_OBSERVED);
                for (rate, _) in self.site_rates.categories() {
                    if rate == 0.0 {
                        continue;
                    }
                    for x in 0..N_STATES {
                        if tips[a][i][x] == 0.0 {
                            continue;
                        }
                        for y in 0..N_STATES {
                            if tips[b][j][y] != 0.0 {
                                keys.push(ProbabilityKey::new(
                                    x as u8,
                                    ha,
                                    y as u8,
                                    hb,
                                    self.mu * rate,
                                ));
                            }
                        }
                    }
                }
            }
        }
        keys
    }

    fn pair_probability(&mut self, tips: &TipTable, a: usize, i: usize, b: usize, j: usize) -> f64 {
        let taxa = self.patterns.taxa();
        let (ha, hb) = (taxa.height(a), taxa.height(b));
        let freqs = *self.hky().frequencies();
        let tip_a = &tips[a][i];
        let tip_b = &tips[b][j];

        let mut p = 0.0;
        for c in 0..self.site_rates.category_count() {
            let rate = self.site_rates.rate(c);
            let prop = self.site_rates.proportion(c);
            let mut pc = 0.0;
            if rate == 0.0 {
                for x in 0..N_STATES {
                    pc += freqs[x] * tip_a[x] * tip_b[x];
                }
            } else {
                let mu = self.mu * rate;
                for x in 0..N_STATES {
                    if tip_a[x] == 0.0 {
                        continue;
                    }
                    for y in 0..N_STATES {
                        if tip_b[y] == 0.0 {
                            continue;
                        }
                        pc += tip_a[x]
                            * tip_b[y]
                            * self
                                .integrator
                                .joint_probability(x as u8, ha, y as u8, hb, mu);
                    }
                }
            }
            p += prop * pc;
        }
        p
    }

    // A zero pair probability makes the result -inf.
    pub fn log_likelihood(&mut self) -> f64 {
        let tips = self.tip_table();
        let keys = self.required_keys(&tips);
        self.integrator.precompute(keys);

        let entries: Vec<(usize, usize, usize, usize, f64)> = self
            .patterns
            .pair_rows()
            .flat_map(|(a, b, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, w)| **w > 0.0)
                    .map(|(col, w)| (a, col / N_OBSERVED, b, col % N_OBSERVED, *w))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut log_l = 0.0;
        for (a, i, b, j, w) in entries {
            let p = self.pair_probability(&tips, a, i, b, j);
            log_l += w * p.ln();
        }
        debug!(
            "composite log-likelihood {log_l} ({} cached integrals)",
            self.integrator.cached_len()
        );
        log_l
    }
}

fn validate_mu(mu: f64) -> Result<()> {
    if !mu.is_finite() || mu <= 0.0 {
        bail!("mutation rate must be finite and > 0, got {mu}");
    }
    Ok(())
}
