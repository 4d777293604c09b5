use anyhow::{Result, bail};
use ndarray::Array2;

use crate::nucleotide::{N_STATES, class_partner, is_transition};

const FREQ_SUM_TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct HkyModel {
    kappa: f64,
    freqs: [f64; N_STATES],
}

impl HkyModel {
    pub fn new(kappa: f64, freqs: [f64; N_STATES]) -> Result<Self> {
        validate_kappa(kappa)?;
        validate_freqs(&freqs)?;
        Ok(Self { kappa, freqs })
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn frequencies(&self) -> &[f64; N_STATES] {
        &self.freqs
    }

    pub fn frequency(&self, state: u8) -> f64 {
        self.freqs[state as usize]
    }

    pub fn set_kappa(&mut self, kappa: f64) -> Result<()> {
        validate_kappa(kappa)?;
        self.kappa = kappa;
        Ok(())
    }

    pub fn beta(&self) -> f64 {
        let [a, c, g, t] = self.freqs;
        let freq_r = a + g;
        let freq_y = c + t;
        1.0 / (2.0 * (freq_r * freq_y + self.kappa * (a * g + c * t)))
    }

    pub fn transition_probs(&self, mu: f64, t: f64) -> Array2<f64> {
        let beta_mu_t = self.beta() * mu * t;
        let e1 = (-beta_mu_t).exp();
        let mut p = Array2::zeros((N_STATES, N_STATES));
        for i in 0..N_STATES as u8 {
            let class_total = self.frequency(i) + self.frequency(class_partner(i));
            let e2 = (-beta_mu_t * (class_total * (self.kappa - 1.0) + 1.0)).exp();
            for j in 0..N_STATES as u8 {
                let pj = self.frequency(j);
                let v = if !is_transition(i, j) {
                    pj * (1.0 - e1)
                } else if i == j {
                    pj + pj * (1.0 / class_total - 1.0) * e1
                        + ((class_total - pj) / class_total) * e2
                } else {
                    pj + pj * (1.0 / class_total - 1.0) * e1 - (pj / class_total) * e2
                };
                p[(i as usize, j as usize)] = v;
            }
        }
        p
    }
}

fn validate_kappa(kappa: f64) -> Result<()> {
    if !kappa.is_finite() || kappa <= 0.0 {
        bail!("kappa must be finite and > 0, got {kappa}");
    }
    Ok(())
}

fn validate_freqs(freqs: &[f64; N_STATES]) -> Result<()> {
    if freqs.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        bail!("base frequencies must all be > 0, got {freqs:?}");
    }
    let sum: f64 = freqs.iter().sum();
    if (sum - 1.0).abs() > FREQ_SUM_TOL {
        bail!("base frequencies must sum to 1, got {sum}");
    }
    Ok(())
}
