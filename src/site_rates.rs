use anyhow::{Context, Result, bail};
use statrs::distribution::{ContinuousCDF, Gamma};

#[derive(Debug, Clone, PartialEq)]
pub struct SiteRates {
    rates: Vec<f64>,
    proportions: Vec<f64>,
    gamma_shape: Option<f64>,
    p_invariant: f64,
}

impl SiteRates {
    pub fn homogeneous() -> Self {
        Self {
            rates: vec![1.0],
            proportions: vec![1.0],
            gamma_shape: None,
            p_invariant: 0.0,
        }
    }

    pub fn discrete_gamma(shape: f64, categories: usize, p_invariant: f64) -> Result<Self> {
        if !shape.is_finite() || shape <= 0.0 {
            bail!("gamma shape must be finite and > 0, got {shape}");
        }
        if categories == 0 {
            bail!("gamma categories must be >= 1");
        }

        let rates = if categories == 1 {
            vec![1.0]
        } else {
            let dist = Gamma::new(shape, shape)
                .with_context(|| format!("invalid gamma distribution with shape {shape}"))?;
            let n = categories as f64;
            let mut rates: Vec<f64> = (0..categories)
                .map(|k| dist.inverse_cdf((2.0 * k as f64 + 1.0) / (2.0 * n)))
                .collect();
            let mean = rates.iter().sum::<f64>() / n;
            for r in rates.iter_mut() {
                *r /= mean;
            }
            rates
        };
        Self::with_variable_rates(rates, Some(shape), p_invariant)
    }

    pub fn invariant(p_invariant: f64) -> Result<Self> {
        Self::with_variable_rates(vec![1.0], None, p_invariant)
    }

    fn with_variable_rates(
        mut rates: Vec<f64>,
        gamma_shape: Option<f64>,
        p_invariant: f64,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&p_invariant) {
            bail!("proportion of invariant sites must be in [0, 1), got {p_invariant}");
        }
        let categories = rates.len();
        let variable = 1.0 - p_invariant;
        let mut proportions = vec![variable / categories as f64; categories];
        for r in rates.iter_mut() {
            *r /= variable;
        }
        if p_invariant > 0.0 {
            rates.push(0.0);
            proportions.push(p_invariant);
        }

        Ok(Self {
            rates,
            proportions,
            gamma_shape,
            p_invariant,
        })
    }

    pub fn category_count(&self) -> usize {
        self.rates.len()
    }

    pub fn rate(&self, c: usize) -> f64 {
        self.rates[c]
    }

    pub fn proportion(&self, c: usize) -> f64 {
        self.proportions[c]
    }

    pub fn categories(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.rates
            .iter()
            .copied()
            .zip(self.proportions.iter().copied())
    }

    pub fn gamma_shape(&self) -> Option<f64> {
        self.gamma_shape
    }

    pub fn p_invariant(&self) -> f64 {
        self.p_invariant
    }

    pub fn gamma_categories(&self) -> usize {
        if self.p_invariant > 0.0 {
            self.rates.len() - 1
        } else {
            self.rates.len()
        }
    }

    pub fn mean_rate(&self) -> f64 {
        self.categories().map(|(r, p)| r * p).sum()
    }
}

impl Default for SiteRates {
    fn default() -> Self {
        Self::homogeneous()
    }
}
