use anyhow::{Result, bail};

use crate::nucleotide::{N_STATES, class_partner, is_exact};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    AllSubstitutions,
    TransitionsOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceErrorModel {
    pub error_type: ErrorType,
    pub base_rate: Option<Vec<f64>>,
    pub age_rate: Option<f64>,
    pub indicators: Option<Vec<bool>>,
    pub excluded: Vec<bool>,
}

impl SequenceErrorModel {
    pub fn new(
        n_taxa: usize,
        error_type: ErrorType,
        base_rate: Option<Vec<f64>>,
        age_rate: Option<f64>,
    ) -> Result<Self> {
        if base_rate.is_none() && age_rate.is_none() {
            bail!("an error model needs a base error rate, an age-related rate, or both");
        }
        if let Some(rates) = &base_rate {
            if rates.len() != 1 && rates.len() != n_taxa {
                bail!(
                    "base error rate needs 1 or {n_taxa} values, got {}",
                    rates.len()
                );
            }
            if let Some(r) = rates.iter().find(|r| !(0.0..=1.0).contains(*r)) {
                bail!("base error rate must be in [0, 1], got {r}");
            }
        }
        if let Some(r) = age_rate
            && (!r.is_finite() || r < 0.0)
        {
            bail!("age-related error rate must be finite and >= 0, got {r}");
        }
        Ok(Self {
            error_type,
            base_rate,
            age_rate,
            indicators: None,
            excluded: vec![false; n_taxa],
        })
    }

    pub fn with_excluded(mut self, excluded: Vec<bool>) -> Result<Self> {
        if excluded.len() != self.excluded.len() {
            bail!(
                "exclusion mask has {} entries for {} taxa",
                excluded.len(),
                self.excluded.len()
            );
        }
        self.excluded = excluded;
        Ok(self)
    }

    pub fn with_indicators(mut self, indicators: Vec<bool>) -> Result<Self> {
        if indicators.len() != self.excluded.len() {
            bail!(
                "indicator vector has {} entries for {} taxa",
                indicators.len(),
                self.excluded.len()
            );
        }
        self.indicators = Some(indicators);
        Ok(self)
    }

    fn p_undamaged(&self, taxon: usize, height: f64) -> f64 {
        let mut p = 1.0;
        if let Some(rates) = &self.base_rate {
            p -= if rates.len() == 1 { rates[0] } else { rates[taxon] };
        }
        if let Some(rate) = self.age_rate {
            p *= (-rate * height).exp();
        }
        p
    }

    pub fn tip_partials(&self, taxon: usize, height: f64, observed: u8) -> [f64; N_STATES] {
        if !is_exact(observed) {
            return [1.0; N_STATES];
        }
        let active = self
            .indicators
            .as_ref()
            .is_none_or(|ind| ind[taxon]);
        if !active || self.excluded[taxon] {
            return one_hot(observed);
        }

        let p_ok = self.p_undamaged(taxon, height);
        let (p_ts, p_tv) = match self.error_type {
            ErrorType::AllSubstitutions => ((1.0 - p_ok) / 3.0, (1.0 - p_ok) / 3.0),
            ErrorType::TransitionsOnly => (1.0 - p_ok, 0.0),
        };
        let mut partials = [p_tv; N_STATES];
        partials[observed as usize] = p_ok;
        partials[class_partner(observed) as usize] = p_ts;
        partials
    }
}

pub fn exact_partials(observed: u8) -> [f64; N_STATES] {
    if is_exact(observed) {
        one_hot(observed)
    } else {
        [1.0; N_STATES]
    }
}

fn one_hot(state: u8) -> [f64; N_STATES] {
    let mut v = [0.0; N_STATES];
    v[state as usize] = 1.0;
    v
}
