use anyhow::Result;
use log::debug;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::demography::Skyline;
use crate::hky::HkyModel;
use crate::nucleotide::{class_partner, is_transition};

// Observations are ordered so swapping them hits the same entry; the stored
// value is conditional on `first`. Floats are keyed on their exact bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbabilityKey {
    first: (u8, u64),
    second: (u8, u64),
    mu: u64,
}

impl ProbabilityKey {
    pub fn new(i_state: u8, i_time: f64, j_state: u8, j_time: f64, mu: f64) -> Self {
        // +0.0 folds -0.0 onto 0.0 so both signs share a key.
        let a = (i_state, (i_time + 0.0).to_bits());
        let b = (j_state, (j_time + 0.0).to_bits());
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first,
            second,
            mu: (mu + 0.0).to_bits(),
        }
    }

    fn unpack(&self) -> (u8, f64, u8, f64, f64) {
        (
            self.first.0,
            f64::from_bits(self.first.1),
            self.second.0,
            f64::from_bits(self.second.1),
            f64::from_bits(self.mu),
        )
    }
}

// Antiderivatives in time elapsed since the later sample.
#[derive(Debug, Clone, Copy)]
enum Kernel {
    Transversion {
        freq_j: f64,
    },
    Transition {
        sign: f64,
        freq_partner: f64,
        freq_j: f64,
        class_total: f64,
        class_scale: f64,
    },
}

impl Kernel {
    fn new(hky: &HkyModel, i: u8, j: u8) -> Self {
        if !is_transition(i, j) {
            return Kernel::Transversion {
                freq_j: hky.frequency(j),
            };
        }
        let partner = class_partner(i);
        let class_total = hky.frequency(i) + hky.frequency(partner);
        Kernel::Transition {
            sign: if i == j { -1.0 } else { 1.0 },
            freq_partner: hky.frequency(partner),
            freq_j: hky.frequency(j),
            class_total,
            class_scale: class_total * (hky.kappa() - 1.0) + 1.0,
        }
    }

    // e^{origin/N} is folded into the decay term to avoid overflow.
    fn eval(&self, t: f64, n: f64, origin: f64, beta_mu: f64, tau: f64) -> f64 {
        let decay = (-(t - origin) / n).exp();
        let branch = 2.0 * t + tau;
        let two_beta_mu_n = 2.0 * beta_mu * n;
        match *self {
            Kernel::Transversion { freq_j } => {
                freq_j * decay * ((-beta_mu * branch).exp() / (two_beta_mu_n + 1.0) - 1.0)
            }
            Kernel::Transition {
                sign,
                freq_partner,
                freq_j,
                class_total,
                class_scale,
            } => {
                let within = sign * freq_partner * (-beta_mu * branch * class_scale).exp()
                    / (two_beta_mu_n * class_scale + 1.0);
                let across = freq_j
                    * ((1.0 - class_total) * (-beta_mu * branch).exp() / (two_beta_mu_n + 1.0)
                        + class_total);
                decay * (within - across) / class_total
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HkySkylineIntegrator {
    hky: HkyModel,
    demography: Skyline,
    beta: Option<f64>,
    cache: HashMap<ProbabilityKey, f64>,
}

impl HkySkylineIntegrator {
    pub fn new(hky: HkyModel, demography: Skyline) -> Self {
        Self {
            hky,
            demography,
            beta: None,
            cache: HashMap::new(),
        }
    }

    pub fn hky(&self) -> &HkyModel {
        &self.hky
    }

    pub fn demography(&self) -> &Skyline {
        &self.demography
    }

    pub fn set_hky(&mut self, hky: HkyModel) {
        self.hky = hky;
        self.invalidate();
    }

    pub fn set_kappa(&mut self, kappa: f64) -> Result<()> {
        self.hky.set_kappa(kappa)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_demography(&mut self, demography: Skyline) {
        self.demography = demography;
        self.invalidate();
    }

    pub fn set_sizes(&mut self, sizes: &[f64]) -> Result<()> {
        self.demography.set_sizes(sizes)?;
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
        self.beta = None;
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn beta(&mut self) -> f64 {
        match self.beta {
            Some(b) => b,
            None => {
                let b = self.hky.beta();
                self.beta = Some(b);
                b
            }
        }
    }

    pub fn integrated_probability(
        &mut self,
        i_state: u8,
        i_time: f64,
        j_state: u8,
        j_time: f64,
        mu: f64,
    ) -> f64 {
        self.probability(ProbabilityKey::new(i_state, i_time, j_state, j_time, mu))
    }

    // pi_first * P, symmetric in the two observations.
    pub fn joint_probability(
        &mut self,
        i_state: u8,
        i_time: f64,
        j_state: u8,
        j_time: f64,
        mu: f64,
    ) -> f64 {
        let key = ProbabilityKey::new(i_state, i_time, j_state, j_time, mu);
        self.hky.frequency(key.first.0) * self.probability(key)
    }

    pub fn probability(&mut self, key: ProbabilityKey) -> f64 {
        if let Some(p) = self.cache.get(&key) {
            return *p;
        }
        let beta = self.beta();
        let p = self.calculate(&key, beta);
        self.cache.insert(key, p);
        p
    }

    pub fn precompute<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = ProbabilityKey>,
    {
        let beta = self.beta();
        let missing: HashSet<ProbabilityKey> = keys
            .into_iter()
            .filter(|k| !self.cache.contains_key(k))
            .collect();
        if missing.is_empty() {
            return;
        }
        debug!("integrating {} uncached state pairs", missing.len());
        let this = &*self;
        let values: Vec<(ProbabilityKey, f64)> = missing
            .into_par_iter()
            .map(|k| (k, this.calculate(&k, beta)))
            .collect();
        self.cache.extend(values);
    }

    fn calculate(&self, key: &ProbabilityKey, beta: f64) -> f64 {
        let (i_state, i_time, j_state, j_time, mu) = key.unpack();
        let kernel = Kernel::new(&self.hky, i_state, j_state);
        let tau = (i_time - j_time).abs();
        let start = i_time.max(j_time);
        let p = self.integrate_epochs(&kernel, start, tau, beta * mu);
        // Cancellation can leave NaN or a negative rounding residue.
        if p.is_nan() { 0.0 } else { p.max(0.0) }
    }

    fn integrate_epochs(&self, kernel: &Kernel, start: f64, tau: f64, beta_mu: f64) -> f64 {
        let df = &self.demography;
        let m = df.epoch_count();
        let first = df.epoch_at(start);

        let mut upper: f64 = (0..first).map(|k| df.epoch_duration(k)).sum();
        let mut previous = 0.0;
        let mut g = 1.0;
        let mut integrated = 0.0;
        for k in first..m - 1 {
            upper += df.epoch_duration(k);
            let current = upper - start;
            let n = df.epoch_size(k);
            integrated += g
                * (kernel.eval(current, n, previous, beta_mu, tau)
                    - kernel.eval(previous, n, previous, beta_mu, tau));
            g *= (-(current - previous) / n).exp();
            previous = current;
        }

        let n = df.epoch_size(m - 1);
        integrated -= g * kernel.eval(previous, n, previous, beta_mu, tau);
        integrated
    }
}
