use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq)]
pub struct Skyline {
    sizes: Vec<f64>,
    durations: Vec<f64>,
}

impl Skyline {
    pub fn new(sizes: Vec<f64>, durations: Vec<f64>) -> Result<Self> {
        validate(&sizes, &durations)?;
        Ok(Self { sizes, durations })
    }

    pub fn constant(size: f64) -> Result<Self> {
        Self::new(vec![size], Vec::new())
    }

    pub fn uniform(sizes: Vec<f64>, width: f64) -> Result<Self> {
        let n = sizes.len().saturating_sub(1);
        Self::new(sizes, vec![width; n])
    }

    pub fn epoch_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn epoch_duration(&self, k: usize) -> f64 {
        self.durations.get(k).copied().unwrap_or(f64::INFINITY)
    }

    pub fn epoch_size(&self, k: usize) -> f64 {
        self.sizes[k]
    }

    pub fn sizes(&self) -> &[f64] {
        &self.sizes
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn set_sizes(&mut self, sizes: &[f64]) -> Result<()> {
        if sizes.len() != self.sizes.len() {
            bail!(
                "expected {} epoch sizes, got {}",
                self.sizes.len(),
                sizes.len()
            );
        }
        validate(sizes, &self.durations)?;
        self.sizes.copy_from_slice(sizes);
        Ok(())
    }

    pub fn set_durations(&mut self, durations: &[f64]) -> Result<()> {
        validate(&self.sizes, durations)?;
        self.durations = durations.to_vec();
        Ok(())
    }

    pub fn boundaries(&self) -> Vec<f64> {
        let mut acc = 0.0;
        self.durations
            .iter()
            .map(|d| {
                acc += d;
                acc
            })
            .collect()
    }

    pub fn epoch_at(&self, t: f64) -> usize {
        let mut upper = 0.0;
        for (k, d) in self.durations.iter().enumerate() {
            upper += d;
            if upper > t {
                return k;
            }
        }
        self.sizes.len() - 1
    }

    pub fn size_at(&self, t: f64) -> f64 {
        self.sizes[self.epoch_at(t)]
    }
}

fn validate(sizes: &[f64], durations: &[f64]) -> Result<()> {
    if sizes.is_empty() {
        bail!("a skyline needs at least one epoch");
    }
    if durations.len() + 1 != sizes.len() {
        bail!(
            "{} epoch sizes need {} durations, got {}",
            sizes.len(),
            sizes.len() - 1,
            durations.len()
        );
    }
    if let Some(n) = sizes.iter().find(|n| !n.is_finite() || **n <= 0.0) {
        bail!("epoch sizes must be finite and > 0, got {n}");
    }
    if let Some(d) = durations.iter().find(|d| !d.is_finite() || **d < 0.0) {
        bail!("epoch durations must be finite and >= 0, got {d}");
    }
    Ok(())
}
