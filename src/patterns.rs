use anyhow::{Result, bail};
use log::info;
use ndarray::{Array2, ArrayView1};
use rand::Rng;

use crate::nucleotide::{N_OBSERVED, N_STATES};
use crate::taxa::TaxonList;

// Row `m + n(n-1)/2` holds pair `m < n`; column `N_OBSERVED * i + j` holds
// state `i` in taxon `m` and `j` in taxon `n`.
#[derive(Debug, Clone)]
pub struct PairedPatterns {
    taxa: TaxonList,
    weights: Array2<f64>,
}

#[inline]
fn pair_row(m: usize, n: usize) -> usize {
    m + n * (n - 1) / 2
}

#[inline]
fn state_col(i: u8, j: u8) -> usize {
    N_OBSERVED * i as usize + j as usize
}

impl PairedPatterns {
    pub fn new(taxa: TaxonList) -> Result<Self> {
        if taxa.len() < 2 {
            bail!("pairwise patterns need at least two taxa, got {}", taxa.len());
        }
        let n_pairs = taxa.len() * (taxa.len() - 1) / 2;
        Ok(Self {
            taxa,
            weights: Array2::zeros((n_pairs, N_OBSERVED * N_OBSERVED)),
        })
    }

    pub fn taxa(&self) -> &TaxonList {
        &self.taxa
    }

    fn locate(&self, a: usize, i: u8, b: usize, j: u8) -> Result<(usize, usize)> {
        let n_taxa = self.taxa.len();
        if a >= n_taxa || b >= n_taxa {
            bail!("taxon index out of range ({a}, {b}) for {n_taxa} taxa");
        }
        if i as usize >= N_OBSERVED || j as usize >= N_OBSERVED {
            bail!("state index out of range ({i}, {j})");
        }
        if a == b {
            bail!("the two taxa must be different (both {a})");
        }
        Ok(if a < b {
            (pair_row(a, b), state_col(i, j))
        } else {
            (pair_row(b, a), state_col(j, i))
        })
    }

    pub fn add_pattern(&mut self, a: usize, i: u8, b: usize, j: u8, w: f64) -> Result<()> {
        if !w.is_finite() || w < 0.0 {
            bail!("pattern weight must be finite and >= 0, got {w}");
        }
        let (row, col) = self.locate(a, i, b, j)?;
        self.weights[(row, col)] += w;
        Ok(())
    }

    pub fn add_site(&mut self, a: usize, i: u8, b: usize, j: u8) -> Result<()> {
        self.add_pattern(a, i, b, j, 1.0)
    }

    pub fn weight(&self, a: usize, i: u8, b: usize, j: u8) -> Result<f64> {
        let (row, col) = self.locate(a, i, b, j)?;
        Ok(self.weights[(row, col)])
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.sum()
    }

    pub fn approximate_frequencies(&self) -> [f64; N_STATES] {
        let mut freqs = [0.0; N_STATES];
        for row in self.weights.rows() {
            for (i, f) in freqs.iter_mut().enumerate() {
                *f += row[(N_OBSERVED + 1) * i];
            }
        }
        let sum: f64 = freqs.iter().sum();
        if sum > 0.0 {
            for f in freqs.iter_mut() {
                *f /= sum;
            }
        } else {
            freqs = [0.25; N_STATES];
        }
        freqs
    }

    pub fn rescale(&mut self, factor: f64) {
        self.weights *= factor;
    }

    pub fn pair_rows(&self) -> impl Iterator<Item = (usize, usize, ArrayView1<'_, f64>)> + '_ {
        let n_taxa = self.taxa.len();
        (1..n_taxa)
            .flat_map(move |n| (0..n).map(move |m| (m, n)))
            .map(move |(m, n)| (m, n, self.weights.row(pair_row(m, n))))
    }
}

pub fn rescale_all(tables: &mut [PairedPatterns]) -> Result<f64> {
    let sum: f64 = tables.iter().map(PairedPatterns::total_weight).sum();
    if sum <= 0.0 {
        bail!("cannot rescale pattern tables with zero total weight");
    }
    let factor = 1.0 / sum;
    info!("rescaling all pattern weights by {factor}");
    for t in tables.iter_mut() {
        t.rescale(factor);
    }
    Ok(factor)
}

#[derive(Debug, Clone)]
pub struct SitePatterns {
    taxa: TaxonList,
    columns: Vec<Vec<u8>>,
    weights: Vec<f64>,
}

impl SitePatterns {
    pub fn new(taxa: TaxonList) -> Self {
        Self {
            taxa,
            columns: Vec::new(),
            weights: Vec::new(),
        }
    }

    pub fn taxa(&self) -> &TaxonList {
        &self.taxa
    }

    pub fn add_column(&mut self, states: Vec<u8>, w: f64) -> Result<()> {
        if states.len() != self.taxa.len() {
            bail!(
                "column has {} states for {} taxa",
                states.len(),
                self.taxa.len()
            );
        }
        if let Some(s) = states.iter().find(|s| **s as usize >= N_OBSERVED) {
            bail!("invalid state index {s}");
        }
        if w > 0.0 {
            self.columns.push(states);
            self.weights.push(w);
        }
        Ok(())
    }

    pub fn add_constant(&mut self, state: u8, w: f64) -> Result<()> {
        self.add_column(vec![state; self.taxa.len()], w)
    }

    pub fn pattern_count(&self) -> usize {
        self.columns.len()
    }

    pub fn site_count(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn to_paired(&self) -> Result<PairedPatterns> {
        let mut paired = PairedPatterns::new(self.taxa.clone())?;
        for (col, w) in self.columns.iter().zip(self.weights.iter()) {
            for n in 1..col.len() {
                for m in 0..n {
                    paired.add_pattern(m, col[m], n, col[n], *w)?;
                }
            }
        }
        Ok(paired)
    }

    pub fn bootstrap<R: Rng>(&self, rng: &mut R) -> Result<Self> {
        let total = self.site_count();
        if self.columns.is_empty() || total <= 0.0 {
            bail!("cannot bootstrap an empty pattern list");
        }
        let mut cumulative = Vec::with_capacity(self.weights.len());
        let mut acc = 0.0;
        for w in &self.weights {
            acc += w;
            cumulative.push(acc);
        }
        let draws = total.round().max(1.0) as usize;
        let mut counts = vec![0.0f64; self.columns.len()];
        for _ in 0..draws {
            let u = rng.gen_range(0.0..acc);
            let idx = cumulative
                .partition_point(|c| *c <= u)
                .min(counts.len() - 1);
            counts[idx] += 1.0;
        }

        let mut out = Self::new(self.taxa.clone());
        for (col, c) in self.columns.iter().zip(counts) {
            if c > 0.0 {
                out.columns.push(col.clone());
                out.weights.push(c);
            }
        }
        Ok(out)
    }
}
