use anyhow::{Result, bail};
use log::debug;
use ndarray::Array2;
use rand::Rng;

use crate::demography::Skyline;
use crate::hky::HkyModel;
use crate::nucleotide::N_STATES;
use crate::patterns::SitePatterns;
use crate::site_rates::SiteRates;
use crate::taxa::TaxonList;

#[derive(Debug, Clone)]
struct Node {
    height: f64,
    parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Genealogy {
    nodes: Vec<Node>,
    root: usize,
}

impl Genealogy {
    pub fn root_height(&self) -> f64 {
        self.nodes[self.root].height
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn preorder(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|a, b| self.nodes[*b].height.total_cmp(&self.nodes[*a].height));
        order
    }
}

pub fn simulate_genealogy<R: Rng>(taxa: &TaxonList, demography: &Skyline, rng: &mut R) -> Result<Genealogy> {
    if taxa.len() < 2 {
        bail!("need at least two taxa to simulate a genealogy");
    }
    let mut nodes: Vec<Node> = taxa
        .iter()
        .map(|t| Node {
            height: t.height,
            parent: None,
        })
        .collect();
    let mut pending: Vec<usize> = (0..taxa.len()).collect();
    pending.sort_by(|a, b| nodes[*b].height.total_cmp(&nodes[*a].height));

    let boundaries = demography.boundaries();
    let mut active: Vec<usize> = Vec::new();
    let mut t = pending.last().map(|i| nodes[*i].height).unwrap_or(0.0);
    while let Some(&next) = pending.last() {
        if nodes[next].height > t {
            break;
        }
        active.push(next);
        pending.pop();
    }

    let mut budget = -rng.gen_range(f64::EPSILON..1.0f64).ln();
    while active.len() + pending.len() > 1 {
        let k = active.len() as f64;
        let epoch = demography.epoch_at(t);
        let n = demography.epoch_size(epoch);
        let rate = k * (k - 1.0) / (2.0 * n);
        let next_sample = pending.last().map(|i| nodes[*i].height);
        let next_boundary = boundaries.get(epoch).copied();
        let horizon = [next_sample, next_boundary]
            .into_iter()
            .flatten()
            .fold(f64::INFINITY, f64::min);

        if rate > 0.0 && budget < rate * (horizon - t) {
            t += budget / rate;
            let x = active.swap_remove(rng.gen_range(0..active.len()));
            let y = active.swap_remove(rng.gen_range(0..active.len()));
            let parent = nodes.len();
            nodes.push(Node {
                height: t,
                parent: None,
            });
            nodes[x].parent = Some(parent);
            nodes[y].parent = Some(parent);
            active.push(parent);
            budget = -rng.gen_range(f64::EPSILON..1.0f64).ln();
            continue;
        }

        if !horizon.is_finite() {
            bail!("coalescent simulation stalled with {} lineages", active.len());
        }
        budget -= rate * (horizon - t);
        t = horizon;
        while let Some(&next) = pending.last() {
            if nodes[next].height > t {
                break;
            }
            active.push(next);
            pending.pop();
        }
    }

    let root = active[0];
    Ok(Genealogy { nodes, root })
}

fn to_rows(p: &Array2<f64>) -> [[f64; N_STATES]; N_STATES] {
    let mut rows = [[0.0; N_STATES]; N_STATES];
    for ((i, j), v) in p.indexed_iter() {
        rows[i][j] = *v;
    }
    rows
}

fn draw_index<R: Rng>(probs: &[f64], rng: &mut R) -> usize {
    let total: f64 = probs.iter().sum();
    let u = rng.gen_range(0.0..total);
    let mut acc = 0.0;
    for (i, p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return i;
        }
    }
    probs.len() - 1
}

#[derive(Debug, Clone)]
pub struct PatternSimulator {
    pub taxa: TaxonList,
    pub demography: Skyline,
    pub hky: HkyModel,
    pub site_rates: SiteRates,
    pub mu: f64,
    pub locus_length: usize,
    pub locus_count: usize,
}

impl PatternSimulator {
    pub fn simulate_loci<R: Rng>(&self, rng: &mut R) -> Result<Vec<Vec<Vec<u8>>>> {
        let freqs = *self.hky.frequencies();
        let proportions: Vec<f64> = self.site_rates.categories().map(|(_, p)| p).collect();
        let n_taxa = self.taxa.len();
        let mut loci = Vec::with_capacity(self.locus_count);

        for locus in 0..self.locus_count {
            let tree = simulate_genealogy(&self.taxa, &self.demography, rng)?;
            debug!(
                "locus {locus}: genealogy with root height {}",
                tree.root_height()
            );
            let order = tree.preorder();

            let mut per_category: Vec<Vec<Option<[[f64; N_STATES]; N_STATES]>>> =
                vec![vec![None; tree.node_count()]; self.site_rates.category_count()];
            for (c, probs) in per_category.iter_mut().enumerate() {
                let mu = self.mu * self.site_rates.rate(c);
                for (i, node) in tree.nodes.iter().enumerate() {
                    if let Some(p) = node.parent {
                        let branch = tree.nodes[p].height - node.height;
                        probs[i] = Some(to_rows(&self.hky.transition_probs(mu, branch)));
                    }
                }
            }

            let mut alignment = vec![Vec::with_capacity(self.locus_length); n_taxa];
            let mut states = vec![0u8; tree.node_count()];
            for _ in 0..self.locus_length {
                let c = draw_index(&proportions, rng);
                for &i in &order {
                    states[i] = match (tree.nodes[i].parent, &per_category[c][i]) {
                        (Some(p), Some(probs)) => draw_index(&probs[states[p] as usize], rng) as u8,
                        _ => draw_index(&freqs, rng) as u8,
                    };
                }
                for (seq, s) in alignment.iter_mut().zip(&states[..n_taxa]) {
                    seq.push(*s);
                }
            }
            loci.push(alignment);
        }
        Ok(loci)
    }

    pub fn simulate<R: Rng>(&self, rng: &mut R) -> Result<SitePatterns> {
        let mut out = SitePatterns::new(self.taxa.clone());
        for alignment in self.simulate_loci(rng)? {
            for site in 0..self.locus_length {
                let column = alignment.iter().map(|seq| seq[site]).collect();
                out.add_column(column, 1.0)?;
            }
        }
        Ok(out)
    }
}
