use anyhow::{Result, bail};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Taxon {
    pub name: String,
    pub height: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonList {
    taxa: Vec<Taxon>,
    index: HashMap<String, usize>,
}

impl TaxonList {
    pub fn new(taxa: Vec<Taxon>) -> Result<Self> {
        let mut index = HashMap::with_capacity(taxa.len());
        for (i, taxon) in taxa.iter().enumerate() {
            if !taxon.height.is_finite() || taxon.height < 0.0 {
                bail!(
                    "taxon {} has invalid sampling height {}",
                    taxon.name,
                    taxon.height
                );
            }
            if index.insert(taxon.name.clone(), i).is_some() {
                bail!("duplicate taxon name {}", taxon.name);
            }
        }
        Ok(Self { taxa, index })
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Result<Self> {
        let taxa = pairs
            .into_iter()
            .map(|(name, height)| Taxon {
                name: name.into(),
                height,
            })
            .collect();
        Self::new(taxa)
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, i: usize) -> &Taxon {
        &self.taxa[i]
    }

    pub fn height(&self, i: usize) -> f64 {
        self.taxa[i].height
    }

    pub fn iter(&self) -> impl Iterator<Item = &Taxon> {
        self.taxa.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.taxa.iter().map(|t| t.name.as_str()).collect()
    }
}

impl PartialEq for TaxonList {
    fn eq(&self, other: &Self) -> bool {
        self.taxa == other.taxa
    }
}
