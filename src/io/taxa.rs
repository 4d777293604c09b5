use anyhow::{Context, Result, bail};
use std::io::BufRead;
use std::path::Path;

use crate::io::open_reader;
use crate::taxa::{Taxon, TaxonList};

pub fn read_taxa(path: &Path) -> Result<TaxonList> {
    let reader = open_reader(path)?;
    let mut taxa = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {path:?}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(height)) = (fields.next(), fields.next()) else {
            bail!("{path:?} line {}: expected `name height`", line_no + 1);
        };
        let height: f64 = height
            .parse()
            .with_context(|| format!("{path:?} line {}: invalid height {height:?}", line_no + 1))?;
        taxa.push(Taxon {
            name: name.to_string(),
            height,
        });
    }
    if taxa.len() < 2 {
        bail!("{path:?} lists {} taxa, need at least two", taxa.len());
    }
    TaxonList::new(taxa).with_context(|| format!("invalid taxa in {path:?}"))
}
