use anyhow::{Context, Result, bail};
use log::info;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::io::open_reader;
use crate::nucleotide::{A_STATE, C_STATE, G_STATE, T_STATE, parse_state, symbol};
use crate::patterns::SitePatterns;
use crate::taxa::TaxonList;

#[derive(Debug, Clone)]
struct SequenceRecord {
    locus: String,
    taxon: String,
    count_a: u64,
    count_t: u64,
    count_g: u64,
    count_c: u64,
    sequence: String,
}

// Counts that do not parse as integers read as zero.
fn parse_count(field: &str) -> u64 {
    field.trim().parse().unwrap_or(0)
}

fn parse_record(line: &str, block: usize) -> Result<SequenceRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let (locus, rest) = match fields.len() {
        7 => (fields[0].to_string(), &fields[1..]),
        6 => (format!("locus_{}", block + 1), &fields[..]),
        n => bail!("expected 6 or 7 comma-separated fields, got {n}"),
    };
    Ok(SequenceRecord {
        locus,
        taxon: rest[0].to_string(),
        count_a: parse_count(rest[1]),
        count_t: parse_count(rest[2]),
        count_g: parse_count(rest[3]),
        count_c: parse_count(rest[4]),
        sequence: rest[5].to_string(),
    })
}

// Records are `[locus,]taxon,countA,countT,countG,countC,sequence`; only the
// first record of each block supplies constant-site counts.
pub fn read_lambert(path: &Path, taxa: &TaxonList) -> Result<SitePatterns> {
    let reader = open_reader(path)?;
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("failed to read {path:?}"))?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    parse_lambert(&lines, taxa).with_context(|| format!("failed to parse {path:?}"))
}

pub fn parse_lambert<S: AsRef<str>>(lines: &[S], taxa: &TaxonList) -> Result<SitePatterns> {
    let n_taxa = taxa.len();
    if n_taxa < 2 {
        bail!("need at least 2 taxa to read patterns, got {n_taxa}");
    }
    if lines.len() % n_taxa != 0 {
        bail!(
            "{} records do not split into blocks of {} taxa",
            lines.len(),
            n_taxa
        );
    }

    let mut columns: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
    for (block, chunk) in lines.chunks(n_taxa).enumerate() {
        let records = chunk
            .iter()
            .enumerate()
            .map(|(k, l)| {
                parse_record(l.as_ref(), block)
                    .with_context(|| format!("record {}", block * n_taxa + k + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        let first = &records[0];
        info!("processing locus {}", first.locus);

        for (state, count) in [
            (A_STATE, first.count_a),
            (C_STATE, first.count_c),
            (G_STATE, first.count_g),
            (T_STATE, first.count_t),
        ] {
            if count > 0 {
                *columns.entry(vec![state; n_taxa]).or_insert(0.0) += count as f64;
            }
        }

        let length = first.sequence.len();
        let mut slots: Vec<Option<&[u8]>> = vec![None; n_taxa];
        for record in &records {
            let Some(j) = taxa.index_of(&record.taxon) else {
                bail!("no taxon with id={}", record.taxon);
            };
            if slots[j].is_some() {
                bail!("taxon {} appears twice in locus {}", record.taxon, first.locus);
            }
            if record.sequence.len() != length {
                bail!(
                    "taxon {} has {} sites in locus {}, expected {length}",
                    record.taxon,
                    record.sequence.len(),
                    first.locus
                );
            }
            slots[j] = Some(record.sequence.as_bytes());
        }
        let seqs: Vec<&[u8]> = slots.into_iter().flatten().collect();

        for site in 0..length {
            let mut column = Vec::with_capacity(n_taxa);
            for (j, seq) in seqs.iter().enumerate() {
                let c = seq[site];
                let Some(state) = parse_state(c) else {
                    bail!(
                        "invalid nucleotide {:?} for taxon {} at site {} of locus {}",
                        c as char,
                        taxa.get(j).name,
                        site + 1,
                        first.locus
                    );
                };
                column.push(state);
            }
            *columns.entry(column).or_insert(0.0) += 1.0;
        }
    }

    let mut patterns = SitePatterns::new(taxa.clone());
    for (column, w) in columns {
        patterns.add_column(column, w)?;
    }
    Ok(patterns)
}

pub fn write_lambert(path: &Path, taxa: &TaxonList, loci: &[Vec<Vec<u8>>]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let mut w = BufWriter::new(file);
    for (k, alignment) in loci.iter().enumerate() {
        if alignment.len() != taxa.len() {
            bail!(
                "locus {} has {} sequences for {} taxa",
                k + 1,
                alignment.len(),
                taxa.len()
            );
        }
        for (taxon, seq) in taxa.iter().zip(alignment) {
            let seq: String = seq.iter().map(|&s| symbol(s)).collect();
            writeln!(w, "locus_{},{},0,0,0,0,{seq}", k + 1, taxon.name)?;
        }
    }
    w.flush()?;
    Ok(())
}
