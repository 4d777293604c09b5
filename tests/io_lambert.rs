use flate2::Compression;
use flate2::write::GzEncoder;
use ssgd_rs::io::lambert::{parse_lambert, read_lambert, write_lambert};
use ssgd_rs::io::taxa::read_taxa;
use ssgd_rs::nucleotide::{A_STATE, AMBIGUOUS, C_STATE, G_STATE, T_STATE};
use ssgd_rs::taxa::TaxonList;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn taxa() -> TaxonList {
    TaxonList::from_pairs([("s1", 0.0), ("s2", 100.0), ("s3", 500.0)]).expect("valid taxa")
}

const SEVEN_FIELDS: &str = "\
locus1,s1,10,0,3,0,ACGTN
locus1,s2,99,99,99,99,ACGAA
locus1,s3,x,0,0,0,AGGTC
locus2,s2,0,5,0,0,TT
locus2,s1,0,0,0,0,TT
locus2,s3,0,0,0,0,TC
";

#[test]
fn lambert_seven_field_layout() {
    let path = unique_temp_path("lambert_seven", "csv");
    fs::write(&path, SEVEN_FIELDS).expect("failed to write lambert input");

    let sites = read_lambert(&path, &taxa()).expect("failed to parse lambert");
    // Constants come from each block's first record only.
    approx_eq(sites.site_count(), 10.0 + 3.0 + 5.0 + 5.0 + 2.0, 1e-12);
    assert_eq!(sites.pattern_count(), 7);

    let paired = sites.to_paired().expect("paired");
    approx_eq(paired.weight(0, A_STATE, 1, A_STATE).expect("lookup"), 11.0, 1e-12);
    approx_eq(paired.weight(0, G_STATE, 2, G_STATE).expect("lookup"), 4.0, 1e-12);
    approx_eq(paired.weight(1, T_STATE, 2, T_STATE).expect("lookup"), 6.0, 1e-12);
    approx_eq(paired.weight(0, T_STATE, 2, C_STATE).expect("lookup"), 1.0, 1e-12);
    approx_eq(paired.weight(0, AMBIGUOUS, 1, A_STATE).expect("lookup"), 1.0, 1e-12);
    approx_eq(paired.weight(1, C_STATE, 2, G_STATE).expect("lookup"), 1.0, 1e-12);

    let _ = fs::remove_file(path);
}

#[test]
fn lambert_six_field_layout() {
    let lines = ["s1,2,0,0,1,AC", "s2,0,0,0,0,AC", "s3,0,0,0,0,AG"];
    let sites = parse_lambert(&lines, &taxa()).expect("failed to parse lambert");
    approx_eq(sites.site_count(), 5.0, 1e-12);
    let paired = sites.to_paired().expect("paired");
    approx_eq(paired.weight(0, C_STATE, 2, G_STATE).expect("lookup"), 1.0, 1e-12);
    approx_eq(paired.weight(0, A_STATE, 1, A_STATE).expect("lookup"), 3.0, 1e-12);
    approx_eq(paired.weight(1, C_STATE, 2, C_STATE).expect("lookup"), 1.0, 1e-12);
}

#[test]
fn lambert_unknown_taxon_is_named() {
    let lines = ["l,s1,0,0,0,0,AC", "l,s9,0,0,0,0,AC", "l,s3,0,0,0,0,AG"];
    let err = parse_lambert(&lines, &taxa()).expect_err("expected unknown taxon error");
    assert!(format!("{err:#}").contains("no taxon with id=s9"));
}

#[test]
fn lambert_rejects_malformed_blocks() {
    let bad_symbol = ["l,s1,0,0,0,0,AC", "l,s2,0,0,0,0,AX", "l,s3,0,0,0,0,AG"];
    let err = parse_lambert(&bad_symbol, &taxa()).expect_err("expected symbol error");
    assert!(format!("{err:#}").contains("invalid nucleotide"));

    let ragged = ["l,s1,0,0,0,0,AC", "l,s2,0,0,0,0,ACG", "l,s3,0,0,0,0,AG"];
    assert!(parse_lambert(&ragged, &taxa()).is_err());

    let repeated = ["l,s1,0,0,0,0,AC", "l,s1,0,0,0,0,AC", "l,s3,0,0,0,0,AG"];
    assert!(parse_lambert(&repeated, &taxa()).is_err());

    let short = ["l,s1,0,0,0,0,AC", "l,s2,0,0,0,0,AC"];
    assert!(parse_lambert(&short, &taxa()).is_err());

    let fields = ["s1,AC", "s2,AC", "s3,AC"];
    assert!(parse_lambert(&fields, &taxa()).is_err());

    let empty = TaxonList::new(Vec::new()).expect("empty list is valid");
    assert!(parse_lambert(&short, &empty).is_err());
    let lone = TaxonList::from_pairs([("s1", 0.0)]).expect("valid taxa");
    let err = parse_lambert(&["l,s1,0,0,0,0,AC"], &lone).expect_err("expected taxa count error");
    assert!(format!("{err:#}").contains("at least 2 taxa"));
}

#[test]
fn lambert_reads_gzip_input() {
    let path = unique_temp_path("lambert_gz", "csv.gz");
    let file = fs::File::create(&path).expect("failed to create gz input");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(SEVEN_FIELDS.as_bytes())
        .expect("failed to write gz input");
    encoder.finish().expect("failed to finish gz input");

    let sites = read_lambert(&path, &taxa()).expect("failed to parse gz lambert");
    approx_eq(sites.site_count(), 25.0, 1e-12);

    let _ = fs::remove_file(path);
}

#[test]
fn written_loci_read_back() {
    let path = unique_temp_path("lambert_roundtrip", "csv");
    let loci = vec![
        vec![
            vec![A_STATE, C_STATE, G_STATE],
            vec![A_STATE, T_STATE, G_STATE],
            vec![G_STATE, C_STATE, G_STATE],
        ],
        vec![
            vec![T_STATE, T_STATE],
            vec![T_STATE, AMBIGUOUS],
            vec![C_STATE, T_STATE],
        ],
    ];
    write_lambert(&path, &taxa(), &loci).expect("failed to write lambert");
    let sites = read_lambert(&path, &taxa()).expect("failed to read lambert");
    approx_eq(sites.site_count(), 5.0, 1e-12);
    let paired = sites.to_paired().expect("paired");
    approx_eq(paired.weight(0, A_STATE, 2, G_STATE).expect("lookup"), 1.0, 1e-12);
    approx_eq(paired.weight(1, AMBIGUOUS, 2, T_STATE).expect("lookup"), 1.0, 1e-12);
    approx_eq(paired.weight(0, G_STATE, 1, G_STATE).expect("lookup"), 1.0, 1e-12);

    assert!(write_lambert(&path, &taxa(), &[vec![vec![A_STATE]]]).is_err());
    let _ = fs::remove_file(path);
}

#[test]
fn taxa_file_with_comments() {
    let path = unique_temp_path("taxa", "tsv");
    fs::write(&path, "# name\theight\nmodern\t0\n\nancient\t3500.5\n").expect("write taxa");
    let taxa = read_taxa(&path).expect("failed to read taxa");
    assert_eq!(taxa.len(), 2);
    assert_eq!(taxa.index_of("ancient"), Some(1));
    approx_eq(taxa.height(1), 3500.5, 0.0);

    fs::write(&path, "only\t0\n").expect("write taxa");
    assert!(read_taxa(&path).is_err());
    fs::write(&path, "a\t0\nb\tyesterday\n").expect("write taxa");
    assert!(read_taxa(&path).is_err());
    let _ = fs::remove_file(path);
}
