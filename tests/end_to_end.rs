use std::fs;
use std::path::Path;

use kraken_tsv_report::error::ReportError;
use kraken_tsv_report::kraken_tsv::read_kraken_records;
use kraken_tsv_report::report::{ReportSink, TsvReportSink};
use kraken_tsv_report::taxdb::{CachedResolver, TaxDbResolver};
use kraken_tsv_report::{build_report, ReportOptions};

const TAXDB: &str = "1\t1\troot\tno rank\n\
    131567\t1\tcellular organisms\tno rank\n\
    2\t131567\tBacteria\tsuperkingdom\n\
    1224\t2\tPseudomonadota\tphylum\n\
    561\t1224\tEscherichia\tgenus\n\
    562\t561\tEscherichia coli\tspecies\n\
    590\t1224\tSalmonella\tgenus\n";

const KRAKEN: &str = "C\tr1\t562\t150\t562:50 561:3\n\
    C\tr2\t562\t150\t562:20 |:| 562:20\n\
    C\tr3\t561\t150\t561:10 562:2\n\
    C\tr4\t590\t150\t590:5 0:5 1224:5\n\
    C\tr5\t590\t150\t590:60\n\
    U\tr6\t0\t150\t0:116\n";

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn taxdb_backed_report() {
    let dir = tempfile::tempdir().unwrap();
    let taxdb = write(dir.path(), "taxDB", TAXDB);
    let tsv = write(dir.path(), "sample.kraken", KRAKEN);

    let records = read_kraken_records(&tsv, 0).unwrap();
    let resolver = TaxDbResolver::open(&taxdb).unwrap();
    let options = ReportOptions {
        min_confidence: 0.5,
        ..ReportOptions::default()
    };
    let results = build_report(&records, &resolver, &options).unwrap();

    // r4 is dropped: its k-mers are split three ways
    let expected = " 66.67\t4\t0\tR\t1\troot
 66.67\t4\t0\tD\t2\t    Bacteria
 66.67\t4\t0\tP\t1224\t      Pseudomonadota
 66.67\t4\t0\t-\t131567\t  cellular organisms
 50.00\t3\t1\tG\t561\t        Escherichia
 33.33\t2\t2\tS\t562\t          Escherichia coli
 16.67\t1\t1\tU\t0\tunclassified
 16.67\t1\t1\tG\t590\t        Salmonella
";
    assert_eq!(results.get_kraken_report(), expected);

    let summary = &results.summary;
    assert_eq!(summary.total_records, 6);
    assert_eq!(summary.unclassified_records, 1);
    assert_eq!(summary.classified_records, 5);
    assert_eq!(summary.confident_records, 4);

    let out = dir.path().join("sample.report");
    let mut sink = TsvReportSink::new(fs::File::create(&out).unwrap());
    sink.write_rows(&results.kraken_report_rows).unwrap();
    sink.write_summary(&results.summary).unwrap();
    drop(sink);
    assert_eq!(fs::read_to_string(&out).unwrap(), expected);
}

#[test]
fn unknown_taxon_aborts_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let taxdb = write(dir.path(), "taxDB", TAXDB);
    let tsv = write(
        dir.path(),
        "sample.kraken",
        &format!("{KRAKEN}C\tr7\t4242\t150\t4242:9\n"),
    );

    let records = read_kraken_records(&tsv, 0).unwrap();
    let resolver = TaxDbResolver::open(&taxdb).unwrap();
    match build_report(&records, &resolver, &ReportOptions::default()) {
        Err(ReportError::ResolutionGap { missing }) => assert_eq!(missing, vec![4242]),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("report built with an unresolved taxon"),
    }
}

#[test]
fn cached_resolver_serves_several_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let taxdb = write(dir.path(), "taxDB", TAXDB);
    let resolver = CachedResolver::new(TaxDbResolver::open(&taxdb).unwrap());

    let first = write(dir.path(), "a.kraken", KRAKEN);
    let second = write(dir.path(), "b.kraken", "C\tq1\t562\t150\t562:9\n");

    let a = build_report(&read_kraken_records(&first, 0).unwrap(), &resolver, &ReportOptions::default())
        .unwrap();
    assert_eq!(resolver.cached_len(), 3);
    let b = build_report(&read_kraken_records(&second, 0).unwrap(), &resolver, &ReportOptions::default())
        .unwrap();
    assert_eq!(resolver.cached_len(), 3);

    assert_eq!(a.abundance.cumulative_count(1), 5);
    assert_eq!(b.kraken_report_rows[0].reads, 1);
    assert_eq!(b.kraken_report_rows.len(), 6);
    assert_eq!(b.kraken_report_rows[0].tax_id, 1);
}

#[test]
fn max_reads_and_min_support() {
    let dir = tempfile::tempdir().unwrap();
    let taxdb = write(dir.path(), "taxDB", TAXDB);
    let tsv = write(dir.path(), "sample.kraken", KRAKEN);

    let options = ReportOptions {
        max_reads: 3,
        min_support: 3,
        ..ReportOptions::default()
    };
    let records = read_kraken_records(&tsv, options.max_reads).unwrap();
    assert_eq!(records.len(), 3);

    let resolver = TaxDbResolver::open(&taxdb).unwrap();
    let results = build_report(&records, &resolver, &options).unwrap();
    let ids: Vec<u32> = results.kraken_report_rows.iter().map(|r| r.tax_id).collect();
    assert_eq!(ids, vec![1, 2, 561, 1224, 131567]);
    assert!(results.kraken_report_rows.iter().all(|r| r.pct == 100.0));
}
