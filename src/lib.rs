// src/lib.rs
pub mod abundance;
pub mod confidence;
pub mod error;
pub mod kraken_tsv;
pub mod report;
pub mod taxdb;
pub mod taxonomy;
pub mod types;

use crate::abundance::{tally_reads, AbundanceTable};
use crate::error::{ReportError, Result};
use crate::report::{build_report_rows, render_report, ReportSink};
use crate::taxdb::LineageResolver;
use crate::taxonomy::TaxonTable;
use crate::types::{KrakenRecord, KrakenReportRow, ReportSummary};

/// Knobs for turning per-read output into a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Classified reads below this confidence are dropped before aggregation
    pub min_confidence: f64,
    /// Rows with fewer clade reads are not reported
    pub min_support: u64,
    /// Stop reading after this many records (0 = all)
    pub max_reads: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            min_confidence: 0.0,
            min_support: 0,
            max_reads: 0,
        }
    }
}

impl ReportOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ReportError::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Everything a report run produces; text is generated on demand.
pub struct ReportResults {
    pub kraken_report_rows: Vec<KrakenReportRow>,
    pub summary: ReportSummary,
    pub taxonomy: TaxonTable,
    pub abundance: AbundanceTable,
}

impl ReportResults {
    /// Generate report text: tab-separated rows, no header.
    pub fn get_kraken_report(&self) -> String {
        render_report(&self.kraken_report_rows)
    }

    /// Hand rows and summary to a sink.
    pub fn write_to<S: ReportSink>(&self, sink: &mut S) -> Result<()> {
        sink.write_rows(&self.kraken_report_rows)?;
        sink.write_summary(&self.summary)
    }
}

/// Build the abundance report for one set of reads:
///  1) score and filter reads, seed direct counts
///  2) resolve every assigned taxon in one resolver call
///  3) build the taxon table
///  4) propagate clade counts
///  5) rank and format rows
///
/// Any error aborts before a single row exists.
pub fn build_report<R: LineageResolver + ?Sized>(
    records: &[KrakenRecord],
    resolver: &R,
    options: &ReportOptions,
) -> Result<ReportResults> {
    options.validate()?;

    let tally = tally_reads(records, options.min_confidence);
    log::info!(
        "{} records: {} unclassified, {} classified, {} passed confidence {}",
        tally.total,
        tally.unclassified,
        tally.classified,
        tally.confident,
        options.min_confidence
    );
    if tally.empty_classifications > 0 {
        log::warn!(
            "{} classified records have no k-mer counts; scored as confidence 0",
            tally.empty_classifications
        );
    }

    let assigned = tally.assigned_taxa();
    let lineages = resolver.resolve(&assigned)?;
    log::info!("Resolved {} of {} assigned taxa", lineages.len(), assigned.len());

    let taxonomy = TaxonTable::build(&assigned, &lineages)?;
    let abundance = AbundanceTable::aggregate(&tally.direct_counts, &taxonomy)?;
    abundance.check_root(tally.confident);

    let kraken_report_rows =
        build_report_rows(&taxonomy, &abundance, tally.total, options.min_support);

    let summary = ReportSummary {
        total_records: tally.total,
        unclassified_records: tally.unclassified,
        classified_records: tally.classified,
        confident_records: tally.confident,
        empty_classifications: tally.empty_classifications,
        direct_sum: abundance.direct_sum(),
        cumulative_sum: abundance.cumulative_sum(),
    };

    Ok(ReportResults {
        kraken_report_rows,
        summary,
        taxonomy,
        abundance,
    })
}
