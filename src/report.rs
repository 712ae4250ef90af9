// src/report.rs

use std::io::Write;

use rayon::prelude::*;

use crate::abundance::AbundanceTable;
use crate::error::Result;
use crate::taxonomy::{rank_code, TaxonTable};
use crate::types::{KrakenReportRow, ReportSummary};

/// Percentage with two decimals, right-aligned in six characters (`" 12.34"`, `"100.00"`).
pub fn format_pct(pct: f64) -> String {
    format!("{:6.2}", pct)
}

/// Two spaces per level of lineage depth, then the name.
pub fn indent_name(depth: usize, name: &str) -> String {
    let mut indented_name = String::with_capacity(2 * depth + name.len());
    for _ in 0..depth {
        indented_name.push_str("  ");
    }
    indented_name.push_str(name);
    indented_name
}

impl KrakenReportRow {
    pub fn indented_name(&self) -> String {
        indent_name(self.depth, &self.tax_name)
    }

    /// `pct \t reads \t taxReads \t rank \t taxID \t indented name`
    pub fn to_tsv_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            format_pct(self.pct),
            self.reads,
            self.tax_reads,
            self.rank_code,
            self.tax_id,
            self.indented_name()
        )
    }
}

/// Rank every taxon with reads by clade count (descending, then taxon id ascending).
///
/// Percentages use `total_records`, every input read including unclassified and filtered ones.
/// Rows whose clade count is below `min_support` are left out.
pub fn build_report_rows(
    taxonomy: &TaxonTable,
    abundance: &AbundanceTable,
    total_records: u64,
    min_support: u64,
) -> Vec<KrakenReportRow> {
    if total_records == 0 {
        return Vec::new();
    }

    let mut rows: Vec<KrakenReportRow> = abundance
        .iter()
        .filter(|(_, r)| r.direct_count > 0 || r.cumulative_count > 0)
        .filter(|(_, r)| r.cumulative_count >= min_support)
        .filter_map(|(tax_id, r)| {
            let taxon = taxonomy.get(tax_id)?;
            Some(KrakenReportRow {
                pct: 100.0 * r.cumulative_count as f64 / total_records as f64,
                reads: r.cumulative_count,
                tax_reads: r.direct_count,
                rank: taxon.rank.clone(),
                rank_code: rank_code(&taxon.rank),
                tax_id,
                tax_name: taxon.name.clone(),
                depth: taxon.depth,
            })
        })
        .collect();

    rows.par_sort_unstable_by(|a, b| b.reads.cmp(&a.reads).then(a.tax_id.cmp(&b.tax_id)));
    rows
}

/// Render rows as report text, one line per row, no header.
pub fn render_report(rows: &[KrakenReportRow]) -> String {
    let mut output = String::new();
    for row in rows {
        output.push_str(&row.to_tsv_line());
        output.push('\n');
    }
    output
}

/// Where finished reports go.
pub trait ReportSink {
    fn write_rows(&mut self, rows: &[KrakenReportRow]) -> Result<()>;

    /// Informational channel for record and count totals.
    fn write_summary(&mut self, summary: &ReportSummary) -> Result<()>;
}

/// Writes tab-separated rows to any writer and logs the summary.
pub struct TsvReportSink<W: Write> {
    writer: W,
}

impl<W: Write> TsvReportSink<W> {
    pub fn new(writer: W) -> Self {
        TsvReportSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for TsvReportSink<W> {
    fn write_rows(&mut self, rows: &[KrakenReportRow]) -> Result<()> {
        for row in rows {
            writeln!(self.writer, "{}", row.to_tsv_line())?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn write_summary(&mut self, summary: &ReportSummary) -> Result<()> {
        log::info!("% classified: {:.2}%", summary.percent_classified());
        log::info!(
            "Records: {} total, {} unclassified, {} classified, {} confident",
            summary.total_records,
            summary.unclassified_records,
            summary.classified_records,
            summary.confident_records
        );
        if summary.empty_classifications > 0 {
            log::warn!(
                "{} classified records had no usable k-mer hits and were scored as confidence 0",
                summary.empty_classifications
            );
        }
        log::info!(
            "Sum of direct counts: {}, sum of clade counts: {}",
            summary.direct_sum,
            summary.cumulative_sum
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::DirectCounts;
    use crate::types::{LineageMap, LineagePath, Taxon};

    fn row(tax_id: u32, reads: u64, depth: usize) -> KrakenReportRow {
        KrakenReportRow {
            pct: 12.346,
            reads,
            tax_reads: 1,
            rank: "species".to_string(),
            rank_code: "S".to_string(),
            tax_id,
            tax_name: "Escherichia coli".to_string(),
            depth,
        }
    }

    #[test]
    fn percentages_are_six_wide_with_two_decimals() {
        assert_eq!(format_pct(12.346), " 12.35");
        assert_eq!(format_pct(12.34), " 12.34");
        assert_eq!(format_pct(100.0), "100.00");
        assert_eq!(format_pct(0.0), "  0.00");
        assert_eq!(format_pct(5.5), "  5.50");
        for pct in [0.001, 1.0, 9.999, 33.333, 99.994] {
            let s = format_pct(pct);
            assert_eq!(s.len(), 6, "{s:?}");
            assert_eq!(s.split('.').nth(1).map(str::len), Some(2));
        }
    }

    #[test]
    fn names_are_indented_by_depth() {
        assert_eq!(indent_name(0, "root"), "root");
        assert_eq!(indent_name(3, "E. coli"), "      E. coli");
    }

    #[test]
    fn row_columns_are_in_report_order() {
        let line = row(562, 40, 2).to_tsv_line();
        assert_eq!(line, " 12.35\t40\t1\tS\t562\t    Escherichia coli");
    }

    fn lineage(ids: &[(u32, &str, &str)]) -> LineagePath {
        ids.iter()
            .enumerate()
            .map(|(d, (id, rank, name))| Taxon::new(*id, rank, name, d))
            .collect()
    }

    fn small_world() -> (TaxonTable, AbundanceTable) {
        let mut map = LineageMap::new();
        map.insert(10, lineage(&[(1, "no rank", "root"), (10, "species", "A")]));
        map.insert(11, lineage(&[(1, "no rank", "root"), (11, "species", "B")]));
        map.insert(12, lineage(&[(1, "no rank", "root"), (12, "species", "C")]));

        let taxonomy = TaxonTable::build(&[10, 11, 12], &map).unwrap();
        let direct: DirectCounts = [(10, 3), (11, 2), (12, 3), (0, 2)].into_iter().collect();
        let abundance = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();
        (taxonomy, abundance)
    }

    #[test]
    fn rows_sort_by_clade_count_then_id() {
        let (taxonomy, abundance) = small_world();
        let rows = build_report_rows(&taxonomy, &abundance, 10, 0);
        let order: Vec<u32> = rows.iter().map(|r| r.tax_id).collect();
        assert_eq!(order, vec![1, 10, 12, 0, 11]);

        assert_eq!(rows[0].rank_code, "R");
        assert_eq!(rows[0].reads, 8);
        assert_eq!(rows[0].tax_reads, 0);
        assert_eq!(rows[3].rank_code, "U");
        assert_eq!(rows[1].indented_name(), "  A");
    }

    #[test]
    fn min_support_drops_small_clades() {
        let (taxonomy, abundance) = small_world();
        let rows = build_report_rows(&taxonomy, &abundance, 10, 3);
        let order: Vec<u32> = rows.iter().map(|r| r.tax_id).collect();
        assert_eq!(order, vec![1, 10, 12]);
    }

    #[test]
    fn no_records_means_no_rows() {
        let (taxonomy, abundance) = small_world();
        assert!(build_report_rows(&taxonomy, &abundance, 0, 0).is_empty());
    }

    #[test]
    fn sink_writes_one_line_per_row() {
        let mut sink = TsvReportSink::new(Vec::new());
        sink.write_rows(&[row(1, 8, 0), row(562, 6, 1)]).unwrap();
        sink.write_summary(&ReportSummary::default()).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("  Escherichia coli\n"));
        assert_eq!(render_report(&[row(1, 8, 0), row(562, 6, 1)]), text);
    }
}
