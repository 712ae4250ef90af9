//src/types.rs

use ahash::AHashMap;

/// NCBI-style taxon identifier.
pub type TaxId = u32;

/// Reserved id for reads the classifier could not place.
pub const UNCLASSIFIED_TAXID: TaxId = 0;
/// Reserved id for the root of the taxonomy.
pub const ROOT_TAXID: TaxId = 1;

/// One node of the observed taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxon {
    pub tax_id: TaxId,
    pub rank: String,
    pub name: String,
    /// Distance from the root in its own lineage (root = 0)
    pub depth: usize,
}

impl Taxon {
    pub fn new(tax_id: TaxId, rank: &str, name: &str, depth: usize) -> Self {
        Taxon {
            tax_id,
            rank: rank.to_string(),
            name: name.to_string(),
            depth,
        }
    }

    pub fn unclassified() -> Self {
        Taxon::new(UNCLASSIFIED_TAXID, "unclassified", "unclassified", 0)
    }

    pub fn root() -> Self {
        Taxon::new(ROOT_TAXID, "root", "root", 0)
    }
}

/// Root-to-taxon chain as returned by a lineage resolver. The last entry is the queried taxon.
/// `depth` on the entries is ignored; the position in the path is the depth.
pub type LineagePath = Vec<Taxon>;

/// Resolved lineages keyed by the queried id.
pub type LineageMap = AHashMap<TaxId, LineagePath>;

/// A structured representation of one Kraken2 per-read output line.
#[derive(Debug, Clone)]
pub struct KrakenRecord {
    pub status: char, // 'C' or 'U'
    pub read_id: String,
    pub tax_id: TaxId,
    pub length: String,
    pub hitlist: String,
}

impl KrakenRecord {
    #[inline]
    pub fn is_unclassified(&self) -> bool {
        self.tax_id == UNCLASSIFIED_TAXID
    }
}

/// Read counts for one taxon: directly assigned and clade-wide.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbundanceRecord {
    /// Reads assigned exactly to this taxon
    pub direct_count: u64,
    /// Reads assigned to this taxon or any descendant
    pub cumulative_count: u64,
}

/// A structured representation of one row in the taxonomy report:
///  %  reads  taxReads  rank  taxID  taxName
#[derive(Debug, Clone, PartialEq)]
pub struct KrakenReportRow {
    pub pct: f64,
    pub reads: u64,
    pub tax_reads: u64,
    pub rank: String,
    pub rank_code: String,
    pub tax_id: TaxId,
    pub tax_name: String,
    pub depth: usize, // for indentation
}

/// Record and count totals reported next to the rows.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_records: u64,
    pub unclassified_records: u64,
    pub classified_records: u64,
    /// Classified records at or above the confidence threshold
    pub confident_records: u64,
    /// Classified records whose hit list held no usable token
    pub empty_classifications: u64,
    pub direct_sum: u64,
    pub cumulative_sum: u64,
}

impl ReportSummary {
    pub fn percent_classified(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            100.0 * self.classified_records as f64 / self.total_records as f64
        }
    }
}
