//! Error types for kraken-tsv-report

use std::time::Duration;

use thiserror::Error;

use crate::types::TaxId;

/// Result type alias for report operations
pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A Kraken2 output line that cannot be read as a record
    #[error("Malformed Kraken2 record at line {line}: {msg}")]
    MalformedRecord { line: usize, msg: String },

    /// A hit-list token that is not `taxon:count`; skipped by the scorer
    #[error("Malformed hit token '{0}'")]
    MalformedToken(String),

    /// A hit list with no countable token, so confidence is undefined
    #[error("Classification string has no k-mer counts: '{0}'")]
    EmptyClassification(String),

    #[error("Lineage resolution is missing {} taxa: {}", .missing.len(), format_ids(.missing))]
    ResolutionGap { missing: Vec<TaxId> },

    #[error("Invalid lineage for taxon {tax_id}: {msg}")]
    InvalidLineage { tax_id: TaxId, msg: String },

    #[error("Taxon {tax_id} appears at depth {first} and at depth {second}")]
    InconsistentDepth {
        tax_id: TaxId,
        first: usize,
        second: usize,
    },

    #[error("Lineage resolver failed: {0}")]
    Resolver(String),

    #[error("Lineage resolver timed out after {0:?}")]
    ResolverTimeout(Duration),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn format_ids(ids: &[TaxId]) -> String {
    const SHOWN: usize = 10;
    let mut out: Vec<String> = ids.iter().take(SHOWN).map(|id| id.to_string()).collect();
    if ids.len() > SHOWN {
        out.push("...".to_string());
    }
    out.join(", ")
}
