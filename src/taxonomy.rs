// src/taxonomy.rs

use ahash::{AHashMap, AHashSet};

use crate::error::{ReportError, Result};
use crate::types::{LineageMap, TaxId, Taxon, ROOT_TAXID, UNCLASSIFIED_TAXID};

/// Single-letter code shown in the report's rank column.
pub fn rank_code(rank: &str) -> String {
    match rank {
        "no rank" | "" => "-".to_string(),
        "superkingdom" => "D".to_string(),
        _ => rank
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_else(|| "-".to_string()),
    }
}

/// Every taxon seen in any resolved lineage, plus the ancestor path of each assigned taxon.
/// Built once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TaxonTable {
    taxa: AHashMap<TaxId, Taxon>,
    /// assigned taxon -> ids from the root down to the taxon itself
    paths: AHashMap<TaxId, Vec<TaxId>>,
}

impl TaxonTable {
    /// Merge the lineages of `assigned` into one table.
    ///
    /// Fails with `ResolutionGap` if any assigned id has no lineage, and with
    /// `InvalidLineage`/`InconsistentDepth` if the lineages contradict each other.
    pub fn build(assigned: &[TaxId], lineages: &LineageMap) -> Result<Self> {
        let mut missing: Vec<TaxId> = assigned
            .iter()
            .copied()
            .filter(|id| *id != UNCLASSIFIED_TAXID && !lineages.contains_key(id))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(ReportError::ResolutionGap { missing });
        }

        let mut taxa: AHashMap<TaxId, Taxon> = AHashMap::new();
        let mut paths: AHashMap<TaxId, Vec<TaxId>> = AHashMap::with_capacity(assigned.len());

        for &tax_id in assigned {
            if tax_id == UNCLASSIFIED_TAXID || paths.contains_key(&tax_id) {
                continue;
            }
            let lineage = &lineages[&tax_id];

            match lineage.last() {
                Some(last) if last.tax_id == tax_id => {}
                Some(last) => {
                    return Err(ReportError::InvalidLineage {
                        tax_id,
                        msg: format!("lineage ends at {} instead", last.tax_id),
                    })
                }
                None => {
                    return Err(ReportError::InvalidLineage {
                        tax_id,
                        msg: "lineage is empty".to_string(),
                    })
                }
            }

            let mut seen = AHashSet::with_capacity(lineage.len());
            let mut path = Vec::with_capacity(lineage.len());
            for (depth, node) in lineage.iter().enumerate() {
                if !seen.insert(node.tax_id) {
                    return Err(ReportError::InvalidLineage {
                        tax_id,
                        msg: format!("taxon {} occurs twice", node.tax_id),
                    });
                }

                match taxa.get(&node.tax_id) {
                    Some(known) if known.depth != depth => {
                        return Err(ReportError::InconsistentDepth {
                            tax_id: node.tax_id,
                            first: known.depth,
                            second: depth,
                        })
                    }
                    Some(_) => {}
                    None => {
                        taxa.insert(
                            node.tax_id,
                            Taxon::new(node.tax_id, &node.rank, &node.name, depth),
                        );
                    }
                }
                path.push(node.tax_id);
            }
            paths.insert(tax_id, path);
        }

        // synthetic entries win over whatever the resolver said
        taxa.insert(UNCLASSIFIED_TAXID, Taxon::unclassified());
        match taxa.get_mut(&ROOT_TAXID) {
            Some(root) => {
                root.rank = "root".to_string();
                root.name = "root".to_string();
            }
            None => {
                taxa.insert(ROOT_TAXID, Taxon::root());
            }
        }

        log::debug!(
            "Taxon table holds {} taxa for {} assigned ids",
            taxa.len(),
            paths.len()
        );
        Ok(TaxonTable { taxa, paths })
    }

    pub fn get(&self, tax_id: TaxId) -> Option<&Taxon> {
        self.taxa.get(&tax_id)
    }

    pub fn contains(&self, tax_id: TaxId) -> bool {
        self.taxa.contains_key(&tax_id)
    }

    /// Root-to-taxon id path of an assigned taxon, the taxon itself last.
    pub fn path(&self, tax_id: TaxId) -> Option<&[TaxId]> {
        self.paths.get(&tax_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Taxon> {
        self.taxa.values()
    }
}
