// src/abundance.rs

use ahash::AHashMap;
use rayon::prelude::*;

use crate::confidence::kraken2_confidence;
use crate::error::{ReportError, Result};
use crate::taxonomy::TaxonTable;
use crate::types::{AbundanceRecord, KrakenRecord, TaxId, ROOT_TAXID, UNCLASSIFIED_TAXID};

/// taxon -> reads assigned exactly to it
pub type DirectCounts = AHashMap<TaxId, u64>;

/// Per-read filtering outcome, summed over all reads.
#[derive(Default, Debug, Clone)]
pub struct ReadTally {
    pub direct_counts: DirectCounts,
    pub total: u64,
    pub unclassified: u64,
    pub classified: u64,
    /// Classified reads whose confidence reached the threshold
    pub confident: u64,
    /// Classified reads with no countable hit; scored as confidence 0
    pub empty_classifications: u64,
}

impl ReadTally {
    fn add(&mut self, record: &KrakenRecord, min_confidence: f64) {
        self.total += 1;
        if record.is_unclassified() {
            self.unclassified += 1;
            *self.direct_counts.entry(UNCLASSIFIED_TAXID).or_insert(0) += 1;
            return;
        }
        self.classified += 1;

        let confidence = match kraken2_confidence(&record.hitlist) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("Read {}: {e}", record.read_id);
                self.empty_classifications += 1;
                0.0
            }
        };
        if confidence >= min_confidence {
            self.confident += 1;
            *self.direct_counts.entry(record.tax_id).or_insert(0) += 1;
        }
    }

    fn merge(mut self, other: ReadTally) -> ReadTally {
        self.total += other.total;
        self.unclassified += other.unclassified;
        self.classified += other.classified;
        self.confident += other.confident;
        self.empty_classifications += other.empty_classifications;

        self.direct_counts.reserve(other.direct_counts.len());
        for (taxid, count) in other.direct_counts {
            *self.direct_counts.entry(taxid).or_insert(0) += count;
        }
        self
    }

    /// Distinct classified taxa that kept at least one read, ascending.
    pub fn assigned_taxa(&self) -> Vec<TaxId> {
        let mut ids: Vec<TaxId> = self
            .direct_counts
            .iter()
            .filter(|&(&id, &count)| id != UNCLASSIFIED_TAXID && count > 0)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Score and count every read in parallel, folding into per-thread tallies.
pub fn tally_reads(records: &[KrakenRecord], min_confidence: f64) -> ReadTally {
    records
        .par_iter()
        .fold(ReadTally::default, |mut acc, record| {
            acc.add(record, min_confidence);
            acc
        })
        .reduce(ReadTally::default, ReadTally::merge)
}

/// Direct and clade read counts for every taxon in a `TaxonTable`.
#[derive(Debug, Clone, Default)]
pub struct AbundanceTable {
    records: AHashMap<TaxId, AbundanceRecord>,
}

impl AbundanceTable {
    /// Push each assigned taxon's direct count onto itself and every ancestor on its path.
    ///
    /// The unclassified bucket keeps `cumulative == direct` and is never propagated.
    pub fn aggregate(direct_counts: &DirectCounts, taxonomy: &TaxonTable) -> Result<Self> {
        let mut records: AHashMap<TaxId, AbundanceRecord> = taxonomy
            .iter()
            .map(|taxon| (taxon.tax_id, AbundanceRecord::default()))
            .collect();

        let unclassified = direct_counts.get(&UNCLASSIFIED_TAXID).copied().unwrap_or(0);
        records.insert(
            UNCLASSIFIED_TAXID,
            AbundanceRecord {
                direct_count: unclassified,
                cumulative_count: unclassified,
            },
        );

        // All paths are checked before any counter moves
        let mut work: Vec<(u64, &[TaxId])> = Vec::with_capacity(direct_counts.len());
        let mut missing: Vec<TaxId> = Vec::new();
        for (&tax_id, &count) in direct_counts {
            if tax_id == UNCLASSIFIED_TAXID || count == 0 {
                continue;
            }
            match taxonomy.path(tax_id) {
                Some(path) => {
                    missing.extend(path.iter().copied().filter(|id| !taxonomy.contains(*id)));
                    work.push((count, path));
                }
                None => missing.push(tax_id),
            }
            if let Some(record) = records.get_mut(&tax_id) {
                record.direct_count = count;
            }
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(ReportError::ResolutionGap { missing });
        }

        // Each worker sums into its own map; maps are merged by addition
        let clade_sums: AHashMap<TaxId, u64> = work
            .par_iter()
            .fold(AHashMap::new, |mut acc, &(count, path)| {
                for &node in path {
                    *acc.entry(node).or_insert(0) += count;
                }
                acc
            })
            .reduce(AHashMap::new, |mut a, b| {
                a.reserve(b.len());
                for (taxid, count) in b {
                    *a.entry(taxid).or_insert(0) += count;
                }
                a
            });

        for (taxid, count) in clade_sums {
            if let Some(record) = records.get_mut(&taxid) {
                record.cumulative_count += count;
            }
        }

        log::debug!(
            "Propagated {} assigned taxa over {} lineage steps",
            work.len(),
            work.iter().map(|(_, p)| p.len()).sum::<usize>()
        );
        Ok(AbundanceTable { records })
    }

    pub fn get(&self, tax_id: TaxId) -> Option<&AbundanceRecord> {
        self.records.get(&tax_id)
    }

    pub fn direct_count(&self, tax_id: TaxId) -> u64 {
        self.get(tax_id).map(|r| r.direct_count).unwrap_or(0)
    }

    pub fn cumulative_count(&self, tax_id: TaxId) -> u64 {
        self.get(tax_id).map(|r| r.cumulative_count).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaxId, &AbundanceRecord)> {
        self.records.iter().map(|(&id, r)| (id, r))
    }

    pub fn direct_sum(&self) -> u64 {
        self.records.values().map(|r| r.direct_count).sum()
    }

    pub fn cumulative_sum(&self) -> u64 {
        self.records.values().map(|r| r.cumulative_count).sum()
    }

    /// Whether the root clade holds exactly `expected` reads. Logs a warning when it does not.
    pub fn check_root(&self, expected: u64) -> bool {
        let root = self.cumulative_count(ROOT_TAXID);
        if root != expected {
            log::warn!(
                "Root clade holds {root} reads but {expected} classified reads passed the filter"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LineageMap, LineagePath, Taxon};

    fn record(tax_id: TaxId, hitlist: &str) -> KrakenRecord {
        KrakenRecord {
            status: if tax_id == 0 { 'U' } else { 'C' },
            read_id: format!("read_{tax_id}"),
            tax_id,
            length: "150".to_string(),
            hitlist: hitlist.to_string(),
        }
    }

    fn path(ids: &[TaxId]) -> LineagePath {
        ids.iter()
            .enumerate()
            .map(|(d, &id)| Taxon::new(id, "no rank", &format!("taxon {id}"), d))
            .collect()
    }

    /// root(1) -> 2 -> 20 -> 200, and root -> 3
    fn lineages() -> LineageMap {
        let mut map = LineageMap::new();
        map.insert(200, path(&[1, 2, 20, 200]));
        map.insert(20, path(&[1, 2, 20]));
        map.insert(3, path(&[1, 3]));
        map.insert(1, path(&[1]));
        map
    }

    fn counts(pairs: &[(TaxId, u64)]) -> DirectCounts {
        pairs.iter().copied().collect()
    }

    #[test]
    fn tally_filters_on_confidence() {
        let reads = vec![
            record(0, "0:10"),
            record(3, "3:10"),
            record(3, "3:5 2:5"),
            record(20, "20:1 0:1 5:1"),
            record(200, ""),
        ];
        let tally = tally_reads(&reads, 0.5);
        assert_eq!(tally.total, 5);
        assert_eq!(tally.unclassified, 1);
        assert_eq!(tally.classified, 4);
        assert_eq!(tally.confident, 2);
        assert_eq!(tally.empty_classifications, 1);
        assert_eq!(tally.direct_counts[&3], 2);
        assert_eq!(tally.direct_counts[&0], 1);
        assert!(!tally.direct_counts.contains_key(&20));
        assert_eq!(tally.assigned_taxa(), vec![3]);
    }

    #[test]
    fn empty_hitlists_pass_a_zero_threshold() {
        let tally = tally_reads(&[record(200, "")], 0.0);
        assert_eq!(tally.confident, 1);
        assert_eq!(tally.empty_classifications, 1);
    }

    #[test]
    fn clade_counts_include_descendants() {
        let direct = counts(&[(200, 4), (20, 1), (3, 2), (1, 1), (0, 5)]);
        let taxonomy = TaxonTable::build(&[200, 20, 3, 1], &lineages()).unwrap();
        let table = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();

        assert_eq!(table.cumulative_count(200), 4);
        assert_eq!(table.cumulative_count(20), 5);
        assert_eq!(table.cumulative_count(2), 5);
        assert_eq!(table.direct_count(2), 0);
        assert_eq!(table.cumulative_count(3), 2);
        assert_eq!(table.cumulative_count(1), 8);
        assert_eq!(table.direct_count(1), 1);
        assert_eq!(table.cumulative_count(0), 5);
        assert!(table.check_root(8));

        for (_, r) in table.iter() {
            assert!(r.cumulative_count >= r.direct_count);
        }
        assert_eq!(table.direct_sum(), 13);
    }

    #[test]
    fn assigned_ancestors_still_receive_descendant_counts() {
        let direct = counts(&[(200, 3), (20, 2)]);
        let taxonomy = TaxonTable::build(&[200, 20], &lineages()).unwrap();
        let table = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();
        assert_eq!(table.direct_count(20), 2);
        assert_eq!(table.cumulative_count(20), 5);
    }

    #[test]
    fn direct_count_without_lineage_is_a_gap() {
        let direct = counts(&[(200, 3), (999, 1)]);
        let taxonomy = TaxonTable::build(&[200], &lineages()).unwrap();
        match AbundanceTable::aggregate(&direct, &taxonomy) {
            Err(ReportError::ResolutionGap { missing }) => assert_eq!(missing, vec![999]),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn root_check_reports_mismatch() {
        let direct = counts(&[(3, 2)]);
        let taxonomy = TaxonTable::build(&[3], &lineages()).unwrap();
        let table = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();
        assert!(!table.check_root(3));
    }

    #[test]
    fn aggregation_is_repeatable() {
        let direct = counts(&[(200, 7), (20, 1), (3, 9), (0, 2)]);
        let taxonomy = TaxonTable::build(&[200, 20, 3], &lineages()).unwrap();
        let a = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();
        let b = AbundanceTable::aggregate(&direct, &taxonomy).unwrap();
        for (id, r) in a.iter() {
            assert_eq!(b.get(id), Some(r));
        }
        assert_eq!(a.cumulative_sum(), b.cumulative_sum());
    }
}
