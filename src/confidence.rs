// src/confidence.rs

use ahash::AHashMap;

use crate::error::{ReportError, Result};
use crate::types::{TaxId, UNCLASSIFIED_TAXID};

/// What a hit-list token points at: a taxon, or Kraken2's `A` marker for ambiguous k-mers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitTarget {
    Taxon(TaxId),
    Ambiguous,
}

/// Breakdown of one hit list.
#[derive(Debug, Clone, PartialEq)]
pub struct HitScore {
    /// Sum of counts over all valid tokens
    pub total: u64,
    /// Most supported target; first one seen wins a tie
    pub top: HitTarget,
    pub top_count: u64,
    /// Tokens dropped because they were not `taxon:count`
    pub skipped_tokens: usize,
}

impl HitScore {
    /// Fraction of all counted k-mers that support `top`, in `[0, 1]`.
    #[inline]
    pub fn confidence(&self) -> f64 {
        self.top_count as f64 / self.total as f64
    }
}

/// Parse one `taxon:count` token. `Ok(None)` is the paired-end delimiter `|:|`.
fn parse_hit_token(token: &str) -> Result<Option<(HitTarget, u64)>> {
    let malformed = || ReportError::MalformedToken(token.to_string());

    let mut fields = token.split(':');
    let (taxon, count) = match (fields.next(), fields.next(), fields.next()) {
        (Some(taxon), Some(count), None) => (taxon, count),
        _ => return Err(malformed()),
    };

    if taxon == "|" {
        return Ok(None);
    }

    let target = match taxon {
        "A" => HitTarget::Ambiguous,
        _ => HitTarget::Taxon(taxon.parse().map_err(|_| malformed())?),
    };
    let count: u64 = count.parse().map_err(|_| malformed())?;

    Ok(Some((target, count)))
}

/// Score a Kraken2 hit list such as
/// `2755405:47 0:2 2755405:2 |:| 816:11 A:3`.
///
/// Malformed tokens are skipped. Fails with `EmptyClassification` when nothing was counted.
pub fn score_hitlist(hitlist: &str) -> Result<HitScore> {
    // first-seen order decides ties
    let mut order: Vec<(HitTarget, u64)> = Vec::new();
    let mut index: AHashMap<HitTarget, usize> = AHashMap::new();
    let mut total = 0u64;
    let mut skipped_tokens = 0usize;

    for token in hitlist.split_whitespace() {
        let (target, count) = match parse_hit_token(token) {
            Ok(Some(hit)) => hit,
            Ok(None) => continue,
            Err(e) => {
                log::trace!("{e}");
                skipped_tokens += 1;
                continue;
            }
        };

        // a per-target sum never exceeds the total
        total = match total.checked_add(count) {
            Some(t) => t,
            None => {
                log::trace!("{}", ReportError::MalformedToken(token.to_string()));
                skipped_tokens += 1;
                continue;
            }
        };
        match index.get(&target) {
            Some(&i) => order[i].1 += count,
            None => {
                index.insert(target, order.len());
                order.push((target, count));
            }
        }
    }

    if total == 0 {
        return Err(ReportError::EmptyClassification(hitlist.to_string()));
    }

    let mut best = order[0];
    for &(target, count) in &order[1..] {
        if count > best.1 {
            best = (target, count);
        }
    }

    Ok(HitScore {
        total,
        top: best.0,
        top_count: best.1,
        skipped_tokens,
    })
}

/// Return the confidence of a Kraken2 classification.
pub fn kraken2_confidence(hitlist: &str) -> Result<f64> {
    score_hitlist(hitlist).map(|score| score.confidence())
}

/// Return the most supported target and the confidence of a Kraken2 classification.
/// The target is zeroed (unclassified) when confidence is below `min_confidence`.
pub fn kraken2_tax_confidence(hitlist: &str, min_confidence: f64) -> Result<(HitTarget, f64)> {
    let score = score_hitlist(hitlist)?;
    let confidence = score.confidence();

    if confidence < min_confidence {
        return Ok((HitTarget::Taxon(UNCLASSIFIED_TAXID), confidence));
    }
    Ok((score.top, confidence))
}
