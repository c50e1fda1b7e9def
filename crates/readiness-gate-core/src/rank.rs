use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{bounded_sample, GateError};
use crate::record::{Priority, Record, RecordStore};

/// A record with its position in the priority-only ordering.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedRecord {
    pub rank: usize,
    pub priority: Priority,
    pub created_at: f64,
    pub record: Record,
}

impl RankedRecord {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.record.key
    }

    #[must_use]
    pub fn priority_ordinal(&self) -> u8 {
        self.priority.ordinal()
    }
}

/// Result of one ranking pass. Ranks are `1..=len()` in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    field_names: Vec<String>,
    records: Vec<RankedRecord>,
}

impl Ranking {
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    #[must_use]
    pub fn records(&self) -> &[RankedRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first `k` ranked records (all of them when `k` exceeds the length).
    #[must_use]
    pub fn prefix(&self, k: usize) -> &[RankedRecord] {
        &self.records[..k.min(self.records.len())]
    }
}

/// Ascending (priority ordinal, created_at, key). Keys compare byte-wise.
///
/// Timestamps are finite here, so `-0` and `0` compare equal and fall through
/// to the key.
fn cmp_rank_key(lhs: &RankedRecord, rhs: &RankedRecord) -> Ordering {
    lhs.priority
        .ordinal()
        .cmp(&rhs.priority.ordinal())
        .then_with(|| lhs.created_at.partial_cmp(&rhs.created_at).unwrap_or(Ordering::Equal))
        .then_with(|| lhs.record.key.cmp(&rhs.record.key))
}

/// Rank every record of `store` by priority, then age, then key.
///
/// # Errors
/// Returns [`GateError::UnknownPriority`] with every distinct unmapped value, or
/// [`GateError::TimestampParse`] when any `created_at` is not a finite number.
/// Priorities are validated before timestamps.
pub fn rank_records(store: RecordStore) -> Result<Ranking, GateError> {
    let (field_names, records) = store.into_parts();
    let mut ranked = parse_ranked(records)?;

    // Stable; keys are unique so the order is total.
    ranked.sort_by(cmp_rank_key);
    number_in_order(&mut ranked);

    tracing::info!(records = ranked.len(), "ranked records by priority");
    Ok(Ranking { field_names, records: ranked })
}

/// Validate priorities, then timestamps, and lift every record into an
/// unnumbered [`RankedRecord`] in input order.
pub(crate) fn parse_ranked(records: Vec<Record>) -> Result<Vec<RankedRecord>, GateError> {
    let parsed = records
        .iter()
        .map(|record| (record.priority_level(), record.created_at_numeric()))
        .collect::<Vec<_>>();

    let unknown = records
        .iter()
        .zip(&parsed)
        .filter(|(_, (priority, _))| priority.is_none())
        .map(|(record, _)| record.priority.clone())
        .collect::<BTreeSet<_>>();
    if !unknown.is_empty() {
        return Err(GateError::UnknownPriority { values: unknown.into_iter().collect() });
    }

    let unparsable = records
        .iter()
        .zip(&parsed)
        .filter(|(_, (_, created_at))| created_at.is_none())
        .map(|(record, _)| record.key.clone());
    let (keys, total) = bounded_sample(unparsable);
    if total > 0 {
        return Err(GateError::TimestampParse { keys, total });
    }

    Ok(records
        .into_iter()
        .zip(parsed)
        .filter_map(|(record, parsed)| match parsed {
            (Some(priority), Some(created_at)) => {
                Some(RankedRecord { rank: 0, priority, created_at, record })
            }
            _ => None,
        })
        .collect())
}

pub(crate) fn number_in_order(ranked: &mut [RankedRecord]) {
    for (index, item) in ranked.iter_mut().enumerate() {
        item.rank = index + 1;
    }
}
