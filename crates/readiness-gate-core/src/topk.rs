use std::collections::BTreeSet;

use crate::error::GateError;
use crate::rank::{number_in_order, parse_ranked, RankedRecord, Ranking};
use crate::record::RecordStore;

/// Frozen prefix of a ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct TopKSet {
    k: usize,
    field_names: Vec<String>,
    records: Vec<RankedRecord>,
}

impl TopKSet {
    /// Rebuild a set from previously frozen rows, already in rank order.
    ///
    /// Rows are numbered `1..=k` in the order given and are never re-sorted.
    ///
    /// # Errors
    /// Returns [`GateError::InvalidConfig`] when the row count is not `k`, and
    /// the same priority and timestamp errors as ranking.
    pub fn restore(k: usize, store: RecordStore) -> Result<Self, GateError> {
        if store.len() != k {
            return Err(GateError::InvalidConfig(format!(
                "frozen Top-K set for K={k} holds {} record(s)",
                store.len()
            )));
        }
        let (field_names, records) = store.into_parts();
        let mut records = parse_ranked(records)?;
        number_in_order(&mut records);
        Ok(Self { k, field_names, records })
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

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

    #[must_use]
    pub fn artifact_name(&self) -> String {
        top_k_artifact_name(self.k)
    }
}

#[must_use]
pub fn top_k_artifact_name(k: usize) -> String {
    format!("baseline_topk_{k}.csv")
}

/// Sort and de-duplicate requested K values.
///
/// # Errors
/// Returns [`GateError::InvalidConfig`] when no K is requested.
pub fn normalize_ks(ks: &[usize]) -> Result<Vec<usize>, GateError> {
    let normalized = ks.iter().copied().collect::<BTreeSet<_>>();
    if normalized.is_empty() {
        return Err(GateError::InvalidConfig("at least one K value is required".to_string()));
    }
    Ok(normalized.into_iter().collect())
}

/// Freeze one prefix of `ranking` per requested K.
///
/// All K values are checked before any set is produced.
///
/// # Errors
/// Returns [`GateError::InsufficientRecords`] when the largest K exceeds the
/// number of ranked records, or [`GateError::InvalidConfig`] for an empty request.
pub fn freeze_top_k(ranking: &Ranking, ks: &[usize]) -> Result<Vec<TopKSet>, GateError> {
    let ks = normalize_ks(ks)?;
    let max_k = ks.last().copied().unwrap_or_default();
    if max_k > ranking.len() {
        return Err(GateError::InsufficientRecords { requested: max_k, available: ranking.len() });
    }

    let sets = ks
        .into_iter()
        .map(|k| TopKSet {
            k,
            field_names: ranking.field_names().to_vec(),
            records: ranking.prefix(k).to_vec(),
        })
        .collect::<Vec<_>>();
    tracing::debug!(sets = sets.len(), max_k, "froze top-k sets");
    Ok(sets)
}
