use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{bounded_sample, GateError};
use crate::rank::RankedRecord;
use crate::signal::{SignalRow, SignalTable};
use crate::topk::TopKSet;

/// C/S/V after a successful join. `None` marks a value the scorer could not compute.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Signals {
    #[serde(rename = "C")]
    pub c: Option<f64>,
    #[serde(rename = "S")]
    pub s: Option<f64>,
    #[serde(rename = "V")]
    pub v: Option<f64>,
}

impl Signals {
    #[must_use]
    pub fn new(c: f64, s: f64, v: f64) -> Self {
        Self { c: Some(c), s: Some(s), v: Some(v) }
    }

    /// All three values, or `None` when any is not computable.
    #[must_use]
    pub fn complete(&self) -> Option<(f64, f64, f64)> {
        Some((self.c?, self.s?, self.v?))
    }

    fn from_row(row: &SignalRow) -> Self {
        Self { c: row.c.present(), s: row.s.present(), v: row.v.present() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub ranked: RankedRecord,
    pub signals: Signals,
    pub signal_fields: Vec<String>,
}

/// One Top-K set with its signals attached, still in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedSet {
    pub k: usize,
    pub field_names: Vec<String>,
    pub signal_field_names: Vec<String>,
    pub records: Vec<JoinedRecord>,
}

/// Left-join `top_k` with `table` on the record key.
///
/// # Errors
/// Returns [`GateError::CardinalityViolation`] when a Top-K key matches more than
/// one signal row, and [`GateError::MissingSignals`] when any joined record has no
/// value at all for C, S or V.
pub fn join_signals(top_k: &TopKSet, table: &SignalTable) -> Result<JoinedSet, GateError> {
    let mut by_key: BTreeMap<&str, Vec<&SignalRow>> = BTreeMap::new();
    for row in table.rows() {
        by_key.entry(row.key.as_str()).or_default().push(row);
    }

    let ambiguous = top_k
        .records()
        .iter()
        .filter(|ranked| by_key.get(ranked.key()).is_some_and(|rows| rows.len() > 1))
        .map(|ranked| ranked.key().to_string());
    let (keys, total) = bounded_sample(ambiguous);
    if total > 0 {
        return Err(GateError::CardinalityViolation { keys, total });
    }

    let incomplete = top_k
        .records()
        .iter()
        .filter(|ranked| match by_key.get(ranked.key()).and_then(|rows| rows.first()) {
            Some(row) => row.c.is_absent() || row.s.is_absent() || row.v.is_absent(),
            None => true,
        })
        .map(|ranked| ranked.key().to_string());
    let (keys, total) = bounded_sample(incomplete);
    if total > 0 {
        return Err(GateError::MissingSignals { keys, total });
    }

    let blank_fields = vec![String::new(); table.field_names().len()];
    let records = top_k
        .records()
        .iter()
        .map(|ranked| {
            let row = by_key.get(ranked.key()).and_then(|rows| rows.first());
            JoinedRecord {
                ranked: ranked.clone(),
                signals: row.map_or(Signals { c: None, s: None, v: None }, |row| {
                    Signals::from_row(row)
                }),
                signal_fields: row.map_or_else(|| blank_fields.clone(), |row| row.fields.clone()),
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(k = top_k.k(), joined = records.len(), "joined signals");
    Ok(JoinedSet {
        k: top_k.k(),
        field_names: top_k.field_names().to_vec(),
        signal_field_names: table.field_names().to_vec(),
        records,
    })
}
