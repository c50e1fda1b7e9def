use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signal::{SignalKind, SignalTable, SignalValue};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalColumnAudit {
    pub present: usize,
    pub not_computable: usize,
    pub absent: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Present values are sorted in table order. A readiness signal that tracks
    /// row order usually means the scorer saw the ranking.
    pub monotonic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalAudit {
    pub rows: usize,
    pub signals: BTreeMap<SignalKind, SignalColumnAudit>,
    pub ok: bool,
}

fn is_monotonic(values: &[f64]) -> bool {
    if values.len() < 2 {
        return false;
    }
    let non_decreasing = values.windows(2).all(|pair| pair[0] <= pair[1]);
    let non_increasing = values.windows(2).all(|pair| pair[0] >= pair[1]);
    non_decreasing || non_increasing
}

fn audit_column(table: &SignalTable, kind: SignalKind) -> SignalColumnAudit {
    let mut not_computable = 0_usize;
    let mut absent = 0_usize;
    for row in table.rows() {
        match row.value(kind) {
            SignalValue::Present(_) => {}
            SignalValue::NotComputable => not_computable += 1,
            SignalValue::Absent => absent += 1,
        }
    }

    let values = table.present_values(kind);
    SignalColumnAudit {
        present: values.len(),
        not_computable,
        absent,
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
        monotonic: is_monotonic(&values),
    }
}

/// Range, completeness and ordering checks over a signal table.
#[must_use]
pub fn audit_signals(table: &SignalTable) -> SignalAudit {
    let signals = SignalKind::ALL
        .iter()
        .map(|kind| (*kind, audit_column(table, *kind)))
        .collect::<BTreeMap<_, _>>();
    let ok = signals.values().all(|column| !column.monotonic);

    for (kind, column) in &signals {
        if column.monotonic {
            tracing::warn!(signal = kind.as_str(), "signal is monotonic in table order");
        }
    }

    SignalAudit { rows: table.len(), signals, ok }
}
