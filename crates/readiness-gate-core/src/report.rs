use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gate::{GateOutcome, GateThresholds, ResolvedGate};
use crate::rank::{RankedRecord, Ranking};
use crate::record::Priority;

const BASELINE_PREVIEW_LEN: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReport {
    #[serde(rename = "K")]
    pub k: usize,
    pub baseline_count: usize,
    pub ready_count: usize,
    pub deferred_count: usize,
    pub deferred_rate: f64,
    pub deferred_reason_counts: BTreeMap<String, usize>,
    pub thresholds: GateThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReportAll {
    pub gate_rule: String,
    pub thresholds: GateThresholds,
    pub ks: Vec<usize>,
    pub per_k: BTreeMap<usize, GateReport>,
}

/// Summarize one K. A record carrying several reasons counts in each bucket.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_gate_report(outcome: &GateOutcome, gate: &ResolvedGate) -> GateReport {
    let baseline_count = outcome.records.len();
    let deferred = outcome.deferred();
    let deferred_count = deferred.len();

    let mut deferred_reason_counts = BTreeMap::new();
    for record in &deferred {
        for code in &record.reason_codes {
            *deferred_reason_counts.entry(code.as_str().to_string()).or_insert(0_usize) += 1;
        }
    }

    let deferred_rate = if baseline_count == 0 {
        0.0
    } else {
        deferred_count as f64 / baseline_count as f64
    };

    GateReport {
        k: outcome.k,
        baseline_count,
        ready_count: baseline_count - deferred_count,
        deferred_count,
        deferred_rate,
        deferred_reason_counts,
        thresholds: gate.thresholds(),
    }
}

#[must_use]
pub fn build_gate_report_all(gate: &ResolvedGate, reports: Vec<GateReport>) -> GateReportAll {
    let per_k = reports.into_iter().map(|report| (report.k, report)).collect::<BTreeMap<_, _>>();
    GateReportAll {
        gate_rule: gate.rule_name().to_string(),
        thresholds: gate.thresholds(),
        ks: per_k.keys().copied().collect(),
        per_k,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderingDescription {
    pub primary: String,
    pub tie_breakers: Vec<String>,
}

/// Sanity summary written next to the ranked baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineSummary {
    pub rows: usize,
    pub priority_distribution: BTreeMap<Priority, usize>,
    pub ordering: OrderingDescription,
    pub top10_keys: Vec<String>,
}

#[must_use]
pub fn build_baseline_summary(ranking: &Ranking) -> BaselineSummary {
    let mut priority_distribution = BTreeMap::new();
    for ranked in ranking.records() {
        *priority_distribution.entry(ranked.priority).or_insert(0_usize) += 1;
    }

    BaselineSummary {
        rows: ranking.len(),
        priority_distribution,
        ordering: OrderingDescription {
            primary: format!(
                "priority ({})",
                Priority::ALL.iter().map(|level| level.as_str()).collect::<Vec<_>>().join(" > ")
            ),
            tie_breakers: vec!["created_at (older first)".to_string(), "key (asc)".to_string()],
        },
        top10_keys: ranking
            .prefix(BASELINE_PREVIEW_LEN)
            .iter()
            .map(RankedRecord::key)
            .map(str::to_string)
            .collect(),
    }
}
