use crate::error::GateError;
use crate::gate::{evaluate_gate, GateOutcome, GateRule, ResolvedGate};
use crate::join::join_signals;
use crate::rank::{rank_records, Ranking};
use crate::record::RecordStore;
use crate::report::{build_gate_report, build_gate_report_all, GateReportAll};
use crate::signal::SignalTable;
use crate::topk::{freeze_top_k, TopKSet};

/// Gate outcomes and reports for a batch of Top-K sets.
#[derive(Debug, Clone, PartialEq)]
pub struct GateRun {
    pub gate: ResolvedGate,
    pub outcomes: Vec<GateOutcome>,
    pub report: GateReportAll,
}

/// Every artifact of one batch run, in stage order.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub ranking: Ranking,
    pub top_k: Vec<TopKSet>,
    pub gated: GateRun,
}

/// Join and gate already-frozen Top-K sets.
///
/// Every K is joined before any K is evaluated, so a join failure for one K
/// leaves no gate outcome for any K. Set order is kept as given.
///
/// # Errors
/// Returns [`GateError::InvalidConfig`] for an empty batch or a repeated K,
/// and propagates gate resolution and join errors.
pub fn gate_top_k(
    top_k: &[TopKSet],
    signals: &SignalTable,
    rule: &GateRule,
) -> Result<GateRun, GateError> {
    if top_k.is_empty() {
        return Err(GateError::InvalidConfig("at least one K value is required".to_string()));
    }
    if top_k.windows(2).any(|pair| pair[0].k() >= pair[1].k()) {
        return Err(GateError::InvalidConfig(
            "Top-K sets must be given in strictly increasing K order".to_string(),
        ));
    }
    let gate = rule.resolve(signals)?;

    let joined = top_k
        .iter()
        .map(|set| join_signals(set, signals))
        .collect::<Result<Vec<_>, _>>()?;
    let outcomes = joined.into_iter().map(|set| evaluate_gate(set, &gate)).collect::<Vec<_>>();

    let reports = outcomes.iter().map(|outcome| build_gate_report(outcome, &gate)).collect();
    let report = build_gate_report_all(&gate, reports);
    Ok(GateRun { gate, outcomes, report })
}

/// Rank, freeze, join and gate in one pass.
///
/// # Errors
/// Propagates the first [`GateError`] raised by any stage.
pub fn run_pipeline(
    store: RecordStore,
    signals: &SignalTable,
    ks: &[usize],
    rule: &GateRule,
) -> Result<PipelineRun, GateError> {
    let ranking = rank_records(store)?;
    let top_k = freeze_top_k(&ranking, ks)?;
    let gated = gate_top_k(&top_k, signals, rule)?;

    tracing::info!(
        rule = gated.gate.rule_name(),
        records = ranking.len(),
        ks = ?gated.report.ks,
        "gate pipeline completed"
    );
    Ok(PipelineRun { ranking, top_k, gated })
}
