//! Deterministic priority ranking, Top-K freezing and readiness gating.
//!
//! Priority decides order; the readiness gate (C, S, V) only decides whether a
//! ranked record is ready or deferred. No stage re-ranks, and the gate never
//! sees priority.
//!
//! Stages run in a fixed order, each producing owned output for the next:
//! [`RecordStore`] → [`rank_records`] → [`freeze_top_k`] → [`join_signals`] →
//! [`evaluate_gate`] → [`build_gate_report`]. [`run_pipeline`] chains them;
//! [`gate_top_k`] gates sets restored with [`TopKSet::restore`].

mod audit;
mod error;
mod gate;
mod join;
mod pipeline;
mod rank;
mod record;
mod report;
mod signal;
mod topk;

pub use audit::{audit_signals, SignalAudit, SignalColumnAudit};
pub use error::{GateError, DIAGNOSTIC_SAMPLE_LIMIT};
pub use gate::{
    evaluate_gate, quantile, reasons_for, AbsoluteThresholds, GateConfig, GateOutcome, GateRule,
    GateThresholds, GatedRecord, QuantileThresholds, ReasonCode, ResolvedGate, RULE_V1, RULE_V2,
};
pub use join::{join_signals, JoinedRecord, JoinedSet, Signals};
pub use pipeline::{gate_top_k, run_pipeline, GateRun, PipelineRun};
pub use rank::{rank_records, RankedRecord, Ranking};
pub use record::{parse_finite, Priority, Record, RecordStore};
pub use report::{
    build_baseline_summary, build_gate_report, build_gate_report_all, BaselineSummary,
    GateReport, GateReportAll, OrderingDescription,
};
pub use signal::{SignalKind, SignalRow, SignalTable, SignalValue};
pub use topk::{freeze_top_k, normalize_ks, top_k_artifact_name, TopKSet};
