use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use readiness_gate_core::{BaselineSummary, GateRun, Ranking};

use crate::artifact::{json_bytes, write_atomic};
use crate::table::{gated_csv, ranked_csv, GatedSelection, RecordColumns};

pub const GATE_REPORT_ALL_FILE: &str = "gate_report_all.json";

#[must_use]
pub fn ready_artifact_name(k: usize) -> String {
    format!("topk_{k}_ready.csv")
}

#[must_use]
pub fn deferred_artifact_name(k: usize) -> String {
    format!("topk_{k}_deferred.csv")
}

#[must_use]
pub fn gate_report_name(k: usize) -> String {
    format!("gate_report_topk_{k}.json")
}

/// Write the ranked baseline and, when `report` is given, its summary.
///
/// # Errors
/// Returns an error when rendering or either write fails.
pub fn write_ranked_baseline(
    out: &Path,
    report: Option<&Path>,
    ranking: &Ranking,
    summary: &BaselineSummary,
    columns: &RecordColumns,
) -> Result<()> {
    let csv = ranked_csv(ranking.records(), ranking.field_names(), columns)?;
    let summary_bytes = json_bytes(summary)?;

    write_atomic(out, &csv)?;
    if let Some(report) = report {
        write_atomic(report, &summary_bytes)?;
    }
    Ok(())
}

/// Write ready/deferred tables and reports for every K of a gate run.
///
/// Returns the written file names relative to `out_dir`, in write order.
///
/// # Errors
/// Returns an error when rendering or any write fails. Nothing is written when
/// rendering fails.
pub fn write_gate_artifacts(
    out_dir: &Path,
    gated: &GateRun,
    columns: &RecordColumns,
) -> Result<Vec<String>> {
    let mut rendered: Vec<(String, Vec<u8>)> = Vec::new();
    for outcome in &gated.outcomes {
        let k = outcome.k;
        let ready = gated_csv(outcome, GatedSelection::Ready, columns)
            .with_context(|| format!("failed to render ready table for K={k}"))?;
        let deferred = gated_csv(outcome, GatedSelection::Deferred, columns)
            .with_context(|| format!("failed to render deferred table for K={k}"))?;
        rendered.push((ready_artifact_name(k), ready));
        rendered.push((deferred_artifact_name(k), deferred));
        if let Some(report) = gated.report.per_k.get(&k) {
            rendered.push((gate_report_name(k), json_bytes(report)?));
        }
    }
    rendered.push((GATE_REPORT_ALL_FILE.to_string(), json_bytes(&gated.report)?));

    let mut written = Vec::with_capacity(rendered.len());
    for (name, bytes) in rendered {
        let path: PathBuf = out_dir.join(&name);
        write_atomic(&path, &bytes)?;
        written.push(name);
    }

    tracing::info!(out_dir = %out_dir.display(), files = written.len(), "wrote gate artifacts");
    Ok(written)
}
