use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use readiness_gate_core::{
    audit_signals, build_baseline_summary, freeze_top_k, gate_top_k, normalize_ks, rank_records,
    run_pipeline, GateError,
};
use readiness_gate_io::{
    load_gate_rule, read_frozen_top_k, read_records, read_signals, verify_freeze_manifest,
    write_frozen_top_k, write_gate_artifacts, write_json_atomic, write_ranked_baseline,
    RecordColumns, DEFAULT_CREATED_AT_COLUMN, DEFAULT_KEY_COLUMN, DEFAULT_PRIORITY_COLUMN,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const RUNTIME_ERROR_KIND: &str = "RuntimeError";
const AUDIT_FAILED_EXIT: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "rgate")]
#[command(about = "Priority-first baseline ranking with a readiness gate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rank a records table and write the ranked baseline.
    Rank(RankArgs),
    /// Freeze Top-K prefixes of the ranking with a digest manifest.
    Freeze(FreezeArgs),
    /// Check frozen Top-K artifacts against their manifest.
    VerifyFreeze(VerifyFreezeArgs),
    /// Join signals to Top-K sets and apply the readiness gate. Sets are ranked
    /// from `--records` or loaded from a verified `--frozen-dir`.
    Gate(GateArgs),
    /// Range, completeness and ordering checks on a signal table.
    AuditSignals(AuditSignalsArgs),
}

#[derive(Debug, Args)]
struct RecordColumnArgs {
    #[arg(long, default_value = DEFAULT_KEY_COLUMN)]
    key_column: String,
    #[arg(long, default_value = DEFAULT_PRIORITY_COLUMN)]
    priority_column: String,
    #[arg(long, default_value = DEFAULT_CREATED_AT_COLUMN)]
    created_at_column: String,
}

impl RecordColumnArgs {
    fn columns(&self) -> RecordColumns {
        RecordColumns {
            key: self.key_column.clone(),
            priority: self.priority_column.clone(),
            created_at: self.created_at_column.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct RankArgs {
    #[arg(long)]
    records: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    report: Option<PathBuf>,
    #[command(flatten)]
    columns: RecordColumnArgs,
}

#[derive(Debug, Args)]
struct FreezeArgs {
    #[arg(long)]
    records: PathBuf,
    #[arg(long, value_delimiter = ',', required = true)]
    ks: Vec<usize>,
    #[arg(long)]
    out_dir: PathBuf,
    #[command(flatten)]
    columns: RecordColumnArgs,
}

#[derive(Debug, Args)]
struct VerifyFreezeArgs {
    #[arg(long)]
    dir: PathBuf,
}

#[derive(Debug, Args)]
struct GateArgs {
    #[arg(long, required_unless_present = "frozen_dir", conflicts_with = "frozen_dir")]
    records: Option<PathBuf>,
    #[arg(long)]
    frozen_dir: Option<PathBuf>,
    #[arg(long)]
    signals: PathBuf,
    #[arg(long)]
    config: PathBuf,
    #[arg(long, value_delimiter = ',', required = true)]
    ks: Vec<usize>,
    #[arg(long)]
    out_dir: PathBuf,
    #[command(flatten)]
    columns: RecordColumnArgs,
    #[arg(long, default_value = DEFAULT_KEY_COLUMN)]
    signal_key_column: String,
}

#[derive(Debug, Args)]
struct AuditSignalsArgs {
    #[arg(long)]
    signals: PathBuf,
    #[arg(long, default_value = DEFAULT_KEY_COLUMN)]
    signal_key_column: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

/// Machine-readable rendering of a fatal error. Core errors keep their kind
/// and offending identifiers even when wrapped in file context.
fn error_document(err: &anyhow::Error) -> Value {
    let gate_error = err.chain().find_map(|cause| cause.downcast_ref::<GateError>());
    let (kind, offending) = gate_error
        .map_or_else(|| (RUNTIME_ERROR_KIND, Vec::new()), |gate| (gate.kind(), gate.offending()));
    with_contract_version(serde_json::json!({
        "error": {
            "kind": kind,
            "message": format!("{err:#}"),
            "offending": offending
        }
    }))
}

fn emit_error(err: &anyhow::Error) {
    match serde_json::to_string_pretty(&error_document(err)) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{err:#}"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(error = %format!("{err:#}"), "command failed");
            emit_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Rank(args) => run_rank(&args),
        Command::Freeze(args) => run_freeze(&args),
        Command::VerifyFreeze(args) => run_verify_freeze(&args),
        Command::Gate(args) => run_gate(&args),
        Command::AuditSignals(args) => run_audit_signals(&args),
    }
}

fn run_rank(args: &RankArgs) -> Result<ExitCode> {
    let columns = args.columns.columns();
    let ranking = rank_records(read_records(&args.records, &columns)?)?;
    let summary = build_baseline_summary(&ranking);
    write_ranked_baseline(&args.out, args.report.as_deref(), &ranking, &summary, &columns)?;

    emit_json(serde_json::json!({
        "records": args.records,
        "out": args.out,
        "report": args.report,
        "summary": summary
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn run_freeze(args: &FreezeArgs) -> Result<ExitCode> {
    let columns = args.columns.columns();
    let ks = normalize_ks(&args.ks)?;
    let store = read_records(&args.records, &columns)?;
    let total_records = store.len();
    let ranking = rank_records(store)?;
    let sets = freeze_top_k(&ranking, &ks)?;
    let manifest = write_frozen_top_k(&args.out_dir, &sets, total_records, &columns)?;

    emit_json(serde_json::json!({
        "out_dir": args.out_dir,
        "manifest": manifest
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn run_verify_freeze(args: &VerifyFreezeArgs) -> Result<ExitCode> {
    let manifest = verify_freeze_manifest(&args.dir)?;
    emit_json(serde_json::json!({
        "dir": args.dir,
        "verified": true,
        "manifest": manifest
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn run_gate(args: &GateArgs) -> Result<ExitCode> {
    let columns = args.columns.columns();
    let rule = load_gate_rule(&args.config)?;
    let gated = match (&args.records, &args.frozen_dir) {
        (Some(records), None) => {
            let store = read_records(records, &columns)?;
            let signals = read_signals(&args.signals, &args.signal_key_column)?;
            run_pipeline(store, &signals, &args.ks, &rule)?.gated
        }
        (None, Some(frozen_dir)) => {
            let top_k = read_frozen_top_k(frozen_dir, &args.ks, &columns)?;
            let signals = read_signals(&args.signals, &args.signal_key_column)?;
            gate_top_k(&top_k, &signals, &rule)?
        }
        _ => return Err(anyhow!("exactly one of --records or --frozen-dir is required")),
    };
    let files = write_gate_artifacts(&args.out_dir, &gated, &columns)?;

    emit_json(serde_json::json!({
        "out_dir": args.out_dir,
        "frozen_dir": args.frozen_dir,
        "files": files,
        "report": gated.report
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn run_audit_signals(args: &AuditSignalsArgs) -> Result<ExitCode> {
    let table = read_signals(&args.signals, &args.signal_key_column)?;
    let audit = audit_signals(&table);
    if let Some(out) = args.out.as_ref() {
        write_json_atomic(out, &audit)?;
    }

    let ok = audit.ok;
    emit_json(serde_json::json!({
        "signals": args.signals,
        "audit": audit
    }))?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(AUDIT_FAILED_EXIT) })
}
