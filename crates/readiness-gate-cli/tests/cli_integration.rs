use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{now}", std::process::id()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_rgate<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_rgate"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute rgate binary: {err}"))
}

fn parse_json(bytes: &[u8], stream: &str) -> Value {
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    serde_json::from_str(&text)
        .unwrap_or_else(|err| panic!("{stream} is not valid JSON: {err}\n{stream}:\n{text}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rgate(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rgate command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    parse_json(&output.stdout, "stdout")
}

fn run_error<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rgate(args);
    assert!(
        !output.status.success(),
        "rgate command unexpectedly succeeded:\nstdout:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
    assert!(output.stdout.is_empty(), "failed commands must not print to stdout");
    let document = parse_json(&output.stderr, "stderr");
    validate_schema("error.response.schema.json", &document);
    document
}

fn error_kind(document: &Value) -> &str {
    document["error"]["kind"]
        .as_str()
        .unwrap_or_else(|| panic!("missing error kind in document: {document}"))
}

fn offending(document: &Value) -> Vec<String> {
    document["error"]["offending"]
        .as_array()
        .unwrap_or_else(|| panic!("missing offending list in document: {document}"))
        .iter()
        .map(|value| value.as_str().unwrap_or_default().to_string())
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_text(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read file {}: {err}", path.display()))
}

fn read_json_file(path: &Path) -> Value {
    let body = read_text(path);
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body)
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
    path
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

fn column_values(csv_text: &str, column: usize) -> Vec<String> {
    csv_text
        .lines()
        .skip(1)
        .filter_map(|line| line.split(',').nth(column))
        .map(str::to_string)
        .collect()
}

fn sequential_records(count: usize) -> String {
    let mut body = String::from("key,priority,created_at\n");
    for index in 0..count {
        body.push_str(&format!("AIRFLOW-{index:03},Major,{}\n", 1_700_000_000 + index));
    }
    body
}

const GATE_RECORDS: &str = "key,priority,created_at,summary\n\
AIRFLOW-1,Blocker,1,scheduler crash\n\
AIRFLOW-2,Critical,2,webserver 500\n\
AIRFLOW-3,Major,3,dag parse slow\n\
AIRFLOW-4,Minor,4,typo in docs\n\
AIRFLOW-5,Trivial,5,log colour\n\
AIRFLOW-6,Major,6,flaky sensor\n";

const GATE_SIGNALS: &str = "key,C,S,V\n\
AIRFLOW-1,0.9,0.9,0.1\n\
AIRFLOW-2,0.1,0.9,0.1\n\
AIRFLOW-3,0.9,0.9,0.95\n\
AIRFLOW-4,0.5,0.95,0.5\n\
AIRFLOW-5,0.2,0.5,0.99\n\
AIRFLOW-6,0.5,NA,0.2\n";

#[test]
fn rank_orders_by_priority_then_age_then_key() {
    let sandbox = unique_temp_dir("rgate-rank");
    let records = write_file(
        &sandbox,
        "issues.csv",
        "issue_key,priority,created_ts,summary\n\
         AIRFLOW-2,Major,100,second\n\
         AIRFLOW-10,Major,100,tenth\n\
         AIRFLOW-3,Blocker,500,third\n\
         AIRFLOW-4,Trivial,1,fourth\n",
    );
    let out = sandbox.join("ranked.csv");
    let report = sandbox.join("baseline_report.json");

    let response = run_json([
        "rank",
        "--records",
        path_str(&records),
        "--out",
        path_str(&out),
        "--report",
        path_str(&report),
        "--key-column",
        "issue_key",
        "--created-at-column",
        "created_ts",
    ]);
    validate_schema("rank.response.schema.json", &response);
    assert_eq!(response["contract_version"], "cli.v1");
    assert_eq!(response["summary"]["rows"], 4);
    assert_eq!(
        response["summary"]["top10_keys"],
        serde_json::json!(["AIRFLOW-3", "AIRFLOW-10", "AIRFLOW-2", "AIRFLOW-4"])
    );

    assert_eq!(
        read_text(&out),
        "rank,issue_key,priority,priority_ordinal,created_ts,summary\n\
         1,AIRFLOW-3,Blocker,1,500,third\n\
         2,AIRFLOW-10,Major,3,100,tenth\n\
         3,AIRFLOW-2,Major,3,100,second\n\
         4,AIRFLOW-4,Trivial,5,1,fourth\n"
    );
    assert_eq!(read_json_file(&report)["priority_distribution"]["Major"], 2);
}

#[test]
fn freeze_rejects_k_beyond_dataset_without_writing() {
    let sandbox = unique_temp_dir("rgate-freeze-insufficient");
    let records = write_file(&sandbox, "records.csv", &sequential_records(80));
    let out_dir = sandbox.join("frozen");

    let document = run_error([
        "freeze",
        "--records",
        path_str(&records),
        "--ks",
        "50,100",
        "--out-dir",
        path_str(&out_dir),
    ]);
    assert_eq!(error_kind(&document), "InsufficientRecordsError");
    assert_eq!(offending(&document), vec!["100".to_string()]);
    assert!(!out_dir.exists(), "no Top-K artifact may be written");
}

#[test]
fn freeze_then_verify_detects_tampering() {
    let sandbox = unique_temp_dir("rgate-freeze-verify");
    let records = write_file(&sandbox, "records.csv", &sequential_records(30));
    let out_dir = sandbox.join("frozen");

    let frozen = run_json([
        "freeze",
        "--records",
        path_str(&records),
        "--ks",
        "20,10,20",
        "--out-dir",
        path_str(&out_dir),
    ]);
    validate_schema("freeze.response.schema.json", &frozen);
    assert_eq!(frozen["manifest"]["ks"], serde_json::json!([10, 20]));
    assert_eq!(frozen["manifest"]["total_records"], 30);

    let top10 = out_dir.join("baseline_topk_10.csv");
    let lines = read_text(&top10).lines().map(str::to_string).collect::<Vec<_>>();
    assert_eq!(lines.len(), 11);
    assert!(lines[1].starts_with("1,AIRFLOW-000,Major,3,"));
    assert!(lines[10].starts_with("10,AIRFLOW-009,"));

    let verified = run_json(["verify-freeze", "--dir", path_str(&out_dir)]);
    validate_schema("verify-freeze.response.schema.json", &verified);
    assert_eq!(verified["verified"], true);

    let mut body = read_text(&top10);
    body.push_str("11,AIRFLOW-999,Major,3,1,\n");
    fs::write(&top10, body)
        .unwrap_or_else(|err| panic!("failed to tamper {}: {err}", top10.display()));

    let document = run_error(["verify-freeze", "--dir", path_str(&out_dir)]);
    assert_eq!(error_kind(&document), "RuntimeError");
    let message = document["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("digest mismatch"), "unexpected message: {message}");
}

const SMALL_RECORDS: &str = "key,priority,created_at\nA,Major,1\nB,Major,2\nC,Minor,3\n";

const SMALL_RECORDS_WITH_BLOCKER: &str =
    "key,priority,created_at\nA,Major,1\nB,Major,2\nC,Minor,3\nZ,Blocker,9\n";

const SMALL_SIGNALS: &str =
    "key,C,S,V\nA,0.9,0.9,0.1\nB,0.8,0.9,0.2\nC,0.1,0.9,0.1\nZ,0.9,0.9,0.1\n";

fn freeze_into<'a>(records: &'a Path, out_dir: &'a Path, ks: &'a str) -> [&'a str; 7] {
    ["freeze", "--records", path_str(records), "--ks", ks, "--out-dir", path_str(out_dir)]
}

#[test]
fn freeze_refuses_to_replace_a_different_snapshot() {
    let sandbox = unique_temp_dir("rgate-freeze-conflict");
    let original = write_file(&sandbox, "records.csv", SMALL_RECORDS);
    let changed = write_file(&sandbox, "records_changed.csv", SMALL_RECORDS_WITH_BLOCKER);
    let out_dir = sandbox.join("frozen");

    let first = run_json(freeze_into(&original, &out_dir, "2"));
    let frozen_top2 = read_text(&out_dir.join("baseline_topk_2.csv"));
    let manifest = read_text(&out_dir.join("freeze_manifest.json"));

    let rerun = run_json(freeze_into(&original, &out_dir, "2"));
    assert_eq!(rerun["manifest"], first["manifest"]);

    let document = run_error(freeze_into(&changed, &out_dir, "2"));
    assert_eq!(error_kind(&document), "FrozenSnapshotConflictError");
    assert_eq!(offending(&document), vec!["2".to_string()]);
    assert_eq!(read_text(&out_dir.join("baseline_topk_2.csv")), frozen_top2);
    assert_eq!(read_text(&out_dir.join("freeze_manifest.json")), manifest);

    run_json(["verify-freeze", "--dir", path_str(&out_dir)]);
}

#[test]
fn gate_from_frozen_dir_uses_the_frozen_sets() {
    let sandbox = unique_temp_dir("rgate-gate-frozen");
    let records = write_file(&sandbox, "records.csv", SMALL_RECORDS);
    let signals = write_file(&sandbox, "signals.csv", SMALL_SIGNALS);
    let config = write_file(&sandbox, "gate.json", r#"{"rule": "LOCKED_GATE_V1"}"#);
    let frozen_dir = sandbox.join("frozen");
    run_json(freeze_into(&records, &frozen_dir, "2"));

    // A later records table with a new Blocker must not reach the frozen gate.
    write_file(&sandbox, "records.csv", SMALL_RECORDS_WITH_BLOCKER);

    let out_dir = sandbox.join("gated");
    let response = run_json([
        "gate",
        "--frozen-dir",
        path_str(&frozen_dir),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "2",
        "--out-dir",
        path_str(&out_dir),
    ]);
    validate_schema("gate.response.schema.json", &response);
    assert_eq!(response["report"]["per_k"]["2"]["baseline_count"], 2);
    assert_eq!(column_values(&read_text(&out_dir.join("topk_2_ready.csv")), 1), vec!["A", "B"]);

    let reranked_dir = sandbox.join("reranked");
    run_json([
        "gate",
        "--records",
        path_str(&records),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "2",
        "--out-dir",
        path_str(&reranked_dir),
    ]);
    assert_eq!(
        column_values(&read_text(&reranked_dir.join("topk_2_ready.csv")), 1),
        vec!["Z", "A"]
    );

    let unfrozen_dir = sandbox.join("unfrozen");
    let document = run_error([
        "gate",
        "--frozen-dir",
        path_str(&frozen_dir),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "2,3",
        "--out-dir",
        path_str(&unfrozen_dir),
    ]);
    assert_eq!(error_kind(&document), "InvalidConfigError");
    assert!(!unfrozen_dir.exists(), "no gate artifact may be written");
}

#[test]
fn gate_v1_writes_tables_and_reports_per_k() {
    let sandbox = unique_temp_dir("rgate-gate-v1");
    let records = write_file(&sandbox, "records.csv", GATE_RECORDS);
    let signals = write_file(&sandbox, "signals.csv", GATE_SIGNALS);
    let config = write_file(
        &sandbox,
        "gate.json",
        r#"{"rule": "LOCKED_GATE_V1", "C_min": 0.3, "S_min": 0.0, "V_max": 0.9}"#,
    );
    let out_dir = sandbox.join("gated");

    let response = run_json([
        "gate",
        "--records",
        path_str(&records),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "6,3",
        "--out-dir",
        path_str(&out_dir),
    ]);
    validate_schema("gate.response.schema.json", &response);
    assert_eq!(response["files"].as_array().map(Vec::len), Some(7));

    let all = read_json_file(&out_dir.join("gate_report_all.json"));
    validate_schema("gate-report-all.schema.json", &all);
    assert_eq!(all["gate_rule"], "LOCKED_GATE_V1");
    assert_eq!(all["ks"], serde_json::json!([3, 6]));

    let k3 = &all["per_k"]["3"];
    assert_eq!(k3["ready_count"], 1);
    assert_eq!(k3["deferred_count"], 2);
    assert_eq!(k3["deferred_reason_counts"], serde_json::json!({"high_V": 1, "low_C": 1}));

    let k6 = read_json_file(&out_dir.join("gate_report_topk_6.json"));
    assert_eq!(k6, all["per_k"]["6"]);
    assert_eq!(k6["baseline_count"], 6);
    assert_eq!(k6["ready_count"], 2);
    assert_eq!(
        k6["deferred_reason_counts"],
        serde_json::json!({"high_V": 2, "low_C": 2, "missing_scores": 1})
    );

    let ready = read_text(&out_dir.join("topk_6_ready.csv"));
    assert_eq!(column_values(&ready, 1), vec!["AIRFLOW-1", "AIRFLOW-4"]);

    let deferred = read_text(&out_dir.join("topk_6_deferred.csv"));
    assert_eq!(
        deferred,
        "rank,key,priority,priority_ordinal,created_at,summary,C,S,V,reason_codes\n\
         2,AIRFLOW-2,Critical,2,2,webserver 500,0.1,0.9,0.1,low_C\n\
         3,AIRFLOW-3,Major,3,3,dag parse slow,0.9,0.9,0.95,high_V\n\
         4,AIRFLOW-6,Major,3,6,flaky sensor,0.5,NA,0.2,missing_scores\n\
         6,AIRFLOW-5,Trivial,5,5,log colour,0.2,0.5,0.99,low_C;high_V\n"
    );
}

#[test]
fn gate_v2_yaml_config_uses_global_cutoffs() {
    let sandbox = unique_temp_dir("rgate-gate-v2");
    let records = write_file(&sandbox, "records.csv", GATE_RECORDS);
    let signals = write_file(&sandbox, "signals.csv", GATE_SIGNALS);
    let config = write_file(
        &sandbox,
        "gate.yaml",
        "rule: LOCKED_GATE_V2\nS_min_quantile: 0.0\nV_max_quantile: 1.0\n",
    );
    let out_dir = sandbox.join("gated");

    let response = run_json([
        "gate",
        "--records",
        path_str(&records),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "2,6",
        "--out-dir",
        path_str(&out_dir),
    ]);
    validate_schema("gate.response.schema.json", &response);

    let all = read_json_file(&out_dir.join("gate_report_all.json"));
    validate_schema("gate-report-all.schema.json", &all);
    assert_eq!(all["gate_rule"], "LOCKED_GATE_V2");
    assert_eq!(all["thresholds"]["S_q"].as_f64(), Some(0.5));
    assert_eq!(all["thresholds"]["V_q"].as_f64(), Some(0.99));
    assert_eq!(all["per_k"]["2"]["thresholds"], all["thresholds"]);
    assert_eq!(all["per_k"]["2"]["deferred_count"], 0);
    assert_eq!(
        all["per_k"]["6"]["deferred_reason_counts"],
        serde_json::json!({"missing_scores": 1})
    );
}

#[test]
fn unknown_priority_lists_every_distinct_value() {
    let sandbox = unique_temp_dir("rgate-unknown-priority");
    let records = write_file(
        &sandbox,
        "records.csv",
        "key,priority,created_at\nA,blocker,1\nB,Urgent,2\nC,Major ,3\nD,Urgent,4\nE,Major,5\n",
    );
    let out = sandbox.join("ranked.csv");

    let document =
        run_error(["rank", "--records", path_str(&records), "--out", path_str(&out)]);
    assert_eq!(error_kind(&document), "UnknownPriorityError");
    assert_eq!(
        offending(&document),
        vec!["Major ".to_string(), "Urgent".to_string(), "blocker".to_string()]
    );
    assert!(!out.exists());
}

#[test]
fn missing_signal_value_names_the_record() {
    let sandbox = unique_temp_dir("rgate-missing-signals");
    let records = write_file(&sandbox, "records.csv", &sequential_records(100));
    let mut signal_body = String::from("key,C,S,V\n");
    for index in 0..100 {
        let v = if index == 42 { String::new() } else { "0.5".to_string() };
        signal_body.push_str(&format!("AIRFLOW-{index:03},0.5,0.5,{v}\n"));
    }
    let signals = write_file(&sandbox, "signals.csv", &signal_body);
    let config = write_file(&sandbox, "gate.json", r#"{"rule": "LOCKED_GATE_V1"}"#);
    let out_dir = sandbox.join("gated");

    let document = run_error([
        "gate",
        "--records",
        path_str(&records),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "100",
        "--out-dir",
        path_str(&out_dir),
    ]);
    assert_eq!(error_kind(&document), "MissingSignalsError");
    assert_eq!(offending(&document), vec!["AIRFLOW-042".to_string()]);
    assert!(!out_dir.exists(), "no gate artifact may be written");
}

#[test]
fn unknown_gate_rule_is_rejected() {
    let sandbox = unique_temp_dir("rgate-unknown-rule");
    let records = write_file(&sandbox, "records.csv", GATE_RECORDS);
    let signals = write_file(&sandbox, "signals.csv", GATE_SIGNALS);
    let config = write_file(&sandbox, "gate.json", r#"{"rule": "LOCKED_GATE_V9"}"#);

    let document = run_error([
        "gate",
        "--records",
        path_str(&records),
        "--signals",
        path_str(&signals),
        "--config",
        path_str(&config),
        "--ks",
        "3",
        "--out-dir",
        path_str(&sandbox.join("gated")),
    ]);
    assert_eq!(error_kind(&document), "UnknownRuleError");
    assert_eq!(offending(&document), vec!["LOCKED_GATE_V9".to_string()]);
}

#[test]
fn audit_signals_flags_monotonic_columns() {
    let sandbox = unique_temp_dir("rgate-audit");
    let clean = write_file(&sandbox, "clean.csv", GATE_SIGNALS);
    let leaky = write_file(
        &sandbox,
        "leaky.csv",
        "key,C,S,V\nA,0.1,0.5,0.3\nB,0.2,0.1,0.9\nC,0.3,0.7,0.2\n",
    );

    let clean_audit = run_json(["audit-signals", "--signals", path_str(&clean)]);
    validate_schema("audit-signals.response.schema.json", &clean_audit);
    assert_eq!(clean_audit["audit"]["ok"], true);
    assert_eq!(clean_audit["audit"]["signals"]["S"]["not_computable"], 1);

    let output = run_rgate(["audit-signals", "--signals", path_str(&leaky)]);
    assert_eq!(output.status.code(), Some(2));
    let leaky_audit = parse_json(&output.stdout, "stdout");
    validate_schema("audit-signals.response.schema.json", &leaky_audit);
    assert_eq!(leaky_audit["audit"]["ok"], false);
    assert_eq!(leaky_audit["audit"]["signals"]["C"]["monotonic"], true);
}
