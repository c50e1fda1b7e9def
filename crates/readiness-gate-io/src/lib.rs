//! File boundary for the readiness gate: CSV tables in, CSV and JSON artifacts
//! out, every artifact written atomically.

mod artifact;
mod bundle;
mod config;
mod manifest;
mod table;

pub use artifact::{json_bytes, read_json, sha256_hex, write_atomic, write_json_atomic};
pub use bundle::{
    deferred_artifact_name, gate_report_name, ready_artifact_name, write_gate_artifacts,
    write_ranked_baseline, GATE_REPORT_ALL_FILE,
};
pub use config::{load_gate_config, load_gate_rule};
pub use manifest::{
    read_frozen_top_k, verify_freeze_manifest, write_frozen_top_k, ArtifactDigest,
    FreezeManifest, FREEZE_MANIFEST_FILE,
};
pub use table::{
    count_csv_rows, gated_csv, ranked_csv, read_ranked_table, read_records, read_signals,
    GatedSelection, RecordColumns, DEFAULT_CREATED_AT_COLUMN, DEFAULT_KEY_COLUMN,
    DEFAULT_PRIORITY_COLUMN, NOT_COMPUTABLE_CELL, PRIORITY_ORDINAL_COLUMN, RANK_COLUMN,
    REASON_CODES_COLUMN,
};
