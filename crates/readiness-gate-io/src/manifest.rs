use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use readiness_gate_core::{normalize_ks, top_k_artifact_name, GateError, TopKSet};
use serde::{Deserialize, Serialize};

use crate::artifact::{json_bytes, read_json, sha256_hex, write_atomic};
use crate::table::{count_csv_rows, ranked_csv, read_ranked_table, RecordColumns};

pub const FREEZE_MANIFEST_FILE: &str = "freeze_manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

/// Digest manifest for one freeze. Carries no timestamp so that a rerun over
/// the same input is byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreezeManifest {
    pub ks: Vec<usize>,
    pub total_records: usize,
    pub files: Vec<ArtifactDigest>,
}

impl FreezeManifest {
    fn digest_for(&self, k: usize) -> Option<&ArtifactDigest> {
        let name = top_k_artifact_name(k);
        self.files.iter().find(|file| file.path == name)
    }
}

/// Fold freshly rendered digests into the manifest already in `out_dir`.
///
/// A K frozen before must hash the same; a different corpus size conflicts
/// with every K frozen before. Ks frozen before and not requested now are kept.
fn merge_with_existing(
    out_dir: &Path,
    fresh: BTreeMap<usize, ArtifactDigest>,
    total_records: usize,
) -> Result<FreezeManifest> {
    let manifest_path = out_dir.join(FREEZE_MANIFEST_FILE);
    let mut merged = BTreeMap::new();
    if manifest_path.exists() {
        let existing: FreezeManifest = read_json(&manifest_path)?;
        let mut conflicts = BTreeSet::new();
        for k in &existing.ks {
            let Some(previous) = existing.digest_for(*k) else {
                return Err(anyhow!(
                    "existing manifest {} is missing the entry for K={k}",
                    manifest_path.display()
                ));
            };
            let differs = fresh.get(k).is_some_and(|digest| digest.sha256 != previous.sha256);
            if differs || existing.total_records != total_records {
                conflicts.insert(*k);
            }
            merged.insert(*k, previous.clone());
        }
        if !conflicts.is_empty() {
            return Err(GateError::FrozenSnapshotConflict { ks: conflicts.into_iter().collect() })
                .with_context(|| format!("refusing to overwrite {}", out_dir.display()));
        }
    }
    merged.extend(fresh);

    Ok(FreezeManifest {
        ks: merged.keys().copied().collect(),
        total_records,
        files: merged.into_values().collect(),
    })
}

/// Write one `baseline_topk_{K}.csv` per set plus [`FREEZE_MANIFEST_FILE`].
///
/// Every file is rendered and hashed, and checked against any freeze already
/// in `out_dir`, before the first one is written. Re-freezing identical sets is
/// a no-op rewrite.
///
/// # Errors
/// Returns [`GateError::FrozenSnapshotConflict`] when `out_dir` already holds
/// a different set for a requested K, and an error when rendering or any write
/// fails.
pub fn write_frozen_top_k(
    out_dir: &Path,
    sets: &[TopKSet],
    total_records: usize,
    columns: &RecordColumns,
) -> Result<FreezeManifest> {
    let mut rendered = Vec::with_capacity(sets.len());
    for set in sets {
        let bytes = ranked_csv(set.records(), set.field_names(), columns)
            .with_context(|| format!("failed to render Top-K set for K={}", set.k()))?;
        rendered.push((set.artifact_name(), set.len(), bytes));
    }

    let fresh = sets
        .iter()
        .zip(&rendered)
        .map(|(set, (path, records, bytes))| {
            let digest =
                ArtifactDigest { path: path.clone(), sha256: sha256_hex(bytes), records: *records };
            (set.k(), digest)
        })
        .collect();
    let manifest = merge_with_existing(out_dir, fresh, total_records)?;
    let manifest_bytes = json_bytes(&manifest)?;

    for (path, _, bytes) in &rendered {
        write_atomic(&out_dir.join(path), bytes)?;
    }
    write_atomic(&out_dir.join(FREEZE_MANIFEST_FILE), &manifest_bytes)?;

    tracing::info!(
        out_dir = %out_dir.display(),
        ks = ?manifest.ks,
        total_records,
        "froze Top-K artifacts"
    );
    Ok(manifest)
}

/// Re-hash every artifact listed in `dir/freeze_manifest.json`.
///
/// # Errors
/// Returns an error for a missing manifest entry or file, a duplicated entry, a
/// digest mismatch, or a row-count mismatch.
pub fn verify_freeze_manifest(dir: &Path) -> Result<FreezeManifest> {
    let manifest: FreezeManifest = read_json(&dir.join(FREEZE_MANIFEST_FILE))?;

    let mut by_path: BTreeMap<&str, &ArtifactDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for k in &manifest.ks {
        let name = top_k_artifact_name(*k);
        let Some(expected) = by_path.get(name.as_str()) else {
            return Err(anyhow!("manifest is missing required file entry: {name}"));
        };
        if expected.records != *k {
            return Err(anyhow!(
                "manifest lists {} records for {name}, expected exactly {k}",
                expected.records
            ));
        }
    }

    for expected in &manifest.files {
        let file_path = dir.join(&expected.path);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }
        let bytes = fs::read(&file_path)
            .with_context(|| format!("failed to read frozen artifact {}", file_path.display()))?;

        let actual_sha256 = sha256_hex(&bytes);
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {}: expected {}, got {}",
                expected.path,
                expected.sha256,
                actual_sha256
            ));
        }
        let actual_records = count_csv_rows(&bytes)
            .with_context(|| format!("failed to parse frozen artifact {}", file_path.display()))?;
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {}: expected {}, got {}",
                expected.path,
                expected.records,
                actual_records
            ));
        }
    }

    tracing::info!(dir = %dir.display(), files = manifest.files.len(), "verified frozen artifacts");
    Ok(manifest)
}

/// Load the frozen sets for `ks` from `dir` after verifying its manifest.
///
/// Sets come back in ascending K order, in the frozen row order.
///
/// # Errors
/// Returns [`GateError::InvalidConfig`] when a requested K was never frozen,
/// and an error when verification fails or a table cannot be parsed.
pub fn read_frozen_top_k(
    dir: &Path,
    ks: &[usize],
    columns: &RecordColumns,
) -> Result<Vec<TopKSet>> {
    let manifest = verify_freeze_manifest(dir)?;
    let ks = normalize_ks(ks)?;
    let missing = ks
        .iter()
        .filter(|k| !manifest.ks.contains(k))
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(GateError::InvalidConfig(format!(
            "K={} not frozen in {} (frozen: {:?})",
            missing.join(", "),
            dir.display(),
            manifest.ks
        ))
        .into());
    }

    let mut sets = Vec::with_capacity(ks.len());
    for k in ks {
        let path = dir.join(top_k_artifact_name(k));
        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read frozen artifact {}", path.display()))?;
        let expected = manifest.digest_for(k).map(|digest| digest.sha256.as_str());
        if expected != Some(sha256_hex(&bytes).as_str()) {
            return Err(anyhow!("frozen artifact {} changed during load", path.display()));
        }
        let store = read_ranked_table(&bytes, columns, &path)?;
        let set = TopKSet::restore(k, store)
            .with_context(|| format!("invalid frozen artifact {}", path.display()))?;
        sets.push(set);
    }

    tracing::info!(dir = %dir.display(), ks = ?manifest.ks, "loaded frozen Top-K sets");
    Ok(sets)
}
