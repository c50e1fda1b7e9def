use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use readiness_gate_core::{
    GateOutcome, GatedRecord, RankedRecord, Record, RecordStore, SignalRow, SignalTable,
};

pub const DEFAULT_KEY_COLUMN: &str = "key";
pub const DEFAULT_PRIORITY_COLUMN: &str = "priority";
pub const DEFAULT_CREATED_AT_COLUMN: &str = "created_at";
pub const REASON_CODES_COLUMN: &str = "reason_codes";
pub const RANK_COLUMN: &str = "rank";
pub const PRIORITY_ORDINAL_COLUMN: &str = "priority_ordinal";

/// Cell written for a signal the upstream scorer could not compute.
pub const NOT_COMPUTABLE_CELL: &str = "NA";

const SIGNAL_COLUMNS: [&str; 3] = ["C", "S", "V"];

/// Names of the identity columns in a records table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordColumns {
    pub key: String,
    pub priority: String,
    pub created_at: String,
}

impl Default for RecordColumns {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY_COLUMN.to_string(),
            priority: DEFAULT_PRIORITY_COLUMN.to_string(),
            created_at: DEFAULT_CREATED_AT_COLUMN.to_string(),
        }
    }
}

/// Which half of a gate outcome a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedSelection {
    Ready,
    Deferred,
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open CSV file {}", path.display()))
}

fn read_headers(reader: &mut csv::Reader<File>, path: &Path) -> Result<Vec<String>> {
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read CSV header from {}", path.display()))?;
    Ok(headers.iter().map(str::to_string).collect())
}

fn column_index(headers: &[String], name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|header| header == name)
        .ok_or_else(|| anyhow!("{} is missing required column {name:?}", path.display()))
}

fn passthrough_columns(headers: &[String], identity: &[usize]) -> Vec<usize> {
    (0..headers.len()).filter(|index| !identity.contains(index)).collect()
}

fn cell(row: &csv::StringRecord, index: usize) -> String {
    row.get(index).unwrap_or_default().to_string()
}

/// Load a records table. Columns other than the identity columns are kept as
/// passthrough fields in header order.
///
/// # Errors
/// Returns an error when the file cannot be read, a required column is
/// missing, a row is malformed, or the keys are not unique.
pub fn read_records(path: &Path, columns: &RecordColumns) -> Result<RecordStore> {
    let mut reader = open_reader(path)?;
    let headers = read_headers(&mut reader, path)?;
    let key = column_index(&headers, &columns.key, path)?;
    let priority = column_index(&headers, &columns.priority, path)?;
    let created_at = column_index(&headers, &columns.created_at, path)?;
    let passthrough = passthrough_columns(&headers, &[key, priority, created_at]);
    let field_names = passthrough.iter().map(|index| headers[*index].clone()).collect();

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!("failed to read record row {} from {}", index + 1, path.display())
        })?;
        let fields = passthrough.iter().map(|column| cell(&row, *column)).collect();
        records.push(
            Record::new(&cell(&row, key), &cell(&row, priority), &cell(&row, created_at))
                .with_fields(fields),
        );
    }

    let store = RecordStore::new(field_names, records)
        .with_context(|| format!("invalid records table {}", path.display()))?;
    tracing::info!(path = %path.display(), records = store.len(), "loaded records table");
    Ok(store)
}

/// Load a signal table keyed by `key_column` with `C`, `S` and `V` columns.
///
/// # Errors
/// Returns an error when the file cannot be read, a required column is
/// missing, or a signal cell is neither numeric, a not-computable marker nor
/// empty.
pub fn read_signals(path: &Path, key_column: &str) -> Result<SignalTable> {
    let mut reader = open_reader(path)?;
    let headers = read_headers(&mut reader, path)?;
    let key = column_index(&headers, key_column, path)?;
    let c = column_index(&headers, SIGNAL_COLUMNS[0], path)?;
    let s = column_index(&headers, SIGNAL_COLUMNS[1], path)?;
    let v = column_index(&headers, SIGNAL_COLUMNS[2], path)?;
    let passthrough = passthrough_columns(&headers, &[key, c, s, v]);
    let field_names = passthrough.iter().map(|index| headers[*index].clone()).collect();

    let mut rows = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!("failed to read signal row {} from {}", index + 1, path.display())
        })?;
        let fields = passthrough.iter().map(|column| cell(&row, *column)).collect();
        let parsed = SignalRow::parse(
            &cell(&row, key),
            &cell(&row, c),
            &cell(&row, s),
            &cell(&row, v),
            fields,
        )
        .with_context(|| format!("invalid signal table {}", path.display()))?;
        rows.push(parsed);
    }

    let table = SignalTable::new(field_names, rows)
        .with_context(|| format!("invalid signal table {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = table.len(), "loaded signal table");
    Ok(table)
}

fn ranked_header(columns: &RecordColumns, field_names: &[String]) -> Vec<String> {
    let mut header = vec![
        RANK_COLUMN.to_string(),
        columns.key.clone(),
        columns.priority.clone(),
        PRIORITY_ORDINAL_COLUMN.to_string(),
        columns.created_at.clone(),
    ];
    header.extend(field_names.iter().cloned());
    header
}

fn ranked_cells(ranked: &RankedRecord) -> Vec<String> {
    let mut cells = vec![
        ranked.rank.to_string(),
        ranked.record.key.clone(),
        ranked.record.priority.clone(),
        ranked.priority_ordinal().to_string(),
        ranked.record.created_at.clone(),
    ];
    cells.extend(ranked.record.fields.iter().cloned());
    cells
}

fn signal_cell(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_COMPUTABLE_CELL.to_string(), |value| value.to_string())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer.into_inner().map_err(|err| anyhow!("failed to flush CSV buffer: {}", err.error()))
}

/// Render ranked rows as CSV: `rank`, key, priority, `priority_ordinal`,
/// created_at, then passthrough columns.
///
/// # Errors
/// Returns an error when a row cannot be encoded.
pub fn ranked_csv(
    records: &[RankedRecord],
    field_names: &[String],
    columns: &RecordColumns,
) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ranked_header(columns, field_names)).context("failed to write CSV header")?;
    for ranked in records {
        writer
            .write_record(ranked_cells(ranked))
            .with_context(|| format!("failed to write ranked row for {}", ranked.key()))?;
    }
    finish(writer)
}

/// Parse a table written by [`ranked_csv`] back into records, in row order.
///
/// `rank` must run `1..=n` down the table; `priority_ordinal` is derived and
/// dropped. `source` names the table in diagnostics.
///
/// # Errors
/// Returns an error when the document is malformed, a column is missing, a
/// rank is out of sequence, or the keys are not unique.
pub fn read_ranked_table(
    bytes: &[u8],
    columns: &RecordColumns,
    source: &Path,
) -> Result<RecordStore> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read CSV header from {}", source.display()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let rank = column_index(&headers, RANK_COLUMN, source)?;
    let key = column_index(&headers, &columns.key, source)?;
    let priority = column_index(&headers, &columns.priority, source)?;
    let ordinal = column_index(&headers, PRIORITY_ORDINAL_COLUMN, source)?;
    let created_at = column_index(&headers, &columns.created_at, source)?;
    let passthrough = passthrough_columns(&headers, &[rank, key, priority, ordinal, created_at]);
    let field_names = passthrough.iter().map(|index| headers[*index].clone()).collect();

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!("failed to read ranked row {} from {}", index + 1, source.display())
        })?;
        let expected = (index + 1).to_string();
        if cell(&row, rank) != expected {
            return Err(anyhow!(
                "{} row {expected} carries rank {:?}",
                source.display(),
                cell(&row, rank)
            ));
        }
        let fields = passthrough.iter().map(|column| cell(&row, *column)).collect();
        records.push(
            Record::new(&cell(&row, key), &cell(&row, priority), &cell(&row, created_at))
                .with_fields(fields),
        );
    }

    RecordStore::new(field_names, records)
        .with_context(|| format!("invalid ranked table {}", source.display()))
}

/// Render the ready or deferred half of a gate outcome, in rank order.
///
/// Ranked columns come first, then `C`, `S`, `V`, then signal passthrough
/// columns. The deferred table also carries `reason_codes`.
///
/// # Errors
/// Returns an error when a row cannot be encoded.
pub fn gated_csv(
    outcome: &GateOutcome,
    selection: GatedSelection,
    columns: &RecordColumns,
) -> Result<Vec<u8>> {
    let mut header = ranked_header(columns, &outcome.field_names);
    header.extend(SIGNAL_COLUMNS.iter().map(|name| (*name).to_string()));
    header.extend(outcome.signal_field_names.iter().cloned());
    if selection == GatedSelection::Deferred {
        header.push(REASON_CODES_COLUMN.to_string());
    }

    let rows: Vec<&GatedRecord> = match selection {
        GatedSelection::Ready => outcome.ready(),
        GatedSelection::Deferred => outcome.deferred(),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header).context("failed to write CSV header")?;
    for gated in rows {
        let signals = &gated.joined.signals;
        let mut cells = ranked_cells(&gated.joined.ranked);
        cells.extend([signal_cell(signals.c), signal_cell(signals.s), signal_cell(signals.v)]);
        cells.extend(gated.joined.signal_fields.iter().cloned());
        if selection == GatedSelection::Deferred {
            cells.push(gated.reason_field());
        }
        writer
            .write_record(&cells)
            .with_context(|| format!("failed to write gated row for {}", gated.key()))?;
    }
    finish(writer)
}

/// Number of data rows in an encoded CSV document.
///
/// # Errors
/// Returns an error when the document is not well-formed CSV.
pub fn count_csv_rows(bytes: &[u8]) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let mut rows = 0_usize;
    for row in reader.records() {
        row.with_context(|| format!("failed to read CSV row {}", rows + 1))?;
        rows += 1;
    }
    Ok(rows)
}
