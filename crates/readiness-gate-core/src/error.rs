/// Upper bound on identifiers echoed back in a diagnostic.
pub const DIAGNOSTIC_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GateError {
    #[error("unknown priority values encountered: {}", .values.join(", "))]
    UnknownPriority { values: Vec<String> },
    #[error(
        "created_at could not be parsed as a finite number for {total} record(s); example keys: {}",
        .keys.join(", ")
    )]
    TimestampParse { keys: Vec<String>, total: usize },
    #[error("duplicate record keys ({total}); example keys: {}", .keys.join(", "))]
    DuplicateKey { keys: Vec<String>, total: usize },
    #[error("requested K={requested} but dataset has only {available} rows")]
    InsufficientRecords { requested: usize, available: usize },
    #[error(
        "signal table has more than one row for {total} key(s); example keys: {}",
        .keys.join(", ")
    )]
    CardinalityViolation { keys: Vec<String>, total: usize },
    #[error("missing signals for {total} record(s); example keys: {}", .keys.join(", "))]
    MissingSignals { keys: Vec<String>, total: usize },
    #[error("invalid {column} signal value {raw:?} for key {key}")]
    InvalidSignal { key: String, column: String, raw: String },
    #[error("unknown gate rule: {rule}")]
    UnknownRule { rule: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(
        "a different Top-K set is already frozen for K={}",
        .ks.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    FrozenSnapshotConflict { ks: Vec<usize> },
}

impl GateError {
    /// Stable, machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownPriority { .. } => "UnknownPriorityError",
            Self::TimestampParse { .. } => "TimestampParseError",
            Self::DuplicateKey { .. } => "DuplicateKeyError",
            Self::InsufficientRecords { .. } => "InsufficientRecordsError",
            Self::CardinalityViolation { .. } => "CardinalityViolationError",
            Self::MissingSignals { .. } => "MissingSignalsError",
            Self::InvalidSignal { .. } => "InvalidSignalError",
            Self::UnknownRule { .. } => "UnknownRuleError",
            Self::InvalidConfig(_) => "InvalidConfigError",
            Self::FrozenSnapshotConflict { .. } => "FrozenSnapshotConflictError",
        }
    }

    /// Bounded sample of the identifiers that caused the error.
    #[must_use]
    pub fn offending(&self) -> Vec<String> {
        match self {
            Self::UnknownPriority { values } => values.clone(),
            Self::TimestampParse { keys, .. }
            | Self::DuplicateKey { keys, .. }
            | Self::CardinalityViolation { keys, .. }
            | Self::MissingSignals { keys, .. } => keys.clone(),
            Self::InsufficientRecords { requested, .. } => vec![requested.to_string()],
            Self::InvalidSignal { key, .. } => vec![key.clone()],
            Self::UnknownRule { rule } => vec![rule.clone()],
            Self::InvalidConfig(_) => Vec::new(),
            Self::FrozenSnapshotConflict { ks } => ks.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Keep the first [`DIAGNOSTIC_SAMPLE_LIMIT`] keys and the total count.
pub(crate) fn bounded_sample<I>(keys: I) -> (Vec<String>, usize)
where
    I: IntoIterator<Item = String>,
{
    let mut sample = Vec::new();
    let mut total = 0_usize;
    for key in keys {
        if sample.len() < DIAGNOSTIC_SAMPLE_LIMIT {
            sample.push(key);
        }
        total += 1;
    }
    (sample, total)
}
