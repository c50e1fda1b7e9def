use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{bounded_sample, GateError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    Blocker,
    Critical,
    Major,
    Minor,
    Trivial,
}

impl Priority {
    pub const ALL: [Self; 5] =
        [Self::Blocker, Self::Critical, Self::Major, Self::Minor, Self::Trivial];

    /// 1 is the most urgent level.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Blocker => 1,
            Self::Critical => 2,
            Self::Major => 3,
            Self::Minor => 4,
            Self::Trivial => 5,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocker => "Blocker",
            Self::Critical => "Critical",
            Self::Major => "Major",
            Self::Minor => "Minor",
            Self::Trivial => "Trivial",
        }
    }

    /// Exact, case-sensitive match. Surrounding whitespace is not stripped.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Blocker" => Some(Self::Blocker),
            "Critical" => Some(Self::Critical),
            "Major" => Some(Self::Major),
            "Minor" => Some(Self::Minor),
            "Trivial" => Some(Self::Trivial),
            _ => None,
        }
    }
}

/// Parse a numeric cell. Only finite values are accepted.
#[must_use]
pub fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// One issue-tracker row as delivered by upstream ingestion.
///
/// `priority` and `created_at` keep their raw text; interpretation happens in
/// the ranker so that bad values can be reported together.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub key: String,
    pub priority: String,
    pub created_at: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Record {
    #[must_use]
    pub fn new(key: &str, priority: &str, created_at: &str) -> Self {
        Self {
            key: key.to_string(),
            priority: priority.to_string(),
            created_at: created_at.to_string(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    #[must_use]
    pub fn priority_level(&self) -> Option<Priority> {
        Priority::parse(&self.priority)
    }

    #[must_use]
    pub fn created_at_numeric(&self) -> Option<f64> {
        parse_finite(&self.created_at)
    }
}

/// Immutable table of records with unique keys.
///
/// Passthrough columns are kept in their original order; each record's
/// `fields` vector is aligned with [`RecordStore::field_names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStore {
    field_names: Vec<String>,
    records: Vec<Record>,
}

impl RecordStore {
    /// Build a store from already-parsed rows.
    ///
    /// # Errors
    /// Returns [`GateError::DuplicateKey`] when a key appears more than once and
    /// [`GateError::InvalidConfig`] when a row's passthrough width does not match
    /// the declared columns.
    pub fn new(field_names: Vec<String>, records: Vec<Record>) -> Result<Self, GateError> {
        if let Some(record) = records.iter().find(|record| record.fields.len() != field_names.len())
        {
            return Err(GateError::InvalidConfig(format!(
                "record {} has {} passthrough fields, expected {}",
                record.key,
                record.fields.len(),
                field_names.len()
            )));
        }

        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &records {
            *seen.entry(record.key.as_str()).or_default() += 1;
        }
        let duplicates = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            let (keys, total) = bounded_sample(duplicates);
            return Err(GateError::DuplicateKey { keys, total });
        }

        Ok(Self { field_names, records })
    }

    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.key == key)
    }

    /// Passthrough text value of `column` for `record`.
    #[must_use]
    pub fn text<'a>(&self, record: &'a Record, column: &str) -> Option<&'a str> {
        let index = self.field_names.iter().position(|name| name == column)?;
        record.fields.get(index).map(String::as_str)
    }

    /// Passthrough value of `column` parsed as a finite number.
    #[must_use]
    pub fn numeric(&self, record: &Record, column: &str) -> Option<f64> {
        self.text(record, column).and_then(parse_finite)
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Record>) {
        (self.field_names, self.records)
    }
}
