use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::record::parse_finite;

/// Tokens an upstream scorer uses to say a signal cannot be computed.
const NOT_COMPUTABLE_TOKENS: [&str; 4] = ["na", "nan", "n/a", "null"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SignalKind {
    #[serde(rename = "C")]
    Criticality,
    #[serde(rename = "S")]
    Specificity,
    #[serde(rename = "V")]
    Volatility,
}

impl SignalKind {
    pub const ALL: [Self; 3] = [Self::Criticality, Self::Specificity, Self::Volatility];

    /// Column name in signal tables.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Criticality => "C",
            Self::Specificity => "S",
            Self::Volatility => "V",
        }
    }
}

/// One C/S/V cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Present(f64),
    /// The scorer ran but could not produce a value.
    NotComputable,
    /// No value was delivered at all.
    Absent,
}

impl SignalValue {
    /// `None` when the text is neither a number, a not-computable marker, nor empty.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(Self::Absent);
        }
        if NOT_COMPUTABLE_TOKENS.iter().any(|token| trimmed.eq_ignore_ascii_case(token)) {
            return Some(Self::NotComputable);
        }
        parse_finite(trimmed).map(Self::Present)
    }

    #[must_use]
    pub fn present(self) -> Option<f64> {
        match self {
            Self::Present(value) => Some(value),
            Self::NotComputable | Self::Absent => None,
        }
    }

    #[must_use]
    pub fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub key: String,
    pub c: SignalValue,
    pub s: SignalValue,
    pub v: SignalValue,
    pub fields: Vec<String>,
}

impl SignalRow {
    /// Parse the three signal cells of one row.
    ///
    /// # Errors
    /// Returns [`GateError::InvalidSignal`] for a cell that is not a finite number,
    /// a not-computable marker, or empty.
    pub fn parse(
        key: &str,
        c: &str,
        s: &str,
        v: &str,
        fields: Vec<String>,
    ) -> Result<Self, GateError> {
        let cell = |kind: SignalKind, raw: &str| {
            SignalValue::parse(raw).ok_or_else(|| GateError::InvalidSignal {
                key: key.to_string(),
                column: kind.as_str().to_string(),
                raw: raw.to_string(),
            })
        };

        Ok(Self {
            key: key.to_string(),
            c: cell(SignalKind::Criticality, c)?,
            s: cell(SignalKind::Specificity, s)?,
            v: cell(SignalKind::Volatility, v)?,
            fields,
        })
    }

    #[must_use]
    pub fn value(&self, kind: SignalKind) -> SignalValue {
        match kind {
            SignalKind::Criticality => self.c,
            SignalKind::Specificity => self.s,
            SignalKind::Volatility => self.v,
        }
    }
}

/// Externally computed readiness signals, read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTable {
    field_names: Vec<String>,
    rows: Vec<SignalRow>,
}

impl SignalTable {
    /// # Errors
    /// Returns [`GateError::InvalidConfig`] when a row's passthrough width does not
    /// match the declared columns.
    pub fn new(field_names: Vec<String>, rows: Vec<SignalRow>) -> Result<Self, GateError> {
        if let Some(row) = rows.iter().find(|row| row.fields.len() != field_names.len()) {
            return Err(GateError::InvalidConfig(format!(
                "signal row {} has {} passthrough fields, expected {}",
                row.key,
                row.fields.len(),
                field_names.len()
            )));
        }
        Ok(Self { field_names, rows })
    }

    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    #[must_use]
    pub fn rows(&self) -> &[SignalRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Present values of one signal across the whole table, in table order.
    #[must_use]
    pub fn present_values(&self, kind: SignalKind) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row.value(kind).present()).collect()
    }
}
