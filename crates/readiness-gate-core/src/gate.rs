use serde::{Deserialize, Serialize, Serializer};

use crate::error::GateError;
use crate::join::{JoinedRecord, JoinedSet, Signals};
use crate::signal::{SignalKind, SignalTable};

pub const RULE_V1: &str = "LOCKED_GATE_V1";
pub const RULE_V2: &str = "LOCKED_GATE_V2";

/// Gate configuration document as written by the experimenter.
///
/// `rule` is required; there is no default rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GateConfig {
    pub rule: String,
    #[serde(rename = "C_min", default, skip_serializing_if = "Option::is_none")]
    pub c_min: Option<f64>,
    #[serde(rename = "S_min", default, skip_serializing_if = "Option::is_none")]
    pub s_min: Option<f64>,
    #[serde(rename = "V_max", default, skip_serializing_if = "Option::is_none")]
    pub v_max: Option<f64>,
    #[serde(rename = "S_min_quantile", default, skip_serializing_if = "Option::is_none")]
    pub s_min_quantile: Option<f64>,
    #[serde(rename = "V_max_quantile", default, skip_serializing_if = "Option::is_none")]
    pub v_max_quantile: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AbsoluteThresholds {
    #[serde(rename = "C_min")]
    pub c_min: f64,
    #[serde(rename = "S_min")]
    pub s_min: f64,
    #[serde(rename = "V_max")]
    pub v_max: f64,
}

impl Default for AbsoluteThresholds {
    fn default() -> Self {
        Self { c_min: 0.0, s_min: 0.0, v_max: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuantileThresholds {
    #[serde(rename = "S_min_quantile")]
    pub s_min_quantile: f64,
    #[serde(rename = "V_max_quantile")]
    pub v_max_quantile: f64,
}

/// The closed set of versioned gate rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateRule {
    /// `LOCKED_GATE_V1`: fixed numeric thresholds.
    Absolute(AbsoluteThresholds),
    /// `LOCKED_GATE_V2`: thresholds taken from quantiles of the whole signal table.
    Quantile(QuantileThresholds),
}

impl GateRule {
    /// Interpret a configuration document.
    ///
    /// # Errors
    /// Returns [`GateError::UnknownRule`] for a rule name outside
    /// {`LOCKED_GATE_V1`, `LOCKED_GATE_V2`} and [`GateError::InvalidConfig`] for
    /// missing or out-of-range parameters.
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        match config.rule.as_str() {
            RULE_V1 => {
                let defaults = AbsoluteThresholds::default();
                let thresholds = AbsoluteThresholds {
                    c_min: finite_param("C_min", config.c_min.unwrap_or(defaults.c_min))?,
                    s_min: finite_param("S_min", config.s_min.unwrap_or(defaults.s_min))?,
                    v_max: finite_param("V_max", config.v_max.unwrap_or(defaults.v_max))?,
                };
                Ok(Self::Absolute(thresholds))
            }
            RULE_V2 => Ok(Self::Quantile(QuantileThresholds {
                s_min_quantile: quantile_param("S_min_quantile", config.s_min_quantile)?,
                v_max_quantile: quantile_param("V_max_quantile", config.v_max_quantile)?,
            })),
            other => Err(GateError::UnknownRule { rule: other.to_string() }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Absolute(_) => RULE_V1,
            Self::Quantile(_) => RULE_V2,
        }
    }

    /// Freeze the numeric thresholds this rule will apply.
    ///
    /// Quantile cutoffs are computed over every row of `table`, not over any
    /// Top-K slice, so the same cutoffs serve every K.
    ///
    /// # Errors
    /// Returns [`GateError::InvalidConfig`] when a quantile rule has no numeric
    /// values to draw a cutoff from.
    pub fn resolve(&self, table: &SignalTable) -> Result<ResolvedGate, GateError> {
        match *self {
            Self::Absolute(thresholds) => Ok(ResolvedGate::Absolute(thresholds)),
            Self::Quantile(params) => {
                let s_cutoff =
                    scope_quantile(table, SignalKind::Specificity, params.s_min_quantile)?;
                let v_cutoff =
                    scope_quantile(table, SignalKind::Volatility, params.v_max_quantile)?;
                tracing::info!(
                    rule = RULE_V2,
                    s_cutoff,
                    v_cutoff,
                    scope_rows = table.len(),
                    "resolved quantile cutoffs over full signal table"
                );
                Ok(ResolvedGate::Quantile { params, s_cutoff, v_cutoff })
            }
        }
    }
}

fn finite_param(name: &str, value: f64) -> Result<f64, GateError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GateError::InvalidConfig(format!("{name} MUST be a finite number")))
    }
}

fn quantile_param(name: &str, value: Option<f64>) -> Result<f64, GateError> {
    let Some(value) = value else {
        return Err(GateError::InvalidConfig(format!("{name} is required for {RULE_V2}")));
    };
    if !(0.0..=1.0).contains(&value) {
        return Err(GateError::InvalidConfig(format!("{name} MUST be in [0.0, 1.0]")));
    }
    Ok(value)
}

fn scope_quantile(table: &SignalTable, kind: SignalKind, q: f64) -> Result<f64, GateError> {
    let mut values = table.present_values(kind);
    values.sort_by(f64::total_cmp);
    quantile(&values, q).ok_or_else(|| {
        GateError::InvalidConfig(format!(
            "quantile scope has no numeric {} values",
            kind.as_str()
        ))
    })
}

/// Linear interpolation between closest ranks over ascending `sorted` values.
///
/// Position is `q * (n - 1)`; `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let position = q.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    let (low, high) = (sorted[lower.min(last)], sorted[upper.min(last)]);
    Some(low + (high - low) * fraction)
}

/// A rule with every numeric threshold fixed. Shared read-only across K values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedGate {
    Absolute(AbsoluteThresholds),
    Quantile { params: QuantileThresholds, s_cutoff: f64, v_cutoff: f64 },
}

impl ResolvedGate {
    #[must_use]
    pub fn rule_name(&self) -> &'static str {
        match self {
            Self::Absolute(_) => RULE_V1,
            Self::Quantile { .. } => RULE_V2,
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> GateThresholds {
        match *self {
            Self::Absolute(thresholds) => GateThresholds::Absolute(thresholds),
            Self::Quantile { params, s_cutoff, v_cutoff } => GateThresholds::Quantile {
                s_min_quantile: params.s_min_quantile,
                v_max_quantile: params.v_max_quantile,
                s_q: s_cutoff,
                v_q: v_cutoff,
            },
        }
    }
}

/// Thresholds as recorded in reports; quantile rules include the realized cutoffs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GateThresholds {
    Quantile {
        #[serde(rename = "S_min_quantile")]
        s_min_quantile: f64,
        #[serde(rename = "V_max_quantile")]
        v_max_quantile: f64,
        #[serde(rename = "S_q")]
        s_q: f64,
        #[serde(rename = "V_q")]
        v_q: f64,
    },
    Absolute(AbsoluteThresholds),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ReasonCode {
    LowC,
    LowS,
    HighV,
    LowSQuantile,
    HighVQuantile,
    MissingScores,
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowC => "low_C",
            Self::LowS => "low_S",
            Self::HighV => "high_V",
            Self::LowSQuantile => "low_S_q",
            Self::HighVQuantile => "high_V_q",
            Self::MissingScores => "missing_scores",
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Reason codes for one record, in check order C, S, V.
///
/// Only the three signals are consulted; rank and priority are not visible here.
#[must_use]
pub fn reasons_for(signals: &Signals, gate: &ResolvedGate) -> Vec<ReasonCode> {
    let Some((c, s, v)) = signals.complete() else {
        return vec![ReasonCode::MissingScores];
    };

    let mut reasons = Vec::new();
    match *gate {
        ResolvedGate::Absolute(thresholds) => {
            if c < thresholds.c_min {
                reasons.push(ReasonCode::LowC);
            }
            if s < thresholds.s_min {
                reasons.push(ReasonCode::LowS);
            }
            if v > thresholds.v_max {
                reasons.push(ReasonCode::HighV);
            }
        }
        ResolvedGate::Quantile { s_cutoff, v_cutoff, .. } => {
            if s < s_cutoff {
                reasons.push(ReasonCode::LowSQuantile);
            }
            if v > v_cutoff {
                reasons.push(ReasonCode::HighVQuantile);
            }
        }
    }
    reasons
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatedRecord {
    pub joined: JoinedRecord,
    pub reason_codes: Vec<ReasonCode>,
}

impl GatedRecord {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.reason_codes.is_empty()
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.joined.ranked.key()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.joined.ranked.rank
    }

    /// Reason codes joined with `;` for single-field tabular output.
    #[must_use]
    pub fn reason_field(&self) -> String {
        self.reason_codes.iter().map(|code| code.as_str()).collect::<Vec<_>>().join(";")
    }
}

/// Gate result for one K, in the rank order of its Top-K set.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub k: usize,
    pub field_names: Vec<String>,
    pub signal_field_names: Vec<String>,
    pub records: Vec<GatedRecord>,
}

impl GateOutcome {
    #[must_use]
    pub fn ready(&self) -> Vec<&GatedRecord> {
        self.records.iter().filter(|record| record.is_ready()).collect()
    }

    #[must_use]
    pub fn deferred(&self) -> Vec<&GatedRecord> {
        self.records.iter().filter(|record| !record.is_ready()).collect()
    }
}

/// Classify every record of one joined Top-K set.
#[must_use]
pub fn evaluate_gate(joined: JoinedSet, gate: &ResolvedGate) -> GateOutcome {
    let records = joined
        .records
        .into_iter()
        .map(|record| {
            let reason_codes = reasons_for(&record.signals, gate);
            GatedRecord { joined: record, reason_codes }
        })
        .collect::<Vec<_>>();

    let deferred = records.iter().filter(|record| !record.is_ready()).count();
    tracing::debug!(
        k = joined.k,
        rule = gate.rule_name(),
        baseline = records.len(),
        deferred,
        "evaluated readiness gate"
    );

    GateOutcome {
        k: joined.k,
        field_names: joined.field_names,
        signal_field_names: joined.signal_field_names,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalRow;

    fn v1(c_min: f64, s_min: f64, v_max: f64) -> ResolvedGate {
        ResolvedGate::Absolute(AbsoluteThresholds { c_min, s_min, v_max })
    }

    fn table(rows: Vec<(String, f64, f64, f64)>) -> SignalTable {
        let rows = rows
            .into_iter()
            .map(|(key, c, s, v)| {
                SignalRow::parse(&key, &c.to_string(), &s.to_string(), &v.to_string(), Vec::new())
            })
            .collect::<Result<Vec<_>, _>>();
        match rows.and_then(|rows| SignalTable::new(Vec::new(), rows)) {
            Ok(table) => table,
            Err(err) => panic!("fixture signal table should build: {err}"),
        }
    }

    #[test]
    fn v1_reports_low_c_and_high_v_in_check_order() {
        let reasons = reasons_for(&Signals::new(0.4, 0.5, 0.9), &v1(0.5, 0.3, 0.8));
        assert_eq!(reasons, vec![ReasonCode::LowC, ReasonCode::HighV]);
        let codes = reasons.iter().map(|code| code.as_str()).collect::<Vec<_>>();
        assert_eq!(codes, vec!["low_C", "high_V"]);
    }

    #[test]
    fn v1_thresholds_are_strict_comparisons() {
        assert!(reasons_for(&Signals::new(0.5, 0.3, 0.8), &v1(0.5, 0.3, 0.8)).is_empty());
        assert_eq!(
            reasons_for(&Signals::new(0.0, -0.1, 1.5), &v1(0.1, 0.0, 1.0)),
            vec![ReasonCode::LowC, ReasonCode::LowS, ReasonCode::HighV]
        );
    }

    #[test]
    fn v1_defaults_admit_unit_interval() -> Result<(), GateError> {
        let config = GateConfig { rule: RULE_V1.to_string(), ..GateConfig::default() };
        let rule = GateRule::from_config(&config)?;
        assert_eq!(
            rule,
            GateRule::Absolute(AbsoluteThresholds { c_min: 0.0, s_min: 0.0, v_max: 1.0 })
        );
        let gate = rule.resolve(&table(Vec::new()))?;
        assert!(reasons_for(&Signals::new(0.0, 0.0, 1.0), &gate).is_empty());
        Ok(())
    }

    #[test]
    fn missing_scores_is_terminal() {
        let signals = Signals { c: Some(0.0), s: None, v: Some(5.0) };
        assert_eq!(reasons_for(&signals, &v1(0.5, 0.5, 0.5)), vec![ReasonCode::MissingScores]);
    }

    #[test]
    fn unknown_rule_has_no_fallback() {
        let config = GateConfig { rule: "LOCKED_GATE_V3".to_string(), ..GateConfig::default() };
        assert_eq!(
            GateRule::from_config(&config),
            Err(GateError::UnknownRule { rule: "LOCKED_GATE_V3".to_string() })
        );
        let config = GateConfig { rule: "locked_gate_v1".to_string(), ..GateConfig::default() };
        assert!(matches!(GateRule::from_config(&config), Err(GateError::UnknownRule { .. })));
    }

    #[test]
    fn v2_requires_quantiles_in_unit_interval() {
        let missing = GateConfig {
            rule: RULE_V2.to_string(),
            s_min_quantile: Some(0.1),
            ..GateConfig::default()
        };
        assert!(matches!(GateRule::from_config(&missing), Err(GateError::InvalidConfig(_))));

        let out_of_range = GateConfig {
            rule: RULE_V2.to_string(),
            s_min_quantile: Some(0.1),
            v_max_quantile: Some(1.5),
            ..GateConfig::default()
        };
        assert!(matches!(GateRule::from_config(&out_of_range), Err(GateError::InvalidConfig(_))));
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(5.0));
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert_eq!(quantile(&values, 0.25), Some(2.0));
        assert_eq!(quantile(&values, 0.375), Some(2.5));
        assert_eq!(quantile(&[7.0], 0.9), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn v2_cutoff_comes_from_whole_table() -> Result<(), GateError> {
        // Sorted S: 98 x 0.1, the target at 0.20, 101 x 0.25, 800 x 0.9.
        let mut rows = Vec::new();
        for index in 0..98 {
            rows.push((format!("LOW-{index}"), 0.5, 0.1, 0.5));
        }
        rows.push(("TARGET".to_string(), 0.5, 0.20, 0.5));
        for index in 0..101 {
            rows.push((format!("MID-{index}"), 0.5, 0.25, 0.5));
        }
        for index in 0..800 {
            rows.push((format!("HIGH-{index}"), 0.5, 0.9, 0.5));
        }
        let table = table(rows);
        assert_eq!(table.len(), 1000);

        let rule =
            GateRule::Quantile(QuantileThresholds { s_min_quantile: 0.1, v_max_quantile: 0.9 });
        let gate = rule.resolve(&table)?;
        let ResolvedGate::Quantile { s_cutoff, v_cutoff, .. } = gate else {
            panic!("quantile rule should resolve to quantile gate");
        };
        assert!((s_cutoff - 0.25).abs() < 1e-12);
        assert!((v_cutoff - 0.5).abs() < 1e-12);

        assert_eq!(
            reasons_for(&Signals::new(0.5, 0.20, 0.5), &gate),
            vec![ReasonCode::LowSQuantile]
        );
        assert!(reasons_for(&Signals::new(0.5, 0.25, 0.5), &gate).is_empty());
        assert_eq!(
            reasons_for(&Signals::new(0.5, 0.9, 0.6), &gate),
            vec![ReasonCode::HighVQuantile]
        );

        let thresholds = gate.thresholds();
        assert_eq!(
            thresholds,
            GateThresholds::Quantile {
                s_min_quantile: 0.1,
                v_max_quantile: 0.9,
                s_q: s_cutoff,
                v_q: v_cutoff
            }
        );
        Ok(())
    }

    #[test]
    fn v2_with_empty_scope_is_rejected() {
        let rule =
            GateRule::Quantile(QuantileThresholds { s_min_quantile: 0.1, v_max_quantile: 0.9 });
        assert!(matches!(rule.resolve(&table(Vec::new())), Err(GateError::InvalidConfig(_))));
    }

    #[test]
    fn reason_codes_serialize_as_their_tags() -> Result<(), serde_json::Error> {
        for code in [
            ReasonCode::LowC,
            ReasonCode::LowS,
            ReasonCode::HighV,
            ReasonCode::LowSQuantile,
            ReasonCode::HighVQuantile,
            ReasonCode::MissingScores,
        ] {
            assert_eq!(serde_json::to_value(code)?, serde_json::json!(code.as_str()));
        }
        Ok(())
    }

    #[test]
    fn config_document_uses_declared_field_names() -> Result<(), serde_json::Error> {
        let config: GateConfig = serde_json::from_str(
            r#"{"rule": "LOCKED_GATE_V2", "S_min_quantile": 0.1, "V_max_quantile": 0.9}"#,
        )?;
        assert_eq!(config.s_min_quantile, Some(0.1));
        assert_eq!(config.v_max_quantile, Some(0.9));
        assert!(serde_json::from_str::<GateConfig>(r#"{"C_min": 0.2}"#).is_err());
        Ok(())
    }
}
