use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DecodeError;

/// Longest slice of an undecodable payload kept for the detail view.
pub const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFlag {
    pub key: String,
    pub value: Value,
}

/// A decoded grading payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grading {
    pub score: Option<f64>,
    pub max: Option<f64>,
    pub level: Option<String>,
    pub feedback: String,
    pub reason: String,
    pub detected: Vec<DetectedFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Missing,
    Empty,
    Malformed,
    NotAnObject,
    /// The submission has fewer items than the table being displayed.
    Padded,
}

impl From<&DecodeError> for UnavailableReason {
    fn from(e: &DecodeError) -> Self {
        match e {
            DecodeError::Missing => UnavailableReason::Missing,
            DecodeError::Empty => UnavailableReason::Empty,
            DecodeError::Malformed { .. } => UnavailableReason::Malformed,
            DecodeError::NotAnObject => UnavailableReason::NotAnObject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unavailable {
    pub reason: UnavailableReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GradingResult {
    Graded(Grading),
    Unavailable(Unavailable),
}

impl GradingResult {
    /// Decode a feedback cell. Never fails: anything that does not decode
    /// becomes `Unavailable` for this item only.
    pub fn from_payload(raw: Option<&str>) -> Self {
        match decode(raw) {
            Ok(g) => GradingResult::Graded(g),
            Err(e) => {
                tracing::debug!(kind = e.kind(), "grading payload unavailable");
                let excerpt = match e {
                    DecodeError::Malformed { .. } | DecodeError::NotAnObject => {
                        raw.map(|t| t.chars().take(EXCERPT_CHARS).collect())
                    }
                    DecodeError::Missing | DecodeError::Empty => None,
                };
                GradingResult::Unavailable(Unavailable {
                    reason: UnavailableReason::from(&e),
                    excerpt,
                })
            }
        }
    }

    pub fn padded() -> Self {
        GradingResult::Unavailable(Unavailable {
            reason: UnavailableReason::Padded,
            excerpt: None,
        })
    }

    pub fn graded(&self) -> Option<&Grading> {
        match self {
            GradingResult::Graded(g) => Some(g),
            GradingResult::Unavailable(_) => None,
        }
    }

    pub fn is_graded(&self) -> bool {
        self.graded().is_some()
    }

    pub fn score(&self) -> Option<f64> {
        self.graded().and_then(|g| g.score)
    }

    pub fn max(&self) -> Option<f64> {
        self.graded().and_then(|g| g.max)
    }

    pub fn level(&self) -> Option<&str> {
        self.graded().and_then(|g| g.level.as_deref())
    }

    /// Decoded feedback text; empty for unavailable items.
    pub fn feedback(&self) -> &str {
        self.graded().map(|g| g.feedback.as_str()).unwrap_or("")
    }

    pub fn reason(&self) -> &str {
        self.graded().map(|g| g.reason.as_str()).unwrap_or("")
    }
}

/// Strict decode of one feedback cell.
pub fn decode(raw: Option<&str>) -> Result<Grading, DecodeError> {
    let Some(raw) = raw else {
        return Err(DecodeError::Missing);
    };
    let text = raw.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|source| DecodeError::Malformed { source })?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let mut g = Grading {
        score: obj.get("score").and_then(number_like),
        max: obj.get("max").and_then(number_like),
        level: obj.get("level").and_then(parse_level),
        ..Grading::default()
    };
    if let Some(Value::String(s)) = obj.get("feedback") {
        g.feedback = s.clone();
    }
    if let Some(Value::String(s)) = obj.get("reason") {
        g.reason = s.clone();
    }
    if let Some(Value::Object(d)) = obj.get("detected") {
        g.detected = d
            .iter()
            .map(|(k, v)| DetectedFlag {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
    }
    Ok(g)
}

fn number_like(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Single-letter achievement grades (a-d) are upper-cased; any other label
/// is kept as written.
fn parse_level(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        return None;
    }
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if matches!(c.to_ascii_uppercase(), 'A'..='D') => {
            Some(c.to_ascii_uppercase().to_string())
        }
        _ => Some(s),
    }
}

/// Integers print without a trailing `.0`.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRule {
    pub key: String,
    pub label: String,
}

impl FlagRule {
    fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// Display labels for rubric detection flags, per table and item.
/// Item keys are 1-based indices as strings; `"*"` matches any other item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RubricFlags {
    tables: BTreeMap<String, BTreeMap<String, Vec<FlagRule>>>,
}

impl RubricFlags {
    pub fn builtin() -> Self {
        let mut dat2 = BTreeMap::new();
        dat2.insert(
            "1".to_string(),
            vec![
                FlagRule::new("freezing", "응고/얼음"),
                FlagRule::new("heat_release", "열 방출(응고열)"),
            ],
        );
        dat2.insert(
            "2".to_string(),
            vec![
                FlagRule::new("heat_absorb_common", "공통: 열 흡수"),
                FlagRule::new("sublimation", "차이: 승화"),
                FlagRule::new("fusion", "차이: 융해"),
            ],
        );
        dat2.insert(
            "*".to_string(),
            vec![
                FlagRule::new("phase_change_energy", "㉠ 잠열/상변화 에너지"),
                FlagRule::new("ignition_point", "㉡ 발화점/연소 위험"),
            ],
        );
        let mut tables = BTreeMap::new();
        tables.insert("DAT2".to_string(), dat2);
        Self { tables }
    }

    pub fn rules_for(&self, table: &str, item: usize) -> Option<&[FlagRule]> {
        let items = self
            .tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, items)| items)?;
        items
            .get(&item.to_string())
            .or_else(|| items.get("*"))
            .map(|v| v.as_slice())
    }

    /// Replace raw detection keys with labelled booleans. Tables without
    /// rules keep the payload's flags untouched.
    pub fn apply(&self, table: &str, item: usize, result: &mut GradingResult) {
        let GradingResult::Graded(g) = result else {
            return;
        };
        let Some(rules) = self.rules_for(table, item) else {
            return;
        };
        let relabelled = rules
            .iter()
            .map(|rule| {
                let hit = g
                    .detected
                    .iter()
                    .find(|f| f.key == rule.key)
                    .map(|f| truthy(&f.value))
                    .unwrap_or(false);
                DetectedFlag {
                    key: rule.label.clone(),
                    value: Value::Bool(hit),
                }
            })
            .collect();
        g.detected = relabelled;
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
