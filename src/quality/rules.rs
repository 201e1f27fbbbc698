//! Validation Rules
//!
//! A closed set of rule variants evaluated in a fixed order against one raw
//! record. Every rule runs on every record so a single pass surfaces all of
//! a record's problems. A rule that cannot evaluate becomes a synthetic
//! `<rule>_error` failure instead of aborting the pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::models::{parse_timestamp, RecordPayload};

/// Entries kept per detail list when an outcome is copied into audit output.
pub const PREVIEW_MAX_ITEMS: usize = 5;
/// Characters kept per detail string in audit output.
pub const PREVIEW_MAX_CHARS: usize = 200;

const SCORE_FIELDS: [&str; 2] = ["home_score", "away_score"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Result of one rule against one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub passed: bool,
    pub severity: Severity,
    pub details: Value,
}

impl RuleOutcome {
    fn new(rule: &Rule, problems_key: &str, problems: Vec<String>) -> Self {
        Self {
            rule_name: rule.name().to_string(),
            passed: problems.is_empty(),
            severity: rule.severity(),
            details: json!({ problems_key: problems }),
        }
    }

    /// Detail payload capped for audit output.
    pub fn detail_preview(&self) -> Value {
        preview(&self.details)
    }

    /// `rule: message; message` summary used in validation outcomes.
    pub fn summary_line(&self) -> String {
        let mut messages = Vec::new();
        collect_strings(&self.details, &mut messages);
        if messages.is_empty() {
            format!("{}: {}", self.rule_name, self.details)
        } else {
            format!("{}: {}", self.rule_name, messages.join("; "))
        }
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn preview(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > PREVIEW_MAX_CHARS => {
            Value::String(s.chars().take(PREVIEW_MAX_CHARS).collect())
        }
        Value::Array(items) => Value::Array(items.iter().take(PREVIEW_MAX_ITEMS).map(preview).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), preview(v))).collect()),
        other => other.clone(),
    }
}

/// A rule could not be evaluated on this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    UnparseableTimestamp { field: &'static str, value: String },
    UnexpectedShape { field: &'static str, expected: &'static str },
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnparseableTimestamp { field, value } => {
                write!(f, "cannot parse {} as a date-time: {:?}", field, value)
            }
            Self::UnexpectedShape { field, expected } => {
                write!(f, "{} has an unexpected shape (expected {})", field, expected)
            }
        }
    }
}

impl std::error::Error for RuleError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Every listed field present and non-null.
    Completeness { required_fields: Vec<String> },
    /// Scores non-negative, `scheduled_at` parseable, `external_id` not blank.
    Validity,
    /// Both teams present and distinct.
    Consistency,
    /// `scheduled_at` no older than `max_age_hours`.
    Timeliness { max_age_hours: u32 },
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Completeness { .. } => "completeness",
            Rule::Validity => "validity",
            Rule::Consistency => "consistency",
            Rule::Timeliness { .. } => "timeliness",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Rule::Timeliness { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn evaluate(&self, payload: &RecordPayload, now: DateTime<Utc>) -> Result<RuleOutcome, RuleError> {
        match self {
            Rule::Completeness { required_fields } => Ok(self.completeness(payload, required_fields)),
            Rule::Validity => Ok(self.validity(payload)),
            Rule::Consistency => self.consistency(payload),
            Rule::Timeliness { max_age_hours } => self.timeliness(payload, now, *max_age_hours),
        }
    }

    fn completeness(&self, payload: &RecordPayload, required_fields: &[String]) -> RuleOutcome {
        let missing: Vec<String> = required_fields
            .iter()
            .filter(|field| !payload.has_value(field))
            .cloned()
            .collect();
        RuleOutcome::new(self, "missing_fields", missing)
    }

    fn validity(&self, payload: &RecordPayload) -> RuleOutcome {
        let mut invalid = Vec::new();

        for field in SCORE_FIELDS {
            match payload.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) if n.as_f64().is_some_and(|v| v >= 0.0) => {}
                Some(_) => invalid.push(format!("{}: negative or invalid value", field)),
            }
        }

        match payload.get("scheduled_at") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if parse_timestamp(s).is_some() => {}
            Some(_) => invalid.push("scheduled_at: invalid datetime format".to_string()),
        }

        if let Some(Value::String(id)) = payload.get("external_id") {
            if id.trim().is_empty() {
                invalid.push("external_id: blank value".to_string());
            }
        }

        RuleOutcome::new(self, "invalid_fields", invalid)
    }

    fn consistency(&self, payload: &RecordPayload) -> Result<RuleOutcome, RuleError> {
        let mut errors = Vec::new();

        let home = payload.get("home_team").filter(|v| !v.is_null());
        let away = payload.get("away_team").filter(|v| !v.is_null());

        if let (Some(home), Some(away)) = (home, away) {
            let home_id = team_id(home, "home_team")?;
            let away_id = team_id(away, "away_team")?;
            if !home_id.is_empty() && !away_id.is_empty() && home_id == away_id {
                errors.push("same_team: home and away teams are identical".to_string());
            }
        }

        if home.is_none() || away.is_none() {
            errors.push("missing_team: need both home and away teams".to_string());
        }

        Ok(RuleOutcome::new(self, "errors", errors))
    }

    fn timeliness(
        &self,
        payload: &RecordPayload,
        now: DateTime<Utc>,
        max_age_hours: u32,
    ) -> Result<RuleOutcome, RuleError> {
        let raw = match payload.get("scheduled_at") {
            None | Some(Value::Null) => return Ok(RuleOutcome::new(self, "errors", Vec::new())),
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(RuleError::UnexpectedShape {
                    field: "scheduled_at",
                    expected: "string",
                })
            }
        };

        let scheduled = parse_timestamp(raw).ok_or_else(|| RuleError::UnparseableTimestamp {
            field: "scheduled_at",
            value: raw.clone(),
        })?;

        let age = now - scheduled;
        let mut errors = Vec::new();
        if age > chrono::Duration::hours(i64::from(max_age_hours)) {
            errors.push(format!(
                "stale_data: match is {:.1} hours old (max: {})",
                age.num_seconds() as f64 / 3600.0,
                max_age_hours
            ));
        }
        Ok(RuleOutcome::new(self, "errors", errors))
    }
}

/// Lower-cased team id; an object without an id reads as empty.
fn team_id(team: &Value, field: &'static str) -> Result<String, RuleError> {
    match team {
        Value::Object(map) => Ok(map
            .get("id")
            .and_then(Value::as_str)
            .map(|id| id.trim().to_lowercase())
            .unwrap_or_default()),
        _ => Err(RuleError::UnexpectedShape {
            field,
            expected: "object with id/name/city",
        }),
    }
}

/// Evaluates the ordered rule set against single records.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Completeness, validity, consistency, timeliness.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(vec![
            Rule::Completeness {
                required_fields: config.required_fields.clone(),
            },
            Rule::Validity,
            Rule::Consistency,
            Rule::Timeliness {
                max_age_hours: config.timeliness_max_age_hours,
            },
        ])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(&self, payload: &RecordPayload) -> Vec<RuleOutcome> {
        self.evaluate_at(payload, Utc::now())
    }

    pub fn evaluate_at(&self, payload: &RecordPayload, now: DateTime<Utc>) -> Vec<RuleOutcome> {
        self.rules
            .iter()
            .map(|rule| match rule.evaluate(payload, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        rule = rule.name(),
                        record = %payload.external_id(),
                        error = %e,
                        "⚠️ validation rule could not evaluate"
                    );
                    RuleOutcome {
                        rule_name: format!("{}_error", rule.name()),
                        passed: false,
                        severity: Severity::Error,
                        details: json!({ "error": e.to_string(), "kind": ErrorKind::ValidationRuleError }),
                    }
                }
            })
            .collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> RecordPayload {
        RecordPayload::from_value(value)
    }

    fn fresh_match(now: DateTime<Utc>) -> Value {
        json!({
            "external_id": "nba-100",
            "home_team": {"id": "lal", "name": "Lakers", "city": "Los Angeles"},
            "away_team": {"id": "bos", "name": "Celtics", "city": "Boston"},
            "scheduled_at": (now + chrono::Duration::hours(3)).to_rfc3339(),
            "season": "2024-25"
        })
    }

    fn outcome<'a>(outcomes: &'a [RuleOutcome], name: &str) -> &'a RuleOutcome {
        outcomes
            .iter()
            .find(|o| o.rule_name == name)
            .unwrap_or_else(|| panic!("no outcome named {name}"))
    }

    #[test]
    fn test_clean_record_passes_every_rule() {
        let now = Utc::now();
        let outcomes = RuleEngine::default().evaluate_at(&payload(fresh_match(now)), now);
        let names: Vec<_> = outcomes.iter().map(|o| o.rule_name.as_str()).collect();
        assert_eq!(names, vec!["completeness", "validity", "consistency", "timeliness"]);
        assert!(outcomes.iter().all(|o| o.passed));
    }

    #[test]
    fn test_completeness_lists_missing_and_null_fields() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value["season"] = Value::Null;
        value.as_object_mut().unwrap().remove("external_id");

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        let completeness = outcome(&outcomes, "completeness");
        assert!(!completeness.passed);
        assert_eq!(completeness.severity, Severity::Error);
        assert_eq!(completeness.details["missing_fields"], json!(["external_id", "season"]));
    }

    #[test]
    fn test_validity_flags_negative_scores_and_bad_dates() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value["home_score"] = json!(-3);
        value["away_score"] = json!("ninety");
        value["scheduled_at"] = json!("not-a-date");

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        let validity = outcome(&outcomes, "validity");
        assert!(!validity.passed);
        let invalid = validity.details["invalid_fields"].as_array().unwrap();
        assert_eq!(invalid.len(), 3);
    }

    #[test]
    fn test_consistency_detects_same_team_case_insensitive() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value["home_team"]["id"] = json!("lal");
        value["away_team"]["id"] = json!("LAL");

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        let consistency = outcome(&outcomes, "consistency");
        assert!(!consistency.passed);
        assert!(consistency.details.to_string().contains("same_team"));
    }

    #[test]
    fn test_consistency_requires_both_teams() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value.as_object_mut().unwrap().remove("away_team");

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        let consistency = outcome(&outcomes, "consistency");
        assert!(consistency.details.to_string().contains("missing_team"));
    }

    #[test]
    fn test_timeliness_is_a_warning() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value["scheduled_at"] = json!((now - chrono::Duration::hours(30)).to_rfc3339());

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        let timeliness = outcome(&outcomes, "timeliness");
        assert!(!timeliness.passed);
        assert_eq!(timeliness.severity, Severity::Warning);
        assert!(timeliness.details.to_string().contains("stale_data"));
        assert!(outcomes.iter().filter(|o| o.rule_name != "timeliness").all(|o| o.passed));
    }

    #[test]
    fn test_rule_error_becomes_synthetic_failure_and_evaluation_continues() {
        let now = Utc::now();
        let mut value = fresh_match(now);
        value["home_team"] = json!("LAL");
        value["scheduled_at"] = json!(1_700_000_000);

        let outcomes = RuleEngine::default().evaluate_at(&payload(value), now);
        assert_eq!(outcomes.len(), 4);

        let consistency = outcome(&outcomes, "consistency_error");
        assert!(!consistency.passed);
        assert_eq!(consistency.severity, Severity::Error);
        assert_eq!(consistency.details["kind"], "VALIDATION_RULE_ERROR");
        assert!(consistency.details["error"].is_string());

        let timeliness = outcome(&outcomes, "timeliness_error");
        assert_eq!(timeliness.severity, Severity::Error);
        assert!(outcome(&outcomes, "completeness").passed);
    }

    #[test]
    fn test_empty_payload_fails_without_rule_errors() {
        let now = Utc::now();
        let outcomes = RuleEngine::default().evaluate_at(&payload(json!(null)), now);
        assert!(!outcome(&outcomes, "completeness").passed);
        assert!(!outcome(&outcomes, "consistency").passed);
        assert!(outcome(&outcomes, "validity").passed);
        assert!(outcome(&outcomes, "timeliness").passed);
    }

    #[test]
    fn test_detail_preview_is_bounded() {
        let long = "x".repeat(PREVIEW_MAX_CHARS * 2);
        let outcome = RuleOutcome {
            rule_name: "completeness".into(),
            passed: false,
            severity: Severity::Error,
            details: json!({ "missing_fields": vec![long; 9] }),
        };
        let preview = outcome.detail_preview();
        let items = preview["missing_fields"].as_array().unwrap();
        assert_eq!(items.len(), PREVIEW_MAX_ITEMS);
        assert_eq!(items[0].as_str().unwrap().len(), PREVIEW_MAX_CHARS);
    }
}
