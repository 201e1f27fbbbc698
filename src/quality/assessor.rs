//! Batch Quality Assessment
//!
//! Runs the rule engine over a batch and reduces the per-record outcomes to a
//! single `QualitySummary`. The summary's `critical_failure` flag is computed
//! here exactly once per batch; downstream stages read it, never recompute it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rules::{RuleEngine, RuleOutcome, Severity};
use crate::config::PipelineConfig;
use crate::models::RecordPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Warning,
    Fail,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "pass",
            ValidationStatus::Warning => "warning",
            ValidationStatus::Fail => "fail",
        }
    }
}

/// `fail` if any error-severity rule failed, else `warning` if any warning-severity
/// rule failed, else `pass`.
pub fn derive_status(outcomes: &[RuleOutcome]) -> ValidationStatus {
    let failed = |severity: Severity| outcomes.iter().any(|o| !o.passed && o.severity == severity);
    if failed(Severity::Error) {
        ValidationStatus::Fail
    } else if failed(Severity::Warning) {
        ValidationStatus::Warning
    } else {
        ValidationStatus::Pass
    }
}

/// Per-record aggregate of rule outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub record_id: String,
    pub status: ValidationStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rule_outcomes: Vec<RuleOutcome>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationOutcome {
    pub fn from_rule_outcomes(record_id: String, rule_outcomes: Vec<RuleOutcome>, checked_at: DateTime<Utc>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for outcome in rule_outcomes.iter().filter(|o| !o.passed) {
            match outcome.severity {
                Severity::Error => errors.push(outcome.summary_line()),
                Severity::Warning => warnings.push(outcome.summary_line()),
            }
        }

        Self {
            record_id,
            status: derive_status(&rule_outcomes),
            errors,
            warnings,
            rule_outcomes,
            checked_at,
        }
    }

    #[inline]
    pub fn is_fail(&self) -> bool {
        self.status == ValidationStatus::Fail
    }
}

/// Batch verdict. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Records whose only failures were warnings (counted in `passed` unless configured otherwise).
    pub warned: usize,
    pub pass_rate: f64,
    pub critical_failure: bool,
    pub threshold: f64,
}

impl QualitySummary {
    pub fn empty(threshold: f64) -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            warned: 0,
            pass_rate: 0.0,
            critical_failure: false,
            threshold,
        }
    }
}

pub struct QualityAssessor {
    engine: RuleEngine,
    threshold: f64,
    count_warnings_as_failures: bool,
    trace_id: String,
}

impl QualityAssessor {
    pub fn new(config: &PipelineConfig, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let engine = RuleEngine::from_config(config);
        debug!(trace_id = %trace_id, rules = engine.rules().len(), "quality assessor ready");
        Self {
            engine,
            threshold: config.critical_failure_threshold,
            count_warnings_as_failures: config.count_warnings_as_failures,
            trace_id,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn validate_record(&self, payload: &RecordPayload) -> ValidationOutcome {
        self.validate_record_at(payload, Utc::now())
    }

    pub fn validate_record_at(&self, payload: &RecordPayload, now: DateTime<Utc>) -> ValidationOutcome {
        let record_id = payload.external_id();
        let outcome = ValidationOutcome::from_rule_outcomes(record_id, self.engine.evaluate_at(payload, now), now);
        debug!(
            trace_id = %self.trace_id,
            record = %outcome.record_id,
            status = outcome.status.as_str(),
            errors = outcome.errors.len(),
            warnings = outcome.warnings.len(),
            "record validated"
        );
        outcome
    }

    /// One outcome per input record, in input order.
    pub fn validate_batch(&self, payloads: &[RecordPayload]) -> Vec<ValidationOutcome> {
        let now = Utc::now();
        let outcomes: Vec<_> = payloads.iter().map(|p| self.validate_record_at(p, now)).collect();

        let failed = outcomes.iter().filter(|o| o.is_fail()).count();
        info!(
            trace_id = %self.trace_id,
            total = outcomes.len(),
            failed,
            "🔎 batch validated: {} ok, {} failed",
            outcomes.len() - failed,
            failed
        );
        outcomes
    }

    pub fn summarize(&self, outcomes: &[ValidationOutcome]) -> QualitySummary {
        let total = outcomes.len();
        if total == 0 {
            info!(trace_id = %self.trace_id, "empty batch, nothing to assess");
            return QualitySummary::empty(self.threshold);
        }

        let warned = outcomes
            .iter()
            .filter(|o| o.status == ValidationStatus::Warning)
            .count();
        let passed = outcomes
            .iter()
            .filter(|o| match o.status {
                ValidationStatus::Pass => true,
                ValidationStatus::Warning => !self.count_warnings_as_failures,
                ValidationStatus::Fail => false,
            })
            .count();
        let failed = total - passed;
        let pass_rate = passed as f64 / total as f64;
        let critical_failure = pass_rate < 1.0 - self.threshold;

        if critical_failure {
            warn!(
                trace_id = %self.trace_id,
                pass_rate,
                threshold = self.threshold,
                "🚨 CRITICAL QUALITY THRESHOLD REACHED: {:.1}% pass rate (minimum {:.0}%)",
                pass_rate * 100.0,
                (1.0 - self.threshold) * 100.0
            );
        }

        QualitySummary {
            total,
            passed,
            failed,
            warned,
            pass_rate,
            critical_failure,
            threshold: self.threshold,
        }
    }
}
