//! Record Quality Scoring
//!
//! Turns a `ValidationOutcome` into a 0-100 score and a letter grade. Signal
//! eligibility reads the score; the gate itself only reads `QualitySummary`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::assessor::{ValidationOutcome, ValidationStatus};
use super::rules::PREVIEW_MAX_ITEMS;

/// Points deducted per failed error-severity rule.
pub const ERROR_WEIGHT: f64 = 50.0;
/// Points deducted per failed warning-severity rule.
pub const WARNING_WEIGHT: f64 = 10.0;

const PASS_SCORE: f64 = 90.0;
const WARNING_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQualityScore {
    pub record_id: String,
    pub score: f64,
    pub status: ValidationStatus,
    pub details: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreAggregate {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warned: usize,
    pub average_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, outcome: &ValidationOutcome) -> RecordQualityScore {
        let raw = 100.0
            - outcome.errors.len() as f64 * ERROR_WEIGHT
            - outcome.warnings.len() as f64 * WARNING_WEIGHT;
        let score = round2(raw.clamp(0.0, 100.0));

        let status = if score >= PASS_SCORE {
            ValidationStatus::Pass
        } else if score >= WARNING_SCORE {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Fail
        };

        let errors: Vec<_> = outcome.errors.iter().take(PREVIEW_MAX_ITEMS).collect();
        let warnings: Vec<_> = outcome.warnings.iter().take(PREVIEW_MAX_ITEMS).collect();

        RecordQualityScore {
            record_id: outcome.record_id.clone(),
            score,
            status,
            details: json!({
                "error_count": outcome.errors.len(),
                "warning_count": outcome.warnings.len(),
                "errors": errors,
                "warnings": warnings,
            }),
        }
    }

    pub fn score_batch(&self, outcomes: &[ValidationOutcome]) -> Vec<RecordQualityScore> {
        outcomes.iter().map(|o| self.score(o)).collect()
    }

    pub fn aggregate(&self, scores: &[RecordQualityScore]) -> ScoreAggregate {
        if scores.is_empty() {
            return ScoreAggregate::default();
        }

        let total = scores.len();
        let count = |status: ValidationStatus| scores.iter().filter(|s| s.status == status).count();
        let passed = count(ValidationStatus::Pass);
        let values = scores.iter().map(|s| s.score);

        let sum: f64 = values.clone().sum();
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        let average = sum / total as f64;
        let pass_rate = passed as f64 / total as f64;

        info!(
            "📐 run quality aggregate: {}/{} passed (rate: {:.1}%, avg: {:.1})",
            passed,
            total,
            pass_rate * 100.0,
            average
        );

        ScoreAggregate {
            total,
            passed,
            failed: count(ValidationStatus::Fail),
            warned: count(ValidationStatus::Warning),
            average_score: round2(average),
            min_score: round2(min),
            max_score: round2(max),
            pass_rate: round2(pass_rate),
        }
    }

    pub fn grade(&self, score: f64) -> char {
        match score {
            s if s >= 95.0 => 'A',
            s if s >= 85.0 => 'B',
            s if s >= 75.0 => 'C',
            s if s >= 60.0 => 'D',
            _ => 'F',
        }
    }
}

#[inline]
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
