//! Batch quality gate: rule evaluation, batch summary, per-record scores.

pub mod assessor;
pub mod rules;
pub mod scoring;


pub use assessor::{derive_status, QualityAssessor, QualitySummary, ValidationOutcome, ValidationStatus};
pub use rules::{Rule, RuleEngine, RuleError, RuleOutcome, Severity};
pub use scoring::{QualityScorer, RecordQualityScore, ScoreAggregate};
