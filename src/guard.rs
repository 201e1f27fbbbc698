//! Degraded-Mode Guard
//!
//! Decides whether a run may publish signals, from the batch quality summary
//! and the outcome of the fallback cascade:
//! - quality acceptable: `normal`, publishing allowed
//! - quality critical, secondary data available: `degraded-fallback`, allowed
//! - quality critical, secondary failed: `degraded-no-bet`, blocked
//!
//! Every decision, including operator overrides, is appended to the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::Record;
use crate::quality::QualitySummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedMode {
    #[default]
    Normal,
    DegradedFallback,
    DegradedNoBet,
}

impl DegradedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradedMode::Normal => "normal",
            DegradedMode::DegradedFallback => "degraded-fallback",
            DegradedMode::DegradedNoBet => "degraded-no-bet",
        }
    }
}

impl std::fmt::Display for DegradedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking reason recorded when both sources are unusable.
pub const CASCADING_FAILURE: &str = "cascading_failure";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_failure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub mode: DegradedMode,
    pub allow_publishing: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: GuardMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub pass_rate: f64,
    pub critical_failure: bool,
    pub total: usize,
    pub failed: usize,
}

impl From<&QualitySummary> for QualitySnapshot {
    fn from(summary: &QualitySummary) -> Self {
        Self {
            pass_rate: summary.pass_rate,
            critical_failure: summary.critical_failure,
            total: summary.total,
            failed: summary.failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: DegradedMode,
    pub allow_publishing: bool,
    pub reason: String,
    /// Absent for operator overrides.
    pub quality: Option<QualitySnapshot>,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub is_degraded: bool,
    pub current_mode: DegradedMode,
    pub audit_count: usize,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

pub struct DegradedModeGuard {
    trace_id: String,
    current_mode: DegradedMode,
    audit_trail: Vec<AuditEntry>,
}

impl DegradedModeGuard {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            current_mode: DegradedMode::Normal,
            audit_trail: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, summary: &QualitySummary, fallback: Option<&[Record]>) -> GuardDecision {
        let pass_rate = summary.pass_rate;
        info!(
            trace_id = %self.trace_id,
            pass_rate,
            critical = summary.critical_failure,
            fallback = fallback.is_some(),
            "⚖️ evaluating run"
        );

        let (mode, allow_publishing, reason, metadata) = match (summary.critical_failure, fallback) {
            (false, _) => (
                DegradedMode::Normal,
                true,
                "data quality acceptable".to_string(),
                GuardMetadata {
                    quality_pass_rate: Some(pass_rate),
                    critical_failure: Some(false),
                    ..GuardMetadata::default()
                },
            ),
            (true, Some(records)) => (
                DegradedMode::DegradedFallback,
                true,
                format!(
                    "critical quality failure ({:.0}% pass) but fallback succeeded: \
                     publishing from secondary data, review recommended",
                    pass_rate * 100.0
                ),
                GuardMetadata {
                    quality_pass_rate: Some(pass_rate),
                    critical_failure: Some(true),
                    fallback_used: Some(true),
                    fallback_records: Some(records.len()),
                    ..GuardMetadata::default()
                },
            ),
            (true, None) => (
                DegradedMode::DegradedNoBet,
                false,
                format!(
                    "INSUFFICIENT DATA QUALITY ({:.0}% pass) AND FALLBACK FAILED: \
                     publishing blocked until an operator investigates",
                    pass_rate * 100.0
                ),
                GuardMetadata {
                    quality_pass_rate: Some(pass_rate),
                    critical_failure: Some(true),
                    fallback_used: Some(false),
                    fallback_failed: Some(true),
                    blocking_reason: Some(CASCADING_FAILURE.to_string()),
                    ..GuardMetadata::default()
                },
            ),
        };

        self.decide(mode, allow_publishing, reason, metadata, Some(summary.into()))
    }

    /// Operator override: block publishing regardless of data quality.
    pub fn force_no_bet(&mut self, reason: &str) -> GuardDecision {
        warn!(trace_id = %self.trace_id, reason, "🔒 no-bet mode forced by operator");
        self.decide(
            DegradedMode::DegradedNoBet,
            false,
            format!("MANUAL OVERRIDE: {}", reason),
            GuardMetadata {
                forced: Some(true),
                ..GuardMetadata::default()
            },
            None,
        )
    }

    /// Operator override: return to normal after an incident is resolved.
    pub fn reset_to_normal(&mut self, reason: &str) -> GuardDecision {
        info!(trace_id = %self.trace_id, reason, "🔓 guard reset to normal by operator");
        self.decide(
            DegradedMode::Normal,
            true,
            format!("RESET TO NORMAL: {}", reason),
            GuardMetadata {
                reset: Some(true),
                ..GuardMetadata::default()
            },
            None,
        )
    }

    fn decide(
        &mut self,
        mode: DegradedMode,
        allow_publishing: bool,
        reason: String,
        metadata: GuardMetadata,
        quality: Option<QualitySnapshot>,
    ) -> GuardDecision {
        let decision = GuardDecision {
            mode,
            allow_publishing,
            reason,
            timestamp: Utc::now(),
            metadata,
        };
        self.current_mode = mode;

        self.audit_trail.push(AuditEntry {
            timestamp: decision.timestamp,
            mode,
            allow_publishing,
            reason: decision.reason.clone(),
            quality,
            trace_id: self.trace_id.clone(),
        });

        match mode {
            DegradedMode::DegradedNoBet => {
                error!(trace_id = %self.trace_id, mode = %mode, "🛑 NO-BET MODE ACTIVE: {}", decision.reason)
            }
            DegradedMode::DegradedFallback => {
                warn!(trace_id = %self.trace_id, mode = %mode, "⚠️ degraded fallback mode: {}", decision.reason)
            }
            DegradedMode::Normal => info!(trace_id = %self.trace_id, mode = %mode, "✅ normal mode"),
        }

        decision
    }

    pub fn current_mode(&self) -> DegradedMode {
        self.current_mode
    }

    pub fn is_degraded(&self) -> bool {
        self.current_mode != DegradedMode::Normal
    }

    /// Copy of every decision recorded so far, oldest first.
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit_trail.clone()
    }

    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            is_degraded: self.is_degraded(),
            current_mode: self.current_mode,
            audit_count: self.audit_trail.len(),
            trace_id: self.trace_id.clone(),
            timestamp: Utc::now(),
        }
    }
}
