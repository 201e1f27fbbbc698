//! Run orchestration
//!
//! One run = one batch: validate → (if critical) fallback → guard →
//! (if allowed) signal generation → persistence. Every run ends in exactly one
//! [`RunStatus`] and is written to the store's run ledger on a best-effort basis.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::fallback::{FallbackCascade, FallbackReport};
use crate::guard::{AuditEntry, DegradedModeGuard, GuardDecision};
use crate::models::{Record, RecordPayload};
use crate::quality::{
    QualityAssessor, QualityScorer, QualitySummary, RecordQualityScore, ScoreAggregate, ValidationOutcome,
};
use crate::signals::{Exclusion, ExclusionChecker, ExclusionReason, SignalOrigin, SignalProducer};
use crate::sources::{PrimarySource, SourceClient};
use crate::storage::{
    CancelFlag, PersistFailure, PersistenceAttempt, RetryingPersister, RunLedgerEntry, SignalStore,
    StoredSignal,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Published,
    NoData { cause: ErrorKind, details: String },
    /// `cause` is the secondary-source failure that left no usable data.
    Blocked { reason: String, cause: Option<ErrorKind> },
    StorageFailed { cause: ErrorKind, details: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Published)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Published => "published",
            RunStatus::NoData { .. } => "no_data",
            RunStatus::Blocked { .. } => "blocked",
            RunStatus::StorageFailed { .. } => "storage_failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn cause(&self) -> Option<ErrorKind> {
        match self {
            RunStatus::NoData { cause, .. } | RunStatus::StorageFailed { cause, .. } => Some(*cause),
            RunStatus::Blocked { cause, .. } => *cause,
            RunStatus::Cancelled => Some(ErrorKind::RunCancelled),
            RunStatus::Published => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub trace_id: String,
    pub status: RunStatus,
    pub summary: Option<QualitySummary>,
    pub scores: Option<ScoreAggregate>,
    pub fallback: Option<FallbackReport>,
    pub decision: Option<GuardDecision>,
    pub audit: Vec<AuditEntry>,
    pub persistence: Vec<PersistenceAttempt>,
    pub exclusions: Vec<Exclusion>,
    pub signals_generated: usize,
    pub signals_persisted: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    fn new(run_id: String, trace_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            trace_id,
            status: RunStatus::Cancelled,
            summary: None,
            scores: None,
            fallback: None,
            decision: None,
            audit: Vec::new(),
            persistence: Vec::new(),
            exclusions: Vec::new(),
            signals_generated: 0,
            signals_persisted: 0,
            started_at,
            completed_at: started_at,
        }
    }

    pub fn ledger_entry(&self) -> RunLedgerEntry {
        RunLedgerEntry {
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            status: self.status.label().to_string(),
            error_cause: self.status.cause().map(|kind| kind.code().to_string()),
            mode: self.decision.as_ref().map(|d| d.mode.as_str().to_string()),
            allow_publishing: self.decision.as_ref().map(|d| d.allow_publishing),
            pass_rate: self.summary.as_ref().map(|s| s.pass_rate),
            critical_failure: self.summary.as_ref().map(|s| s.critical_failure),
            signals_persisted: self.signals_persisted,
            report: serde_json::to_value(self).unwrap_or_default(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// A record that survived validation, with the score it earned.
struct Candidate {
    record: Record,
    quality: RecordQualityScore,
}

pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<dyn SourceClient>,
    store: Arc<dyn SignalStore>,
    producer: Arc<dyn SignalProducer>,
    checker: ExclusionChecker,
    scorer: QualityScorer,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn SourceClient>,
        store: Arc<dyn SignalStore>,
        producer: Arc<dyn SignalProducer>,
    ) -> Self {
        let checker = ExclusionChecker::from_config(&config);
        Self {
            config,
            client,
            store,
            producer,
            checker,
            scorer: QualityScorer::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch the batch from the primary source, then run it.
    pub async fn run_from_primary(&self, cancel: &CancelFlag) -> RunReport {
        let trace_id = Uuid::new_v4().to_string();
        let source = PrimarySource::new(self.client.clone(), &self.config, trace_id.clone());

        match source.fetch().await {
            Ok(payloads) => self.run_traced(payloads, trace_id, cancel).await,
            Err(failure) => {
                let mut report = RunReport::new(Uuid::new_v4().to_string(), trace_id, Utc::now());
                error!(
                    trace_id = %report.trace_id,
                    run_id = %report.run_id,
                    cause = failure.cause.kind().code(),
                    details = %failure.details,
                    "❌ Primary source failed, no data for this run"
                );
                report.status = RunStatus::NoData {
                    cause: failure.cause.kind(),
                    details: failure.details,
                };
                self.finish(report).await
            }
        }
    }

    /// Run an already-fetched batch.
    pub async fn run_batch(&self, payloads: Vec<RecordPayload>, cancel: &CancelFlag) -> RunReport {
        self.run_traced(payloads, Uuid::new_v4().to_string(), cancel).await
    }

    async fn run_traced(&self, payloads: Vec<RecordPayload>, trace_id: String, cancel: &CancelFlag) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let mut report = RunReport::new(run_id.clone(), trace_id.clone(), Utc::now());
        info!(trace_id = %trace_id, run_id = %run_id, records = payloads.len(), "▶️ Run started");

        if cancel.is_cancelled() {
            return self.finish(report).await;
        }

        // 1. Validate
        let assessor = QualityAssessor::new(&self.config, trace_id.clone());
        let outcomes = assessor.validate_batch(&payloads);
        let summary = assessor.summarize(&outcomes);
        report.summary = Some(summary.clone());

        // 2. Fallback
        let mut cascade = FallbackCascade::new(self.client.clone(), &self.config, trace_id.clone());
        let secondary = cascade.trigger_if_needed(&summary).await;
        let fallback = cascade.report();
        let fallback_cause = fallback.cause;
        report.fallback = Some(fallback);

        // 3. Guard
        let mut guard = DegradedModeGuard::new(trace_id.clone());
        let decision = guard.evaluate(&summary, secondary.as_deref());
        report.decision = Some(decision.clone());
        report.audit = guard.audit_trail();

        if !decision.allow_publishing {
            report.status = RunStatus::Blocked {
                reason: decision.reason.clone(),
                cause: fallback_cause,
            };
            return self.finish(report).await;
        }
        if cancel.is_cancelled() {
            return self.finish(report).await;
        }

        // 4. Signals
        let (origin, candidates) = match secondary {
            Some(records) => (SignalOrigin::Secondary, self.score_secondary(&assessor, records)),
            None => (
                SignalOrigin::Primary,
                self.score_primary(&payloads, &outcomes, &mut report.exclusions),
            ),
        };
        let mut scores = Vec::with_capacity(candidates.len());
        let rows = self.generate(origin, candidates, &mut scores, &mut report.exclusions);
        report.scores = Some(self.scorer.aggregate(&scores));
        report.signals_generated = rows.len();

        // 5. Persist
        let persister = RetryingPersister::new(self.store.clone(), &self.config, trace_id.clone());
        match persister.persist(&run_id, &rows, cancel).await {
            Ok(receipt) => {
                report.signals_persisted = receipt.persisted;
                report.persistence = receipt.attempts;
                report.status = RunStatus::Published;
            }
            Err(failure) => {
                report.status = storage_status(&failure);
                report.persistence = failure.attempts;
            }
        }

        self.finish(report).await
    }

    fn score_primary(
        &self,
        payloads: &[RecordPayload],
        outcomes: &[ValidationOutcome],
        exclusions: &mut Vec<Exclusion>,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (payload, outcome) in payloads.iter().zip(outcomes) {
            if outcome.is_fail() {
                exclusions.push(Exclusion::new(
                    outcome.record_id.clone(),
                    ExclusionReason::InvalidContract,
                    outcome.errors.join("; "),
                ));
                continue;
            }
            match Record::from_payload(payload) {
                Ok(record) => candidates.push(Candidate {
                    record,
                    quality: self.scorer.score(outcome),
                }),
                Err(e) => exclusions.push(Exclusion::new(
                    outcome.record_id.clone(),
                    ExclusionReason::InvalidContract,
                    e.to_string(),
                )),
            }
        }
        candidates
    }

    /// Secondary records are already canonical; they still go through the rules
    /// so their scores are comparable with primary ones.
    fn score_secondary(&self, assessor: &QualityAssessor, records: Vec<Record>) -> Vec<Candidate> {
        records
            .into_iter()
            .map(|record| {
                let outcome = assessor.validate_record(&record.to_payload());
                Candidate {
                    quality: self.scorer.score(&outcome),
                    record,
                }
            })
            .collect()
    }

    fn generate(
        &self,
        origin: SignalOrigin,
        candidates: Vec<Candidate>,
        scores: &mut Vec<RecordQualityScore>,
        exclusions: &mut Vec<Exclusion>,
    ) -> Vec<StoredSignal> {
        let mut rows = Vec::new();
        for Candidate { record, quality } in candidates {
            let score = quality.score;
            scores.push(quality);

            if let Some(excluded) = self.checker.check(&record, score) {
                exclusions.push(excluded);
                continue;
            }
            let Some(signal) = self.producer.produce(&record) else {
                exclusions.push(Exclusion::new(
                    record.external_id.clone(),
                    ExclusionReason::MissingData,
                    "producer returned no signal",
                ));
                continue;
            };
            match serde_json::to_value(&signal) {
                Ok(payload) => rows.push(StoredSignal {
                    external_id: signal.external_id.clone(),
                    origin: origin.as_str().to_string(),
                    quality_score: Some(score),
                    payload,
                    generated_at: signal.generated_at,
                }),
                Err(e) => warn!(record = %record.external_id, error = %e, "signal not serializable, skipped"),
            }
        }
        rows
    }

    async fn finish(&self, mut report: RunReport) -> RunReport {
        report.completed_at = Utc::now();
        match &report.status {
            RunStatus::Published => info!(
                trace_id = %report.trace_id,
                run_id = %report.run_id,
                generated = report.signals_generated,
                persisted = report.signals_persisted,
                excluded = report.exclusions.len(),
                "✅ Run published"
            ),
            RunStatus::Blocked { reason, cause } => error!(
                trace_id = %report.trace_id,
                run_id = %report.run_id,
                reason = %reason,
                cause = cause.map(|kind| kind.code()).unwrap_or("none"),
                "🛑 Run blocked"
            ),
            RunStatus::Cancelled => {
                warn!(trace_id = %report.trace_id, run_id = %report.run_id, "⏹️ Run cancelled")
            }
            RunStatus::NoData { cause, .. } | RunStatus::StorageFailed { cause, .. } => error!(
                trace_id = %report.trace_id,
                run_id = %report.run_id,
                status = report.status.label(),
                cause = cause.code(),
                "❌ Run failed"
            ),
        }

        if let Err(e) = self.store.record_run(&report.ledger_entry()).await {
            warn!(run_id = %report.run_id, error = %e, "failed to record run in ledger");
        }
        report
    }
}

fn storage_status(failure: &PersistFailure) -> RunStatus {
    if failure.is_cancelled() {
        RunStatus::Cancelled
    } else {
        RunStatus::StorageFailed {
            cause: failure.kind(),
            details: failure.to_string(),
        }
    }
}
