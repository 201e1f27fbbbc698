//! Retrying Persistence
//!
//! Each attempt is a single store transaction. Attempts are bounded and
//! separated by a linearly growing pause (`base * attempt`). A cancelled run
//! stops before the next attempt or pause and is never reported as success.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::store::{SignalStore, StoredSignal};
use crate::config::PipelineConfig;
use crate::error::ErrorKind;

/// Shared cancellation flag for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceAttempt {
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReceipt {
    pub run_id: String,
    pub persisted: usize,
    pub attempts: Vec<PersistenceAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PersistFailureCause {
    Exhausted { last_error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFailure {
    pub run_id: String,
    pub cause: PersistFailureCause,
    pub attempts: Vec<PersistenceAttempt>,
}

impl PersistFailure {
    pub fn kind(&self) -> ErrorKind {
        match self.cause {
            PersistFailureCause::Exhausted { .. } => ErrorKind::PersistenceFailure,
            PersistFailureCause::Cancelled => ErrorKind::RunCancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, PersistFailureCause::Cancelled)
    }
}

impl std::fmt::Display for PersistFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            PersistFailureCause::Exhausted { last_error } => write!(
                f,
                "persistence failed for run {} after {} attempts: {}",
                self.run_id,
                self.attempts.len(),
                last_error
            ),
            PersistFailureCause::Cancelled => write!(
                f,
                "persistence cancelled for run {} after {} attempts",
                self.run_id,
                self.attempts.len()
            ),
        }
    }
}

impl std::error::Error for PersistFailure {}

pub struct RetryingPersister {
    store: Arc<dyn SignalStore>,
    max_attempts: u32,
    backoff_base: Duration,
    trace_id: String,
}

impl RetryingPersister {
    pub fn new(store: Arc<dyn SignalStore>, config: &PipelineConfig, trace_id: impl Into<String>) -> Self {
        Self::with_policy(store, config.max_persist_retries, config.backoff_base(), trace_id)
    }

    pub fn with_policy(
        store: Arc<dyn SignalStore>,
        max_attempts: u32,
        backoff_base: Duration,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            backoff_base,
            trace_id: trace_id.into(),
        }
    }

    /// Pause after failed attempt `attempt` (1-based).
    #[inline]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    pub async fn persist(
        &self,
        run_id: &str,
        rows: &[StoredSignal],
        cancel: &CancelFlag,
    ) -> Result<PersistReceipt, PersistFailure> {
        let mut attempts = Vec::new();

        if cancel.is_cancelled() {
            return Err(self.cancelled(run_id, attempts));
        }
        if rows.is_empty() {
            info!(trace_id = %self.trace_id, run_id, "no signals to persist");
            return Ok(PersistReceipt {
                run_id: run_id.to_string(),
                persisted: 0,
                attempts,
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(self.cancelled(run_id, attempts));
            }

            match self.store.upsert_batch(run_id, rows).await {
                Ok(persisted) => {
                    attempts.push(PersistenceAttempt {
                        attempt,
                        succeeded: true,
                        error: None,
                    });
                    info!(
                        trace_id = %self.trace_id,
                        run_id,
                        persisted,
                        attempt,
                        "💾 signals persisted"
                    );
                    return Ok(PersistReceipt {
                        run_id: run_id.to_string(),
                        persisted,
                        attempts,
                    });
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    warn!(
                        trace_id = %self.trace_id,
                        run_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %last_error,
                        "persistence attempt failed"
                    );
                    attempts.push(PersistenceAttempt {
                        attempt,
                        succeeded: false,
                        error: Some(last_error.clone()),
                    });
                }
            }

            if attempt < self.max_attempts {
                if cancel.is_cancelled() {
                    return Err(self.cancelled(run_id, attempts));
                }
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }
        }

        error!(
            trace_id = %self.trace_id,
            run_id,
            attempts = attempts.len(),
            error = %last_error,
            "❌ persistence exhausted, nothing written"
        );
        Err(PersistFailure {
            run_id: run_id.to_string(),
            cause: PersistFailureCause::Exhausted { last_error },
            attempts,
        })
    }

    fn cancelled(&self, run_id: &str, attempts: Vec<PersistenceAttempt>) -> PersistFailure {
        warn!(trace_id = %self.trace_id, run_id, "🛑 persistence cancelled");
        PersistFailure {
            run_id: run_id.to_string(),
            cause: PersistFailureCause::Cancelled,
            attempts,
        }
    }
}
