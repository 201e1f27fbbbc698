//! Error kinds surfaced in run reports
//!
//! These are classification codes, not exception types: each failure path maps
//! to exactly one kind so callers can tell "no data" from "blocked" from
//! "storage failed" without parsing messages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SourceTimeout,
    SourceHttpError,
    SourceUnavailable,
    FallbackTimeout,
    FallbackHttpError,
    FallbackEmptyResponse,
    FallbackUnavailable,
    /// Secondary payload could not be decoded at all.
    FallbackError,
    /// A validation rule itself failed to run.
    ValidationRuleError,
    PersistenceFailure,
    RunCancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceTimeout => "SOURCE_TIMEOUT",
            Self::SourceHttpError => "SOURCE_HTTP_ERROR",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::FallbackTimeout => "FALLBACK_TIMEOUT",
            Self::FallbackHttpError => "FALLBACK_HTTP_ERROR",
            Self::FallbackEmptyResponse => "FALLBACK_EMPTY_RESPONSE",
            Self::FallbackUnavailable => "FALLBACK_UNAVAILABLE",
            Self::FallbackError => "FALLBACK_ERROR",
            Self::ValidationRuleError => "VALIDATION_RULE_ERROR",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::RunCancelled => "RUN_CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
