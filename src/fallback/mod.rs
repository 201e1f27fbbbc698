//! Secondary-source fallback and payload normalization.

pub mod cascade;
pub mod normalize;


pub use cascade::{
    FallbackCascade, FallbackCause, FallbackEvent, FallbackEventKind, FallbackFailure, FallbackReport,
    FallbackStatus,
};
pub use normalize::{normalize_body, normalize_value, Normalized, UndecodablePayload};
