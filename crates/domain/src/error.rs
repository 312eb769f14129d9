//! Error taxonomy shared by every layer of the engine.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a rejected operation.
///
/// Every error raised by the engine maps onto exactly one kind; the HTTP
/// layer derives the status code from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed, missing or out-of-range input.
    Validation,
    /// Unknown order or item.
    NotFound,
    /// Operation forbidden by the order's current status.
    InvalidTransition,
    /// Quantity update would break the requested ≥ approved ≥ packed ≥ delivered chain.
    InvariantViolation,
    /// Another writer changed the order first.
    Conflict,
    /// Storage or infrastructure failure.
    Internal,
}

impl ErrorKind {
    /// Returns the kind name as used in error bodies and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing one of the domain's textual enums or formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid order number: {0}")]
    OrderNumber(String),
}
