//! Typed error hierarchy for the case analysis engine.
//!
//! Two top-level enums cover the two failure boundaries:
//! - `EngineError` — programmer errors and engine-internal faults
//! - `UnitError` — operational failures reported by a domain unit
//!
//! Operational failures never propagate as `Err` past the execution
//! wrapper; they become `UnitResult { success: false }`. `EngineError`
//! variants other than `Internal` are always fatal and are never wrapped
//! into a `RunError`.

use thiserror::Error;

use crate::state::Phase;

/// Errors from the orchestration engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An edge not present in the phase transition table was attempted.
    /// Raised before any state mutation.
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// A unit label was dispatched without a registration.
    #[error("No unit registered for label '{label}'")]
    UnitNotRegistered { label: String },

    /// A fault inside the engine's own control flow. Converted to a
    /// `RunError { unit_label: "orchestrator" }` at the top level rather
    /// than escaping to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Operational failures a unit may report from its execution path.
///
/// Units are expected to return the closest structural variant so the
/// classifier can match without text inspection; `Other` exists for
/// genuinely opaque external failures and falls back to pattern matching.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_phases() {
        let err = EngineError::InvalidTransition {
            from: Phase::Initialized,
            to: Phase::Completed,
        };
        let text = err.to_string();
        assert!(text.contains("initialized"));
        assert!(text.contains("completed"));
    }

    #[test]
    fn unit_not_registered_carries_label() {
        let err = EngineError::UnitNotRegistered {
            label: "document_extraction".to_string(),
        };
        assert!(err.to_string().contains("document_extraction"));
    }

    #[test]
    fn engine_error_converts_from_anyhow() {
        let inner = anyhow::anyhow!("event bus wedged");
        let err: EngineError = inner.into();
        assert!(matches!(err, EngineError::Internal(_)));
        assert!(err.to_string().contains("event bus wedged"));
    }

    #[test]
    fn unit_error_api_carries_status() {
        let err = UnitError::Api {
            status: 503,
            message: "service unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&EngineError::UnitNotRegistered { label: "x".into() });
        assert_std_error(&UnitError::Network("reset".into()));
    }
}
