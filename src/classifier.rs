//! Failure classification for the execution wrapper and orchestrator.
//!
//! Structural matching on `UnitError` variants comes first; substring
//! matching against the raw message is kept as a fallback for opaque
//! external failures. Categories carry a fixed retry/recoverability
//! verdict: only a data error (`invalid_response`) is pointless to retry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use serde_json::Value;

use crate::errors::UnitError;
use crate::state::{Phase, RunError, UnitResult};

/// Failure category, in priority order of the text-pattern fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    ApiError,
    Network,
    InvalidResponse,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::ApiError => "api_error",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category plus its retry and recoverability verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub recoverable: bool,
    pub should_retry: bool,
}

impl From<ErrorCategory> for Classification {
    fn from(category: ErrorCategory) -> Self {
        let transient = matches!(
            category,
            ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::ApiError
                | ErrorCategory::Network
        );
        Self {
            category,
            recoverable: transient,
            should_retry: transient,
        }
    }
}

/// Classify a typed unit failure structurally. `Other` falls back to the
/// text-pattern classifier.
pub fn classify_unit_error(error: &UnitError) -> Classification {
    match error {
        UnitError::Timeout(_) => ErrorCategory::Timeout.into(),
        UnitError::RateLimited(_) => ErrorCategory::RateLimit.into(),
        UnitError::Api { .. } => ErrorCategory::ApiError.into(),
        UnitError::Network(_) => ErrorCategory::Network.into(),
        UnitError::InvalidResponse(_) => ErrorCategory::InvalidResponse.into(),
        UnitError::Other(message) => classify(message),
    }
}

/// Classify a raw failure message by substring patterns, highest priority
/// first. `unknown` is the conservative default.
pub fn classify(raw: &str) -> Classification {
    let lower = raw.to_lowercase();

    let category = if contains_any(&lower, &["timeout", "timed out", "deadline exceeded"]) {
        ErrorCategory::Timeout
    } else if contains_any(&lower, &["rate limit", "rate-limit", "too many requests", "429"]) {
        ErrorCategory::RateLimit
    } else if contains_any(
        &lower,
        &[
            "500",
            "502",
            "503",
            "504",
            "internal server error",
            "bad gateway",
            "service unavailable",
            "api error",
        ],
    ) {
        ErrorCategory::ApiError
    } else if contains_any(
        &lower,
        &["network", "connection", "dns", "socket", "unreachable"],
    ) {
        ErrorCategory::Network
    } else if contains_any(
        &lower,
        &["invalid", "malformed", "parse", "unparseable", "unexpected token"],
    ) {
        ErrorCategory::InvalidResponse
    } else {
        ErrorCategory::Unknown
    };

    category.into()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Recover the verdict the execution wrapper stamped on a failed result's
/// metadata. `None` for synthesized results (aborted tasks, cancellation),
/// which never went through classification.
pub fn recorded_classification(result: &UnitResult) -> Option<Classification> {
    let category: ErrorCategory =
        serde_json::from_value(result.metadata.get("category")?.clone()).ok()?;
    let recoverable = result.metadata.get("recoverable").and_then(Value::as_bool)?;
    Some(Classification {
        category,
        recoverable,
        should_retry: Classification::from(category).should_retry,
    })
}

/// Build a `RunError` from a classified failure, formatting the message as
/// `"[category] message"` and stamping the current time.
pub fn build_error(
    phase: Phase,
    unit_label: &str,
    message: &str,
    classification: &Classification,
) -> RunError {
    RunError {
        phase,
        unit_label: unit_label.to_string(),
        message: format!("[{}] {}", classification.category, message),
        timestamp: Utc::now(),
        recoverable: classification.recoverable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_patterns_are_retryable() {
        let c = classify("OCR service timed out");
        assert_eq!(c.category, ErrorCategory::Timeout);
        assert!(c.recoverable);
        assert!(c.should_retry);
    }

    #[test]
    fn rate_limit_patterns() {
        assert_eq!(classify("429 Too Many Requests").category, ErrorCategory::RateLimit);
        assert_eq!(classify("hit the rate limit").category, ErrorCategory::RateLimit);
    }

    #[test]
    fn api_error_patterns() {
        assert_eq!(
            classify("upstream returned 503 Service Unavailable").category,
            ErrorCategory::ApiError
        );
    }

    #[test]
    fn network_patterns() {
        let c = classify("connection refused");
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.should_retry);
    }

    #[test]
    fn invalid_response_is_not_retryable() {
        let c = classify("malformed JSON in response body");
        assert_eq!(c.category, ErrorCategory::InvalidResponse);
        assert!(!c.recoverable);
        assert!(!c.should_retry);
    }

    #[test]
    fn unknown_is_conservative_default() {
        let c = classify("something inexplicable happened");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(!c.recoverable);
        assert!(!c.should_retry);
    }

    #[test]
    fn priority_order_prefers_timeout_over_network() {
        // Both "timed out" and "connection" appear; timeout wins.
        let c = classify("connection timed out");
        assert_eq!(c.category, ErrorCategory::Timeout);
    }

    #[test]
    fn structural_classification_skips_text_matching() {
        // The message alone would classify as timeout; the variant wins.
        let c = classify_unit_error(&UnitError::InvalidResponse("timed out mid-parse".into()));
        assert_eq!(c.category, ErrorCategory::InvalidResponse);
        assert!(!c.should_retry);
    }

    #[test]
    fn other_variant_falls_back_to_text() {
        let c = classify_unit_error(&UnitError::Other("DNS lookup failed".into()));
        assert_eq!(c.category, ErrorCategory::Network);
    }

    #[test]
    fn recorded_verdict_round_trips_through_metadata() {
        let result = UnitResult::failure("risk_scoring", "invalid response: truncated", 5)
            .with_metadata("category", serde_json::json!("invalid_response"))
            .with_metadata("recoverable", serde_json::json!(false));
        let c = recorded_classification(&result).unwrap();
        assert_eq!(c.category, ErrorCategory::InvalidResponse);
        assert!(!c.recoverable);
        assert!(!c.should_retry);

        let bare = UnitResult::degraded("watchlist_screening", "task aborted");
        assert!(recorded_classification(&bare).is_none());
    }

    #[test]
    fn build_error_formats_category_prefix() {
        let c = classify("OCR service timed out");
        let err = build_error(
            Phase::DocumentProcessing,
            "document_extraction",
            "OCR service timed out",
            &c,
        );
        assert_eq!(err.message, "[timeout] OCR service timed out");
        assert_eq!(err.phase, Phase::DocumentProcessing);
        assert_eq!(err.unit_label, "document_extraction");
        assert!(err.recoverable);
    }
}
