//! Bounded-retry/timeout execution wrapper around a single unit.
//!
//! The wrapper never returns `Err`: every operational outcome — success,
//! timeout, typed unit failure, cancellation — becomes a `UnitResult`.
//! Retries back off exponentially (`base_delay * 2^attempt`), and a
//! classification that marks the failure non-retryable short-circuits the
//! remaining budget: retrying a parse failure cannot succeed.

use serde_json::Value;
use std::sync::Arc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classifier::{classify_unit_error, Classification, ErrorCategory};
use crate::state::UnitResult;
use crate::unit::{Unit, UnitInput};

/// Execution budget for one unit: per-attempt timeout, additional attempts
/// after the first, and the backoff base.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: std::time::Duration,
    pub retry_count: u32,
    pub base_delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(30),
            retry_count: 2,
            base_delay: std::time::Duration::from_millis(500),
        }
    }
}

/// Runs one unit under a `RetryPolicy`, optionally racing a cancellation
/// token at every suspension point.
#[derive(Clone)]
pub struct ExecutionWrapper {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ExecutionWrapper {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Race the run against a caller-held cancellation token. A timeout
    /// cancels only the current attempt; the token cancels the whole run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute the unit, retrying per policy. Always returns a structured
    /// result; `duration_ms` is measured from the first attempt's start. A
    /// failed result carries the final classification verdict in its
    /// `category`/`recoverable` metadata so downstream recording never has
    /// to re-derive it from the message text.
    pub async fn run(&self, unit: Arc<dyn Unit>, label: &'static str, input: UnitInput) -> UnitResult {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_message = String::from("run cancelled");
        let mut last_classification: Option<Classification> = None;

        for attempt in 0..=self.policy.retry_count {
            if self.cancel.is_cancelled() {
                break;
            }
            attempts = attempt + 1;

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = time::timeout(self.policy.timeout, unit.execute(input.clone())) => outcome,
            };

            match outcome {
                Ok(Ok(output)) => {
                    let confidence = match output.confidence {
                        Some(c) => c.clamp(0.0, 1.0),
                        None => {
                            warn!(unit = label, "unit reported no confidence, defaulting to 1.0");
                            1.0
                        }
                    };
                    debug!(unit = label, attempts, confidence, "unit succeeded");
                    return UnitResult::success(label, output.data, confidence, elapsed_ms(started))
                        .with_metadata("attempts", Value::from(attempts));
                }
                Ok(Err(unit_err)) => {
                    let classification = classify_unit_error(&unit_err);
                    last_classification = Some(classification);
                    last_message = unit_err.to_string();
                    warn!(
                        unit = label,
                        attempt,
                        category = %classification.category,
                        error = %last_message,
                        "unit attempt failed"
                    );
                    if !classification.should_retry {
                        break;
                    }
                }
                Err(_elapsed) => {
                    last_classification = Some(ErrorCategory::Timeout.into());
                    last_message =
                        format!("unit timed out after {}ms", self.policy.timeout.as_millis());
                    warn!(unit = label, attempt, "unit attempt timed out");
                }
            }

            if attempt < self.policy.retry_count {
                let delay = self.policy.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                time::sleep(delay).await;
            }
        }

        let mut result = UnitResult::failure(label, &last_message, elapsed_ms(started))
            .with_metadata("attempts", Value::from(attempts));
        if let Some(classification) = last_classification {
            result = result
                .with_metadata("category", Value::from(classification.category.as_str()))
                .with_metadata("recoverable", Value::Bool(classification.recoverable));
        }
        result
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
