//! Phase topology and per-run state for the case analysis engine.
//!
//! This module provides:
//! - `Phase` — the five ordered analysis phases plus terminal states
//! - the legal transition table, checked before any mutation
//! - `RunState` — the mutable state of one case run
//! - `UnitResult` and `RunError` — per-unit outcomes and the run error list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::EngineError;

/// One step of case analysis, or a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initialized,
    DocumentProcessing,
    ParallelVerification,
    RiskScoring,
    NarrativeGeneration,
    Completed,
    Failed,
}

impl Phase {
    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::DocumentProcessing => "document_processing",
            Self::ParallelVerification => "parallel_verification",
            Self::RiskScoring => "risk_scoring",
            Self::NarrativeGeneration => "narrative_generation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Legal outgoing edges from this phase.
    ///
    /// `failed -> initialized` is the escape edge for whole-run retry.
    pub fn successors(self) -> &'static [Phase] {
        match self {
            Self::Initialized => &[Self::DocumentProcessing],
            Self::DocumentProcessing => &[Self::ParallelVerification, Self::Failed],
            Self::ParallelVerification => &[Self::RiskScoring, Self::Failed],
            Self::RiskScoring => &[Self::NarrativeGeneration, Self::Failed],
            Self::NarrativeGeneration => &[Self::Completed, Self::Failed],
            Self::Completed => &[],
            Self::Failed => &[Self::Initialized],
        }
    }

    /// Check whether the edge `self -> to` is declared in the table.
    pub fn can_transition(self, to: Phase) -> bool {
        self.successors().contains(&to)
    }

    /// Terminal within a single run. `failed` still has the retry escape
    /// edge, but no slot mutation happens past this point.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one unit execution through the wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    /// Whether the unit produced usable output.
    pub success: bool,
    /// The unit's domain payload, if any.
    pub data: Option<Value>,
    /// Last failure message when `success` is false.
    pub error: Option<String>,
    /// Self-reported reliability in [0, 1]. Zero for failures.
    pub confidence: f64,
    /// Wall time from the first attempt's start, not the last attempt alone.
    pub duration_ms: u64,
    /// Label of the unit that produced this result.
    pub unit_label: String,
    /// Free-form annotations, e.g. `attempts`, `degraded`.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl UnitResult {
    /// Create a successful result.
    pub fn success(unit_label: &str, data: Value, confidence: f64, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            confidence,
            duration_ms,
            unit_label: unit_label.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a failed result carrying the last failure message.
    pub fn failure(unit_label: &str, error: &str, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            confidence: 0.0,
            duration_ms,
            unit_label: unit_label.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Synthesize a degraded result for a unit whose task terminated by
    /// unhandled abort rather than a structured failure. Downstream code
    /// sees the same `UnitResult` shape regardless of failure mode.
    pub fn degraded(unit_label: &str, message: &str) -> Self {
        Self::failure(unit_label, message, 0).with_metadata("degraded", Value::Bool(true))
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Whether this result was synthesized from an aborted task.
    pub fn is_degraded(&self) -> bool {
        self.metadata.get("degraded").and_then(Value::as_bool) == Some(true)
    }
}

/// One recorded operational failure within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub phase: Phase,
    pub unit_label: String,
    /// Formatted as `"[category] message"` by the classifier.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

/// The mutable state of one case run.
///
/// Created fresh per case invocation, owned exclusively by its
/// orchestrator invocation for the run's duration, and handed back to the
/// caller at a terminal phase. Persistence is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub case_id: String,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_result: Option<UnitResult>,
    pub identity_result: Option<UnitResult>,
    pub watchlist_result: Option<UnitResult>,
    pub risk_result: Option<UnitResult>,
    pub narrative_result: Option<UnitResult>,
    /// Strictly additive, ordered by occurrence.
    pub errors: Vec<RunError>,
    /// Number of whole-run retries taken via the `failed -> initialized` edge.
    pub retry_count: u32,
}

impl RunState {
    /// Fresh state at `initialized` with all slots empty.
    pub fn new(case_id: &str) -> Self {
        let now = Utc::now();
        Self {
            case_id: case_id.to_string(),
            phase: Phase::Initialized,
            started_at: now,
            updated_at: now,
            document_result: None,
            identity_result: None,
            watchlist_result: None,
            risk_result: None,
            narrative_result: None,
            errors: Vec::new(),
            retry_count: 0,
        }
    }

    /// Apply a transition, checking the edge table before any mutation.
    /// An undeclared edge leaves the state untouched.
    pub fn transition(&mut self, to: Phase) -> Result<(), EngineError> {
        if !self.phase.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        self.touch();
        Ok(())
    }

    /// Force the run to `failed` regardless of the current phase.
    ///
    /// Documented escape hatch for faults inside the engine's own control
    /// flow; every other caller goes through `transition`.
    pub fn force_fail(&mut self) {
        self.phase = Phase::Failed;
        self.touch();
    }

    /// Walk the `failed -> initialized` retry edge: slots are cleared for
    /// re-attempt, the error history is kept.
    pub fn begin_retry(&mut self) -> Result<(), EngineError> {
        self.transition(Phase::Initialized)?;
        self.retry_count += 1;
        self.document_result = None;
        self.identity_result = None;
        self.watchlist_result = None;
        self.risk_result = None;
        self.narrative_result = None;
        Ok(())
    }

    /// Append a run error, preserving occurrence order.
    pub fn record_error(&mut self, error: RunError) {
        self.errors.push(error);
        self.touch();
    }

    /// Bump `updated_at` after a slot mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
