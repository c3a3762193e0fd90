//! Confidence-based routing over a (possibly partial) run.
//!
//! Pure and idempotent: safe to call repeatedly, including against
//! in-progress runs for live progress estimation. The verdict is
//! deliberately conservative — any reason at all routes the case to a
//! human, and a watchlist hit or deny-level risk score escalates
//! regardless of how confident the units were.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{RunState, UnitResult};
use crate::unit::{DOCUMENT_UNIT, IDENTITY_UNIT, NARRATIVE_UNIT, RISK_UNIT, WATCHLIST_UNIT};

/// Confidence and risk thresholds. Defaults match the engine's shipped
/// policy; deployments may tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub document: f64,
    pub identity: f64,
    pub watchlist: f64,
    pub risk: f64,
    pub narrative: f64,
    /// Minimum acceptable mean confidence across all five slots.
    pub overall_mean: f64,
    /// Risk score at which escalation becomes a concern.
    pub risk_escalation: f64,
    /// Risk score at which the concern is deny-level.
    pub risk_deny: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            document: 0.70,
            identity: 0.80,
            watchlist: 0.90,
            risk: 0.60,
            narrative: 0.50,
            overall_mean: 0.70,
            risk_escalation: 50.0,
            risk_deny: 75.0,
        }
    }
}

/// What to do with the case after analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AutoReview,
    ManualReview,
    Escalate,
}

/// The routing verdict: reasons are human-readable and auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub requires_manual_review: bool,
    pub recommended_action: RecommendedAction,
    pub reasons: Vec<String>,
    /// Units that contributed at least one reason.
    pub flagged_units: Vec<String>,
    /// Mean confidence over all five slots; a missing slot contributes 0.
    pub overall_confidence: f64,
}

/// Route a run using the default thresholds.
pub fn route(state: &RunState) -> RoutingDecision {
    route_with(state, &Thresholds::default())
}

/// Route a run using caller-supplied thresholds.
pub fn route_with(state: &RunState, thresholds: &Thresholds) -> RoutingDecision {
    let mut reasons = Vec::new();
    let mut flagged_units = Vec::new();
    let mut confidence_total = 0.0;

    let slots: [(&Option<UnitResult>, &str, f64); 5] = [
        (&state.document_result, DOCUMENT_UNIT, thresholds.document),
        (&state.identity_result, IDENTITY_UNIT, thresholds.identity),
        (&state.watchlist_result, WATCHLIST_UNIT, thresholds.watchlist),
        (&state.risk_result, RISK_UNIT, thresholds.risk),
        (&state.narrative_result, NARRATIVE_UNIT, thresholds.narrative),
    ];

    for (slot, label, threshold) in slots {
        match slot {
            None => {
                reasons.push(format!("{label}: no result"));
                flagged_units.push(label.to_string());
            }
            Some(result) if !result.success => {
                confidence_total += result.confidence;
                reasons.push(format!(
                    "{label} failed: {}",
                    result.error.as_deref().unwrap_or("no failure message")
                ));
                flagged_units.push(label.to_string());
            }
            Some(result) => {
                confidence_total += result.confidence;
                if result.confidence < threshold {
                    let gap = (threshold - result.confidence) * 100.0;
                    reasons.push(format!(
                        "{label} confidence {:.0}% is {gap:.0}% below the required {:.0}%",
                        result.confidence * 100.0,
                        threshold * 100.0,
                    ));
                    flagged_units.push(label.to_string());
                }
            }
        }
    }

    let overall_confidence = confidence_total / 5.0;
    if overall_confidence < thresholds.overall_mean {
        reasons.push(format!(
            "overall confidence {:.0}% is below the required {:.0}%",
            overall_confidence * 100.0,
            thresholds.overall_mean * 100.0,
        ));
    }

    // Domain flags, independent of any confidence threshold.
    let watchlist_hit = bool_field(&state.watchlist_result, "flagged") == Some(true);
    if watchlist_hit {
        reasons.push("watchlist hit: applicant matched a screening list entry".to_string());
        if !flagged_units.iter().any(|u| u == WATCHLIST_UNIT) {
            flagged_units.push(WATCHLIST_UNIT.to_string());
        }
    }
    if bool_field(&state.identity_result, "verified") == Some(false) {
        reasons.push("identity could not be verified against extracted documents".to_string());
        if !flagged_units.iter().any(|u| u == IDENTITY_UNIT) {
            flagged_units.push(IDENTITY_UNIT.to_string());
        }
    }

    let risk_score = number_field(&state.risk_result, "risk_score");
    if let Some(score) = risk_score {
        if score >= thresholds.risk_escalation {
            reasons.push(format!(
                "risk score {score:.0} at or above escalation threshold {:.0}",
                thresholds.risk_escalation
            ));
        }
        if score >= thresholds.risk_deny {
            reasons.push(format!(
                "risk score {score:.0} at or above deny threshold {:.0}",
                thresholds.risk_deny
            ));
        }
    }

    let deny_level = risk_score.is_some_and(|s| s >= thresholds.risk_deny);
    let recommended_action = if watchlist_hit || deny_level {
        RecommendedAction::Escalate
    } else if reasons.is_empty() {
        RecommendedAction::AutoReview
    } else {
        RecommendedAction::ManualReview
    };

    RoutingDecision {
        requires_manual_review: !reasons.is_empty(),
        recommended_action,
        reasons,
        flagged_units,
        overall_confidence,
    }
}

fn bool_field(slot: &Option<UnitResult>, key: &str) -> Option<bool> {
    slot.as_ref()?
        .data
        .as_ref()?
        .get(key)
        .and_then(Value::as_bool)
}

fn number_field(slot: &Option<UnitResult>, key: &str) -> Option<f64> {
    slot.as_ref()?
        .data
        .as_ref()?
        .get(key)
        .and_then(Value::as_f64)
}
