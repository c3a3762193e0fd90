//! End-to-end scenarios for the case analysis engine: full five-phase
//! runs against scripted units, partial-failure continuation, and the
//! routing verdicts each outcome should produce.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use casework::classifier::ErrorCategory;
use casework::state::Phase;
use casework::unit::{
    ApplicantClaims, CaseInput, DocumentDescriptor, Unit, UnitInput, UnitOutput, ALL_UNITS,
    DOCUMENT_UNIT, IDENTITY_UNIT, NARRATIVE_UNIT, RISK_UNIT, WATCHLIST_UNIT,
};
use casework::{
    route, EngineConfig, EngineError, Orchestrator, RecommendedAction, RunEvent, UnitConfig,
    UnitError, UnitRegistry,
};

/// Always succeeds with a fixed payload and confidence.
struct StaticUnit {
    data: Value,
    confidence: f64,
}

#[async_trait]
impl Unit for StaticUnit {
    async fn execute(&self, _input: UnitInput) -> Result<UnitOutput, UnitError> {
        Ok(UnitOutput::new(self.data.clone(), self.confidence))
    }
}

/// Always fails with the supplied error.
struct FailingUnit {
    error: fn() -> UnitError,
}

#[async_trait]
impl Unit for FailingUnit {
    async fn execute(&self, _input: UnitInput) -> Result<UnitOutput, UnitError> {
        Err((self.error)())
    }
}

/// Terminates by unhandled panic rather than a structured failure.
struct PanickingUnit;

#[async_trait]
impl Unit for PanickingUnit {
    async fn execute(&self, _input: UnitInput) -> Result<UnitOutput, UnitError> {
        panic!("backing index corrupted");
    }
}

fn test_case() -> CaseInput {
    CaseInput::new(
        ApplicantClaims {
            full_name: "Ada Quinn".into(),
            date_of_birth: Some("1990-04-12".into()),
            nationality: Some("NL".into()),
            id_number: Some("X1234567".into()),
        },
        vec![DocumentDescriptor {
            doc_type: "passport".into(),
            reference: "blob://cases/1/passport.pdf".into(),
        }],
    )
    .with_case_id("case-e2e")
}

/// Registry where every phase succeeds with the given confidences and
/// benign domain payloads.
fn clean_registry(confidences: [f64; 5]) -> UnitRegistry {
    clean_registry_with_risk(confidences, 12.0)
}

fn clean_registry_with_risk(confidences: [f64; 5], risk_score: f64) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    registry.register(
        DOCUMENT_UNIT,
        Arc::new(StaticUnit {
            data: json!({"fields": {"full_name": "Ada Quinn"}}),
            confidence: confidences[0],
        }),
    );
    registry.register(
        IDENTITY_UNIT,
        Arc::new(StaticUnit {
            data: json!({"verified": true}),
            confidence: confidences[1],
        }),
    );
    registry.register(
        WATCHLIST_UNIT,
        Arc::new(StaticUnit {
            data: json!({"flagged": false, "matches": []}),
            confidence: confidences[2],
        }),
    );
    registry.register(
        RISK_UNIT,
        Arc::new(StaticUnit {
            data: json!({"risk_score": risk_score}),
            confidence: confidences[3],
        }),
    );
    registry.register(
        NARRATIVE_UNIT,
        Arc::new(StaticUnit {
            data: json!({"summary": "No adverse findings."}),
            confidence: confidences[4],
        }),
    );
    registry
}

/// Fast budgets so failure-path tests do not sit in real backoff sleeps.
fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.defaults = UnitConfig {
        timeout_ms: 2_000,
        retry_count: 0,
        base_delay_ms: 1,
        tuning: Default::default(),
    };
    config
}

#[tokio::test]
async fn scenario_a_clean_run_auto_reviews() {
    let _ = tracing_subscriber::fmt::try_init();
    let registry = Arc::new(clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]));
    let orchestrator = Orchestrator::new(registry, fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Completed);
    assert!(state.errors.is_empty());
    for slot in [
        &state.document_result,
        &state.identity_result,
        &state.watchlist_result,
        &state.risk_result,
        &state.narrative_result,
    ] {
        assert!(slot.as_ref().is_some_and(|r| r.success));
    }

    let decision = route(&state);
    assert!(!decision.requires_manual_review);
    assert_eq!(decision.recommended_action, RecommendedAction::AutoReview);
}

#[tokio::test]
async fn scenario_b_document_failure_short_circuits_run() {
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(
        DOCUMENT_UNIT,
        Arc::new(FailingUnit {
            error: || UnitError::Other("OCR service timed out".into()),
        }),
    );
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.errors.len(), 1);
    let error = &state.errors[0];
    assert_eq!(error.phase, Phase::DocumentProcessing);
    assert_eq!(error.unit_label, DOCUMENT_UNIT);
    assert!(error.message.starts_with(&format!("[{}]", ErrorCategory::Timeout)));
    assert!(error.recoverable);
    // No verification was attempted without document output
    assert!(state.identity_result.is_none());
    assert!(state.watchlist_result.is_none());
}

#[tokio::test]
async fn scenario_c_watchlist_flag_escalates_above_threshold() {
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(
        WATCHLIST_UNIT,
        Arc::new(StaticUnit {
            data: json!({"flagged": true, "matches": [{"list": "sanctions", "score": 0.97}]}),
            confidence: 0.94,
        }),
    );
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();
    assert_eq!(state.phase, Phase::Completed);

    let decision = route(&state);
    assert!(decision.requires_manual_review);
    assert!(decision.reasons.iter().any(|r| r.contains("watchlist hit")));
    assert_eq!(decision.recommended_action, RecommendedAction::Escalate);
}

#[tokio::test]
async fn scenario_d_deny_level_risk_score_escalates() {
    let registry = clean_registry_with_risk([0.95, 0.94, 0.99, 0.96, 0.95], 80.0);
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();
    let decision = route(&state);

    assert!(decision.reasons.iter().any(|r| r.contains("deny threshold 75")));
    assert_eq!(decision.recommended_action, RecommendedAction::Escalate);
}

#[tokio::test]
async fn data_error_keeps_its_structural_category_in_the_error_log() {
    // The message text alone reads as a timeout; the recorded error must
    // follow the variant's verdict, not the text.
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(
        DOCUMENT_UNIT,
        Arc::new(FailingUnit {
            error: || {
                UnitError::InvalidResponse("response truncated, upstream request timed out".into())
            },
        }),
    );
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Failed);
    let error = &state.errors[0];
    assert!(error
        .message
        .starts_with(&format!("[{}]", ErrorCategory::InvalidResponse)));
    assert!(!error.recoverable);
}

#[tokio::test]
async fn run_start_is_published_before_the_first_transition() {
    let registry = Arc::new(clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]));
    let orchestrator = Orchestrator::new(registry, fast_config());
    let mut events = orchestrator.subscribe();

    orchestrator.run(&test_case()).await.unwrap();

    match events.try_recv().unwrap() {
        RunEvent::RunStarted { case_id, phase } => {
            assert_eq!(case_id, "case-e2e");
            assert_eq!(phase, Phase::Initialized);
        }
        other => panic!("expected RunStarted first, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_document_unit_fails_the_run_without_crashing() {
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(DOCUMENT_UNIT, Arc::new(PanickingUnit));
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Failed);
    let document = state.document_result.as_ref().unwrap();
    assert!(!document.success);
    assert!(document.is_degraded());
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].unit_label, DOCUMENT_UNIT);
}

#[tokio::test]
async fn partial_verification_failure_continues_run() {
    let mut registry = clean_registry([0.95, 0.9, 0.99, 0.96, 0.95]);
    registry.register(WATCHLIST_UNIT, Arc::new(PanickingUnit));
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());
    let mut events = orchestrator.subscribe();

    let state = orchestrator.run(&test_case()).await.unwrap();

    // The sibling unit is untouched and the run proceeds past verification.
    let identity = state.identity_result.as_ref().unwrap();
    assert!(identity.success);
    assert_eq!(identity.confidence, 0.9);

    let watchlist = state.watchlist_result.as_ref().unwrap();
    assert!(!watchlist.success);
    assert!(watchlist.is_degraded());

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].unit_label, WATCHLIST_UNIT);

    // The transition stream shows the run reached risk scoring.
    let mut reached_risk = false;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::PhaseChanged { to: Phase::RiskScoring, .. } = event {
            reached_risk = true;
        }
    }
    assert!(reached_risk);
}

#[tokio::test]
async fn total_verification_failure_records_one_combined_error() {
    let mut registry = clean_registry([0.95, 0.9, 0.99, 0.96, 0.95]);
    registry.register(
        IDENTITY_UNIT,
        Arc::new(FailingUnit {
            error: || UnitError::Network("identity provider unreachable".into()),
        }),
    );
    registry.register(WATCHLIST_UNIT, Arc::new(PanickingUnit));
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.errors.len(), 1);
    let error = &state.errors[0];
    assert_eq!(error.phase, Phase::ParallelVerification);
    assert!(error.message.contains(IDENTITY_UNIT));
    assert!(error.message.contains(WATCHLIST_UNIT));
    // Both failed slots are still retained for the reviewer
    assert!(state.identity_result.is_some());
    assert!(state.watchlist_result.is_some());
    assert!(state.risk_result.is_none());
}

#[tokio::test]
async fn risk_failure_is_fatal_but_keeps_partial_evidence() {
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(
        RISK_UNIT,
        Arc::new(FailingUnit {
            error: || UnitError::InvalidResponse("score missing from payload".into()),
        }),
    );
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let state = orchestrator.run(&test_case()).await.unwrap();

    assert_eq!(state.phase, Phase::Failed);
    assert!(state.document_result.as_ref().unwrap().success);
    assert!(state.identity_result.as_ref().unwrap().success);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].phase, Phase::RiskScoring);
    assert!(!state.errors[0].recoverable);
    assert!(state.narrative_result.is_none());
}

#[tokio::test]
async fn missing_registration_is_a_programmer_error() {
    let mut registry = UnitRegistry::new();
    for label in ALL_UNITS.iter().filter(|l| **l != NARRATIVE_UNIT) {
        registry.register(
            *label,
            Arc::new(StaticUnit {
                data: json!({"risk_score": 5.0, "verified": true, "flagged": false}),
                confidence: 0.9,
            }),
        );
    }
    let orchestrator = Orchestrator::new(Arc::new(registry), fast_config());

    let err = orchestrator.run(&test_case()).await.unwrap_err();
    match err {
        EngineError::UnitNotRegistered { label } => assert_eq!(label, NARRATIVE_UNIT),
        other => panic!("expected UnitNotRegistered, got {other}"),
    }
}

#[tokio::test]
async fn transition_stream_is_ordered_for_a_clean_run() {
    let registry = Arc::new(clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]));
    let orchestrator = Orchestrator::new(registry, fast_config());
    let mut events = orchestrator.subscribe();

    let state = orchestrator.run(&test_case()).await.unwrap();
    assert_eq!(state.phase, Phase::Completed);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RunEvent::PhaseChanged { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (Phase::Initialized, Phase::DocumentProcessing),
            (Phase::DocumentProcessing, Phase::ParallelVerification),
            (Phase::ParallelVerification, Phase::RiskScoring),
            (Phase::RiskScoring, Phase::NarrativeGeneration),
            (Phase::NarrativeGeneration, Phase::Completed),
        ]
    );
}

#[tokio::test]
async fn whole_run_retry_walks_the_escape_edge() {
    // First run fails at the document phase; the retry succeeds end to end.
    let mut registry = clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]);
    registry.register(
        DOCUMENT_UNIT,
        Arc::new(FailingUnit {
            error: || UnitError::Timeout("OCR queue saturated".into()),
        }),
    );
    let case = test_case();
    let failing = Orchestrator::new(Arc::new(registry), fast_config());
    let state = failing.run(&case).await.unwrap();
    assert_eq!(state.phase, Phase::Failed);

    let healthy = Orchestrator::new(
        Arc::new(clean_registry([0.95, 0.94, 0.99, 0.96, 0.95])),
        fast_config(),
    );
    let state = healthy.retry(&case, state).await.unwrap();

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.retry_count, 1);
    // The first run's error history survives the retry
    assert_eq!(state.errors.len(), 1);
    assert!(state.document_result.as_ref().unwrap().success);
}

#[tokio::test]
async fn retry_from_completed_is_rejected() {
    let registry = Arc::new(clean_registry([0.95, 0.94, 0.99, 0.96, 0.95]));
    let orchestrator = Orchestrator::new(registry, fast_config());
    let case = test_case();

    let state = orchestrator.run(&case).await.unwrap();
    let err = orchestrator.retry(&case, state).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}
