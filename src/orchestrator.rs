//! The phase-driving engine for one case run.
//!
//! The orchestrator steps the five-phase state machine, dispatching each
//! phase's unit through the execution wrapper, running the two
//! verification units concurrently with partial-failure continuation, and
//! accumulating the run's error list. Programmer errors (illegal edge,
//! unregistered unit) surface as `Err`; every operational outcome returns
//! `Ok` with a terminal `RunState`. A failed terminal run keeps every
//! successfully completed phase's result so a reviewer retains partial
//! evidence.

use anyhow::anyhow;
use chrono::Utc;
use futures::future::join;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{build_error, classify, recorded_classification};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::events::{EventBus, RunEvent};
use crate::executor::ExecutionWrapper;
use crate::registry::UnitRegistry;
use crate::state::{Phase, RunError, RunState, UnitResult};
use crate::unit::{
    CaseInput, DocumentInput, NarrativeInput, RiskInput, UnitInput, VerificationInput,
    DOCUMENT_UNIT, IDENTITY_UNIT, NARRATIVE_UNIT, RISK_UNIT, WATCHLIST_UNIT,
};

/// Drives a single case through the five analysis phases.
///
/// One orchestrator serves many case runs; each run owns its `RunState`
/// exclusively and shares no mutable state with sibling runs.
pub struct Orchestrator {
    registry: Arc<UnitRegistry>,
    config: EngineConfig,
    events: EventBus,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(registry: Arc<UnitRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            events: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Thread a caller-held cancellation token through the run. It is
    /// checked at every phase boundary and raced inside the wrapper.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach a progress subscriber. Events are published after every
    /// phase transition and slot mutation; a dropped receiver detaches
    /// silently and never aborts the run.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run a case to a terminal phase.
    ///
    /// `Err` only for programmer errors; operational failures are recorded
    /// in the returned state's error list.
    pub async fn run(&self, case: &CaseInput) -> Result<RunState, EngineError> {
        let mut state = RunState::new(&case.case_id);
        self.drive_to_terminal(case, &mut state).await?;
        Ok(state)
    }

    /// Re-run a `failed` terminal state via the `failed -> initialized`
    /// retry edge. Slots are re-attempted; the error history accumulates.
    pub async fn retry(
        &self,
        case: &CaseInput,
        mut state: RunState,
    ) -> Result<RunState, EngineError> {
        state.begin_retry()?;
        self.drive_to_terminal(case, &mut state).await?;
        Ok(state)
    }

    async fn drive_to_terminal(
        &self,
        case: &CaseInput,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        self.events.publish(RunEvent::RunStarted {
            case_id: state.case_id.clone(),
            phase: state.phase,
        });
        match self.drive(case, state).await {
            Ok(()) => {}
            Err(EngineError::Internal(fault)) => {
                // Engine fault, not a unit failure: record it and force the
                // run failed even outside the normal edge table.
                warn!(case_id = %state.case_id, error = %fault, "engine fault, failing run");
                let message = fault.to_string();
                let classification = classify(&message);
                state.record_error(build_error(
                    state.phase,
                    "orchestrator",
                    &message,
                    &classification,
                ));
                let from = state.phase;
                state.force_fail();
                self.events.publish(RunEvent::PhaseChanged {
                    case_id: state.case_id.clone(),
                    from,
                    to: Phase::Failed,
                });
            }
            Err(programmer_error) => return Err(programmer_error),
        }

        info!(case_id = %state.case_id, phase = %state.phase, errors = state.errors.len(), "run finished");
        self.events.publish(RunEvent::RunFinished {
            case_id: state.case_id.clone(),
            phase: state.phase,
        });
        Ok(())
    }

    async fn drive(&self, case: &CaseInput, state: &mut RunState) -> Result<(), EngineError> {
        // Document phase. Every downstream unit depends on its output, so
        // failure here ends the run.
        self.ensure_active()?;
        self.advance(state, Phase::DocumentProcessing)?;
        let document = self
            .dispatch(
                DOCUMENT_UNIT,
                UnitInput::Document(DocumentInput {
                    case_id: case.case_id.clone(),
                    applicant: case.applicant.clone(),
                    documents: case.documents.clone(),
                }),
            )
            .await?;
        self.store(state, Phase::DocumentProcessing, document.clone());
        if !document.success {
            self.record_unit_failure(state, Phase::DocumentProcessing, &document);
            self.advance(state, Phase::Failed)?;
            return Ok(());
        }

        // Parallel verification: identity and watchlist, jointly awaited.
        // One unit's abort must not cancel or corrupt the other.
        self.ensure_active()?;
        self.advance(state, Phase::ParallelVerification)?;
        let verification = VerificationInput {
            case_id: case.case_id.clone(),
            extracted: document.data.clone().unwrap_or(Value::Null),
            applicant: case.applicant.clone(),
        };
        let (identity, watchlist) = self.run_verification_pair(&verification).await?;
        self.store(state, Phase::ParallelVerification, identity.clone());
        self.store(state, Phase::ParallelVerification, watchlist.clone());

        if !identity.success && !watchlist.success {
            // Total verification blackout: one combined error naming both
            // units, and the run ends.
            self.record_pair_failure(state, &identity, &watchlist);
            self.advance(state, Phase::Failed)?;
            return Ok(());
        }
        // A single successful verification signal is still actionable
        // evidence for a reviewer; record the failure and continue.
        for result in [&identity, &watchlist] {
            if !result.success {
                self.record_unit_failure(state, Phase::ParallelVerification, result);
            }
        }

        // Risk phase. Without a score no routing decision is possible.
        self.ensure_active()?;
        self.advance(state, Phase::RiskScoring)?;
        let risk = self
            .dispatch(
                RISK_UNIT,
                UnitInput::Risk(RiskInput {
                    case_id: case.case_id.clone(),
                    document: document.clone(),
                    identity: identity.clone(),
                    watchlist: watchlist.clone(),
                }),
            )
            .await?;
        self.store(state, Phase::RiskScoring, risk.clone());
        if !risk.success {
            self.record_unit_failure(state, Phase::RiskScoring, &risk);
            self.advance(state, Phase::Failed)?;
            return Ok(());
        }

        // Narrative phase, fed by all four prior results.
        self.ensure_active()?;
        self.advance(state, Phase::NarrativeGeneration)?;
        let narrative = self
            .dispatch(
                NARRATIVE_UNIT,
                UnitInput::Narrative(NarrativeInput {
                    case_id: case.case_id.clone(),
                    document,
                    identity,
                    watchlist,
                    risk,
                }),
            )
            .await?;
        self.store(state, Phase::NarrativeGeneration, narrative.clone());
        if !narrative.success {
            self.record_unit_failure(state, Phase::NarrativeGeneration, &narrative);
            self.advance(state, Phase::Failed)?;
            return Ok(());
        }

        self.advance(state, Phase::Completed)?;
        Ok(())
    }

    /// Launch both verification units as independent tasks and wait for
    /// both to settle. A task that terminates by unhandled abort (panic)
    /// is converted into a synthesized degraded result.
    async fn run_verification_pair(
        &self,
        verification: &VerificationInput,
    ) -> Result<(UnitResult, UnitResult), EngineError> {
        let identity_task =
            self.spawn_unit(IDENTITY_UNIT, UnitInput::Verification(verification.clone()))?;
        let watchlist_task =
            self.spawn_unit(WATCHLIST_UNIT, UnitInput::Verification(verification.clone()))?;

        let (identity_join, watchlist_join) = join(identity_task, watchlist_task).await;
        Ok((
            Self::settle(IDENTITY_UNIT, identity_join),
            Self::settle(WATCHLIST_UNIT, watchlist_join),
        ))
    }

    /// Every dispatch runs in its own task so a panicking unit in any
    /// phase degrades to a failed result instead of unwinding the run.
    async fn dispatch(
        &self,
        label: &'static str,
        input: UnitInput,
    ) -> Result<UnitResult, EngineError> {
        let task = self.spawn_unit(label, input)?;
        Ok(Self::settle(label, task.await))
    }

    fn spawn_unit(
        &self,
        label: &'static str,
        input: UnitInput,
    ) -> Result<tokio::task::JoinHandle<UnitResult>, EngineError> {
        let unit = self.registry.get(label)?;
        let wrapper = self.wrapper_for(label);
        Ok(tokio::spawn(async move { wrapper.run(unit, label, input).await }))
    }

    fn settle(
        label: &'static str,
        joined: Result<UnitResult, tokio::task::JoinError>,
    ) -> UnitResult {
        joined.unwrap_or_else(|join_err| {
            warn!(unit = label, error = %join_err, "unit task aborted");
            UnitResult::degraded(label, &format!("unit task aborted: {join_err}"))
        })
    }

    fn wrapper_for(&self, label: &str) -> ExecutionWrapper {
        ExecutionWrapper::new(self.config.for_unit(label).policy())
            .with_cancellation(self.cancel.clone())
    }

    fn advance(&self, state: &mut RunState, to: Phase) -> Result<(), EngineError> {
        let from = state.phase;
        state.transition(to)?;
        debug!(case_id = %state.case_id, %from, %to, "phase transition");
        self.events.publish(RunEvent::PhaseChanged {
            case_id: state.case_id.clone(),
            from,
            to,
        });
        Ok(())
    }

    fn store(&self, state: &mut RunState, phase: Phase, result: UnitResult) {
        let label = result.unit_label.clone();
        self.events.publish(RunEvent::SlotUpdated {
            case_id: state.case_id.clone(),
            phase,
            unit_label: label.clone(),
            success: result.success,
        });
        match label.as_str() {
            DOCUMENT_UNIT => state.document_result = Some(result),
            IDENTITY_UNIT => state.identity_result = Some(result),
            WATCHLIST_UNIT => state.watchlist_result = Some(result),
            RISK_UNIT => state.risk_result = Some(result),
            NARRATIVE_UNIT => state.narrative_result = Some(result),
            other => warn!(unit = other, "result for unknown unit label dropped"),
        }
        state.touch();
    }

    fn record_unit_failure(&self, state: &mut RunState, phase: Phase, result: &UnitResult) {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| format!("{} failed without a message", result.unit_label));
        // The wrapper's structural verdict wins; text matching only covers
        // synthesized results that never went through classification.
        let classification = recorded_classification(result).unwrap_or_else(|| classify(&message));
        state.record_error(build_error(
            phase,
            &result.unit_label,
            &message,
            &classification,
        ));
    }

    fn failure_recoverable(result: &UnitResult) -> bool {
        recorded_classification(result)
            .map(|c| c.recoverable)
            .unwrap_or_else(|| classify(result.error.as_deref().unwrap_or("failed")).recoverable)
    }

    fn record_pair_failure(&self, state: &mut RunState, identity: &UnitResult, watchlist: &UnitResult) {
        let identity_message = identity.error.as_deref().unwrap_or("failed");
        let watchlist_message = watchlist.error.as_deref().unwrap_or("failed");
        // Recoverable if retrying could restore at least one signal.
        let recoverable =
            Self::failure_recoverable(identity) || Self::failure_recoverable(watchlist);
        state.record_error(RunError {
            phase: Phase::ParallelVerification,
            unit_label: format!("{IDENTITY_UNIT}+{WATCHLIST_UNIT}"),
            message: format!(
                "both verification units failed; {IDENTITY_UNIT}: {identity_message}; {WATCHLIST_UNIT}: {watchlist_message}"
            ),
            timestamp: Utc::now(),
            recoverable,
        });
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(anyhow!("run cancelled by caller").into());
        }
        Ok(())
    }
}
