//! The pluggable unit abstraction and the fixed per-phase input shapes.
//!
//! The engine never interprets a unit's domain payload beyond the few
//! fields the confidence router inspects; everything else travels as
//! `serde_json::Value`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::UnitError;
use crate::state::UnitResult;

/// Well-known unit labels, one per phase.
pub const DOCUMENT_UNIT: &str = "document_extraction";
pub const IDENTITY_UNIT: &str = "identity_verification";
pub const WATCHLIST_UNIT: &str = "watchlist_screening";
pub const RISK_UNIT: &str = "risk_scoring";
pub const NARRATIVE_UNIT: &str = "narrative_synthesis";

/// All labels the registry must carry before a run starts.
pub const ALL_UNITS: [&str; 5] = [
    DOCUMENT_UNIT,
    IDENTITY_UNIT,
    WATCHLIST_UNIT,
    RISK_UNIT,
    NARRATIVE_UNIT,
];

/// Abstraction over one phase's domain logic.
/// Real implementations live outside the engine; tests use scripted stubs.
#[async_trait]
pub trait Unit: Send + Sync {
    async fn execute(&self, input: UnitInput) -> Result<UnitOutput, UnitError>;
}

impl std::fmt::Debug for dyn Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Unit")
    }
}

/// What a unit hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutput {
    /// Domain payload, opaque to the engine.
    pub data: Value,
    /// Self-reported reliability in [0, 1]. Absent means the unit has no
    /// confidence convention; the wrapper defaults it.
    pub confidence: Option<f64>,
}

impl UnitOutput {
    pub fn new(data: Value, confidence: f64) -> Self {
        Self {
            data,
            confidence: Some(confidence),
        }
    }
}

/// Identity claims submitted by the applicant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicantClaims {
    pub full_name: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
}

/// Reference to one piece of submitted evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub doc_type: String,
    /// Storage reference; file handling is an external concern.
    pub reference: String,
}

/// A case: an applicant plus submitted evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseInput {
    pub case_id: String,
    pub applicant: ApplicantClaims,
    pub documents: Vec<DocumentDescriptor>,
}

impl CaseInput {
    /// Create a case with a generated id.
    pub fn new(applicant: ApplicantClaims, documents: Vec<DocumentDescriptor>) -> Self {
        Self {
            case_id: Uuid::new_v4().to_string(),
            applicant,
            documents,
        }
    }

    pub fn with_case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = case_id.into();
        self
    }
}

/// Input for the document extraction unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub case_id: String,
    pub applicant: ApplicantClaims,
    pub documents: Vec<DocumentDescriptor>,
}

/// Input for the identity and watchlist units: the document unit's
/// extracted fields plus the applicant's claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationInput {
    pub case_id: String,
    pub extracted: Value,
    pub applicant: ApplicantClaims,
}

/// Input for the risk unit: all three prior results, degraded or not.
/// The unit is expected to treat failed or low-confidence upstream inputs
/// as risk-increasing signals rather than crashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskInput {
    pub case_id: String,
    pub document: UnitResult,
    pub identity: UnitResult,
    pub watchlist: UnitResult,
}

/// Input for the narrative unit: all four prior results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeInput {
    pub case_id: String,
    pub document: UnitResult,
    pub identity: UnitResult,
    pub watchlist: UnitResult,
    pub risk: UnitResult,
}

/// The fixed per-phase input shapes, as one dispatchable type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitInput {
    Document(DocumentInput),
    Verification(VerificationInput),
    Risk(RiskInput),
    Narrative(NarrativeInput),
}
