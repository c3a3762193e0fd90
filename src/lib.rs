//! Case analysis orchestration engine.
//!
//! Runs one case (an applicant plus submitted evidence) through five
//! ordered analysis phases — document processing, a concurrent
//! identity/watchlist verification pair, risk scoring, and narrative
//! generation — each delegated to a pluggable domain unit. The engine
//! guarantees deterministic phase ordering, bounds retry cost with
//! exponential backoff, isolates a concurrent unit's failure from its
//! sibling, never lets a unit failure escape as an unhandled crash, and
//! produces a conservative, auditable routing decision from the run's
//! confidence signals.
//!
//! Persistence, UI transport, and the concrete domain units are external
//! collaborators: the engine hands back a terminal [`state::RunState`] and
//! publishes [`events::RunEvent`]s along the way.

pub mod classifier;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod state;
pub mod unit;

pub use config::{EngineConfig, UnitConfig};
pub use errors::{EngineError, UnitError};
pub use events::RunEvent;
pub use orchestrator::Orchestrator;
pub use registry::UnitRegistry;
pub use router::{route, route_with, RecommendedAction, RoutingDecision, Thresholds};
pub use state::{Phase, RunError, RunState, UnitResult};
pub use unit::{CaseInput, Unit, UnitInput, UnitOutput};
