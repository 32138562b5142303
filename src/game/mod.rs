//! Match computation and orchestration

pub mod loot;
pub mod model;
pub mod orchestrator;
pub mod scoring;
pub mod zone;

pub use loot::LootGenerator;
pub use orchestrator::{MatchOrchestrator, OrchestratorError, Settlement};
pub use scoring::ScoringEngine;
pub use zone::ZoneModel;
