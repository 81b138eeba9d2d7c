// Gateway module for scanner - follows the Train Station Pattern
// All external access must go through this gateway

mod engine;
mod findings;
mod orchestrator;
mod state;

pub use engine::{AnalysisEngine, EngineDescriptor, ExternalEngine};
pub use findings::{
    parse_engine_output, EngineDiagnostic, EngineReport, EngineVersionPayload, Finding,
    ScanResultPayload, Severity,
};
pub use orchestrator::{Orchestrator, ScanOutcome};
pub use state::{KindPerformance, ScanRecord, ScanState};
