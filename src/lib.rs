pub mod app;
pub mod cache;
pub mod changes;
pub mod cli;
pub mod constants;
pub mod impact;
pub mod policy;
pub mod scanner;
pub mod utils;

pub use app::{load_config, Config};
pub use cache::CacheStore;
pub use changes::{ChangeDetector, ChangeKind, ChangeRecord};
pub use impact::ImpactAnalyzer;
pub use policy::{PlanKind, ScanPlan, ScanPolicy};
pub use scanner::{AnalysisEngine, ExternalEngine, Orchestrator, ScanOutcome};
pub use utils::ScanError;
