// Gateway module for policy - follows the Train Station Pattern
// All external access must go through this gateway

mod decision;
mod fingerprint;
mod plan;

pub use decision::ScanPolicy;
pub use fingerprint::{compute_fingerprint, config_input_hash, FingerprintInputs};
pub use plan::{PlanKind, PlanReason, ScanPlan};
