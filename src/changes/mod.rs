// Gateway module for changes - follows the Train Station Pattern
// All external access must go through this gateway

mod detector;
mod snapshot;
mod types;
mod vcs;
mod walker;

pub use detector::{ChangeDetector, Detection, DetectionMode};
pub use snapshot::{FileSnapshot, SnapshotEntry};
pub use types::{ChangeKind, ChangeRecord};
pub use vcs::{VcsChange, VcsRepository};
pub use walker::TreeWalker;
