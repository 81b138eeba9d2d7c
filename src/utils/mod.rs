// Gateway module for utils - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod clock;
mod errors;
mod hashing;
mod logger;
mod paths;
mod persist;

// Public re-exports - the ONLY way to access utils functionality
pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::ManualClock;
pub use errors::ScanError;
pub use hashing::{digest_pairs, hash_bytes, hash_file, hash_str, metadata, FileMetadata};
pub use logger::init_logger;
pub use paths::{extension, normalize, parent_dir, relative_to, PathMatcher};
pub use persist::{read_json_or_default, write_atomic, write_json_atomic};
