//! Persistence Adapters - File Storage
//!
//! Atomic JSON snapshot file used to warm-start the hub across
//! restarts. No database dependency.

pub mod snapshot_file;

pub use snapshot_file::SnapshotFile;
