//! Filesystem helpers shared by the polling backends.

pub mod walker;

pub use walker::{snapshot_directory, FileStamp, Snapshot};
