//! Value types flowing between backends, the pipeline, the engine and the
//! persistence store.

pub mod event;
pub mod job;
pub mod stats;
pub mod version;

pub use event::{ChangeEvent, EventSource, FileAction};
pub use job::{BackupJob, JobClock, JobStatus};
pub use stats::BackupStats;
pub use version::{compression_ratio, version_tag, BackupType, CompressionAlgo, VersionRecord};
