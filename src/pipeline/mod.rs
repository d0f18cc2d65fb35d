//! Archive pipeline: read the tree, load the warehouse, prune the source

pub mod cutoff;
pub mod orchestrator;
pub mod reader;
pub mod run_lock;
pub mod scheduler;
pub mod schema;
pub mod sink;
pub mod sql;

pub use cutoff::{compute_cutoff, Cutoff, CutoffUnit};
pub use orchestrator::{ArchivePolicy, ArchiveReport, ArchiveRequest, Archiver, RunOutcome, RunStage};
pub use reader::{PathLayout, PathLayouts, TreeReader};
pub use scheduler::Scheduler;
pub use sink::{InsertOutcome, SinkAdapter};
