//! Queue consumer that turns Phabricator diffs into try pushes.
//!
//! # Module Structure
//!
//! - [`queue`]: FIFO of `(build_target, diff)` entries with drain acknowledgement
//! - [`pipeline`]: per-diff state machine
//! - [`error`]: failure classification and unit results
//! - [`worker`]: the loop that drives one pipeline run per entry

pub mod error;
pub mod pipeline;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod worker;


pub use error::PipelineError;
pub use pipeline::{PatchPipeline, PipelineConfig, PipelineState, config_commit_message};
pub use queue::{DiffReceiver, DiffSender, QueueEntry, QueueError, diff_queue};
pub use worker::{Worker, WorkerStats};
