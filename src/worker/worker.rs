//! The single consumer of the diff queue.
//!
//! The worker owns the pipeline, and through it the working tree, for its
//! whole lifetime. Entries are processed strictly one at a time in arrival
//! order. A failed entry never stops the loop; only the shutdown token or
//! the queue closing does, and both are only observed between entries.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::hg::Repository;
use crate::phabricator::{PatchStackResolver, ResultReporter};

use super::pipeline::PatchPipeline;
use super::queue::DiffReceiver;

/// Counters for one worker lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub pushed: u64,
    pub failed: u64,
}

pub struct Worker<R, S> {
    pipeline: PatchPipeline<R, S>,
    stats: WorkerStats,
}

impl<R, S> Worker<R, S>
where
    R: Repository,
    S: PatchStackResolver + ResultReporter,
{
    pub fn new(pipeline: PatchPipeline<R, S>) -> Self {
        Worker {
            pipeline,
            stats: WorkerStats::default(),
        }
    }

    pub fn pipeline(&self) -> &PatchPipeline<R, S> {
        &self.pipeline
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Drain `rx` until shutdown or until every sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(&mut self, rx: &mut DiffReceiver, shutdown: CancellationToken) -> WorkerStats {
        info!("Worker loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                entry = rx.recv() => {
                    let Some(entry) = entry else {
                        info!("Diff queue closed");
                        break;
                    };

                    let pushed = self
                        .pipeline
                        .handle_build(entry.build_target.as_ref(), &entry.diff)
                        .await;

                    self.stats.processed += 1;
                    if pushed {
                        self.stats.pushed += 1;
                    } else {
                        self.stats.failed += 1;
                    }
                    debug!(phid = %entry.diff.phid, pushed, "Entry done");

                    // Notify the queue that the entry has been processed
                    rx.task_done();
                }
            }
        }

        info!(
            processed = self.stats.processed,
            pushed = self.stats.pushed,
            failed = self.stats.failed,
            "Worker loop stopped"
        );
        self.stats
    }
}
