//! Backfill background worker.
//!
//! Problems created while no technician was available stay unassigned.
//! This worker periodically retries them so they are picked up once a
//! technician frees up or is added.
//!
//! Passes walk the unassigned problems in id order and resume after the
//! last id seen, wrapping to the start once the end is reached. A batch full
//! of problems nobody can take therefore never hides the ones behind it.

use std::time::Duration;

use desk_id::ProblemId;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::{AssignmentEngine, AssignmentError};
use crate::db::problems;

/// Counters for a single backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub scanned: usize,
    pub assigned: usize,
    pub failed: usize,
}

pub struct BackfillWorker {
    engine: AssignmentEngine,
    interval: Duration,
    batch_size: i64,
    cursor: Mutex<Option<ProblemId>>,
}

impl BackfillWorker {
    pub fn new(engine: AssignmentEngine, interval: Duration, batch_size: i64) -> Self {
        Self {
            engine,
            interval,
            batch_size: batch_size.max(1),
            cursor: Mutex::new(None),
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Starting backfill worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass().await {
                        Ok(stats) if stats.assigned > 0 || stats.failed > 0 => {
                            info!(
                                scanned = stats.scanned,
                                assigned = stats.assigned,
                                failed = stats.failed,
                                "Backfill pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Backfill pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Backfill worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Try to assign the next batch of unassigned problems.
    ///
    /// A failure on one problem is logged and does not stop the pass.
    pub async fn run_pass(&self) -> Result<BackfillStats, AssignmentError> {
        let mut cursor = self.cursor.lock().await;
        let after = *cursor;
        let mut pending =
            problems::list_unassigned(&self.engine.pool, after, self.batch_size).await?;
        if pending.is_empty() && after.is_some() {
            pending = problems::list_unassigned(&self.engine.pool, None, self.batch_size).await?;
        }
        *cursor = next_cursor(&pending, self.batch_size);
        drop(cursor);

        let mut stats = BackfillStats {
            scanned: pending.len(),
            ..Default::default()
        };

        for problem_id in pending {
            match self.engine.assign_existing(problem_id).await {
                Ok(Some(_)) => stats.assigned += 1,
                Ok(None) => debug!(problem_id = %problem_id, "Still no technician available"),
                // Deleted between listing and locking.
                Err(AssignmentError::NotFound(_)) => {}
                Err(e) => {
                    stats.failed += 1;
                    warn!(problem_id = %problem_id, error = %e, "Backfill assignment failed");
                }
            }
        }

        Ok(stats)
    }
}

/// Where the next pass starts. A short batch means the end was reached, so
/// the next pass starts over.
fn next_cursor(batch: &[ProblemId], batch_size: i64) -> Option<ProblemId> {
    if (batch.len() as i64) < batch_size {
        None
    } else {
        batch.last().copied()
    }
}
