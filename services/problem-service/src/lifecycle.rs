//! Problem lifecycle.
//!
//! Status changes go through `desk_dispatch::Transition`. Whenever a change
//! moves a problem into or out of a technician's workload, the technician
//! row is updated in the same transaction and a `technician_sync` message is
//! queued for the user-management service.

use chrono::Utc;
use desk_dispatch::{CapacityPolicy, Transition, TransitionError, TransitionOutcome};
use desk_id::ProblemId;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::assignment::{attach_problem, release_problem};
use crate::collaborators::TechnicianSync;
use crate::db::outbox::{self, OutboundMessage};
use crate::db::problems::{self, ProblemRecord};
use crate::db::technicians::{self, TechnicianRecord};
use crate::db::DbError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("problem not found: {0}")]
    NotFound(ProblemId),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Clone)]
pub struct LifecycleReconciler {
    pool: PgPool,
    policy: CapacityPolicy,
}

impl LifecycleReconciler {
    pub fn new(pool: PgPool, policy: CapacityPolicy) -> Self {
        Self { pool, policy }
    }

    /// Apply a status transition and reconcile the technician side.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        id: ProblemId,
        transition: Transition,
    ) -> Result<ProblemRecord, LifecycleError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let problem = problems::lock(&mut *tx, id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;

        let outcome = transition.apply(problem.status)?;
        let TransitionOutcome::Changed { from, to } = outcome else {
            return Ok(problem);
        };

        let solved_at = if outcome.is_solve() {
            Some(Utc::now())
        } else if outcome.is_reopen() {
            None
        } else {
            problem.solved_at
        };

        let updated = problems::set_status(&mut *tx, id, to, solved_at)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;

        if let Some(technician_id) = updated.assigned_technician {
            if outcome.is_solve() {
                if let Some(technician) = technicians::lock(&mut *tx, technician_id).await? {
                    let technician = release_problem(&mut tx, &self.policy, technician, id).await?;
                    queue_sync(&mut tx, &technician, &updated, "release").await?;
                }
            } else if outcome.is_reopen() {
                match technicians::lock(&mut *tx, technician_id).await? {
                    Some(technician) => {
                        let technician = attach_problem(&mut tx, &self.policy, technician, id).await?;
                        queue_sync(&mut tx, &technician, &updated, "reattach").await?;
                    }
                    None => warn!(
                        problem_id = %id,
                        technician_id = %technician_id,
                        "Previous technician no longer exists, reopened problem has no workload owner"
                    ),
                }
            }
        }

        tx.commit().await.map_err(DbError::Query)?;

        info!(problem_id = %id, from = %from, to = %to, "Problem status changed");
        Ok(updated)
    }

    /// Delete a problem, releasing it from its technician if it was open.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ProblemId) -> Result<(), LifecycleError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let problem = problems::lock(&mut *tx, id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;

        if let (Some(technician_id), true) = (problem.assigned_technician, problem.status.is_open()) {
            if let Some(technician) = technicians::lock(&mut *tx, technician_id).await? {
                let technician = release_problem(&mut tx, &self.policy, technician, id).await?;
                queue_sync(&mut tx, &technician, &problem, "delete").await?;
            }
        }

        if !problems::delete(&mut *tx, id).await? {
            return Err(LifecycleError::NotFound(id));
        }

        tx.commit().await.map_err(DbError::Query)?;

        info!(problem_id = %id, "Problem deleted");
        Ok(())
    }
}

async fn queue_sync(
    conn: &mut PgConnection,
    technician: &TechnicianRecord,
    problem: &ProblemRecord,
    reason: &str,
) -> Result<(), DbError> {
    let message = OutboundMessage::TechnicianSync {
        technician_id: technician.id,
        sync: TechnicianSync {
            is_available: technician.is_available,
            current_problem: technician.workload.current(),
        },
    };
    let key = format!(
        "{}:{}:{}",
        problem.id,
        reason,
        problem.updated_at.timestamp_micros()
    );
    outbox::supersede_technician_syncs(&mut *conn, technician.id).await?;
    outbox::enqueue(&mut *conn, &key, &message).await?;

    Ok(())
}
