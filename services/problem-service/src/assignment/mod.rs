//! Technician assignment.
//!
//! The engine is the only place a technician gets chosen for a problem:
//! - synchronously when a problem is created (`AssignmentEngine::assign`)
//! - later, for problems that were created without one
//!   (`AssignmentEngine::assign_existing`, driven by `BackfillWorker`)
//!
//! Both paths call `desk_dispatch::select_technician`, and both write the
//! problem, the technician workload and the notification outbox row in one
//! transaction.

mod backfill;

pub use backfill::{BackfillStats, BackfillWorker};

use chrono::Utc;
use desk_dispatch::{normalize_category, select_technician, CapacityPolicy};
use desk_id::{ProblemId, UserId};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::collaborators::Email;
use crate::db::outbox::{self, OutboundMessage};
use crate::db::problems::{self, ProblemInsert, ProblemRecord};
use crate::db::technicians::{self, TechnicianRecord};
use crate::db::DbError;

/// Errors from the assignment engine.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("problem not found: {0}")]
    NotFound(ProblemId),

    #[error(transparent)]
    Store(#[from] DbError),
}

/// A validated problem submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProblem {
    pub reporter_id: String,
    pub description: String,
    pub category: String,
}

/// Outcome of creating a problem through the engine.
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub problem: ProblemRecord,
    /// `None` when no technician was available.
    pub assigned_technician: Option<UserId>,
    /// Workload of the chosen technician at decision time.
    pub workload: Option<usize>,
    pub message: String,
}

impl AssignmentResult {
    fn new(problem: ProblemRecord, decision: Option<(UserId, usize)>) -> Self {
        let message = match decision {
            Some((technician, workload)) => format!(
                "Problem assigned to technician {technician} with {workload} existing problems"
            ),
            None => format!(
                "No available technician found for category '{}'",
                problem.category
            ),
        };

        Self {
            assigned_technician: decision.map(|(t, _)| t),
            workload: decision.map(|(_, w)| w),
            problem,
            message,
        }
    }
}

#[derive(Clone)]
pub struct AssignmentEngine {
    pool: PgPool,
    policy: CapacityPolicy,
}

impl AssignmentEngine {
    pub fn new(pool: PgPool, policy: CapacityPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    /// Create a problem and assign it to the least-loaded qualified
    /// technician, if there is one.
    #[instrument(skip(self, new), fields(category = %new.category))]
    pub async fn assign(&self, new: NewProblem) -> Result<AssignmentResult, AssignmentError> {
        let category = normalize_category(&new.category);

        let candidates = technicians::find_candidates(&self.pool, &category).await?;
        let selected = select_technician(&candidates, &self.policy).cloned();

        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        // The candidate list is a snapshot; only the locked row is trusted.
        let locked = match &selected {
            Some(candidate) => technicians::lock(&mut *tx, candidate.technician_id)
                .await?
                .map(|technician| (technician, candidate.workload)),
            None => None,
        };

        let problem = problems::insert(
            &mut *tx,
            &ProblemInsert {
                id: ProblemId::new(),
                reporter_id: new.reporter_id,
                description: new.description,
                category,
                is_template: false,
                assigned_technician: locked.as_ref().map(|(t, _)| t.id),
            },
        )
        .await?;

        let decision = match locked {
            Some((technician, decided_workload)) => {
                let technician = attach_problem(&mut tx, &self.policy, technician, problem.id).await?;
                queue_assignment_email(&mut tx, &technician, &problem).await?;
                Some((technician.id, decided_workload))
            }
            None => None,
        };

        tx.commit().await.map_err(DbError::Query)?;

        match decision {
            Some((technician_id, workload)) => info!(
                problem_id = %problem.id,
                technician_id = %technician_id,
                workload,
                "Problem assigned"
            ),
            None => info!(
                problem_id = %problem.id,
                category = %problem.category,
                "No technician available, problem left unassigned"
            ),
        }

        Ok(AssignmentResult::new(problem, decision))
    }

    /// Create a catalog problem. Templates are never assigned.
    #[instrument(skip(self, new), fields(category = %new.category))]
    pub async fn create_template(&self, new: NewProblem) -> Result<ProblemRecord, AssignmentError> {
        let problem = problems::insert(
            &self.pool,
            &ProblemInsert {
                id: ProblemId::new(),
                reporter_id: new.reporter_id,
                description: new.description,
                category: normalize_category(&new.category),
                is_template: true,
                assigned_technician: None,
            },
        )
        .await?;

        info!(problem_id = %problem.id, "Problem template created");
        Ok(problem)
    }

    /// Assign an existing problem that has no technician yet.
    ///
    /// Templates, solved problems and problems that already have an assignee
    /// are left alone. Returns the technician chosen, if any.
    #[instrument(skip(self))]
    pub async fn assign_existing(&self, id: ProblemId) -> Result<Option<UserId>, AssignmentError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let problem = problems::lock(&mut *tx, id)
            .await?
            .ok_or(AssignmentError::NotFound(id))?;

        if problem.is_template || problem.assigned_technician.is_some() || !problem.status.is_open() {
            return Ok(None);
        }

        let candidates = technicians::find_candidates(&mut *tx, &problem.category).await?;
        let Some(selected) = select_technician(&candidates, &self.policy) else {
            return Ok(None);
        };
        let workload = selected.workload;

        let Some(technician) = technicians::lock(&mut *tx, selected.technician_id).await? else {
            return Ok(None);
        };
        let Some(problem) = problems::set_assignee(&mut *tx, id, technician.id).await? else {
            return Ok(None);
        };

        let technician = attach_problem(&mut tx, &self.policy, technician, problem.id).await?;
        queue_assignment_email(&mut tx, &technician, &problem).await?;

        tx.commit().await.map_err(DbError::Query)?;

        info!(
            problem_id = %problem.id,
            technician_id = %technician.id,
            workload,
            "Backfilled problem assignment"
        );
        Ok(Some(technician.id))
    }
}

/// Add a problem to a locked technician's workload and recompute its
/// availability.
pub(crate) async fn attach_problem(
    conn: &mut PgConnection,
    policy: &CapacityPolicy,
    mut technician: TechnicianRecord,
    problem_id: ProblemId,
) -> Result<TechnicianRecord, DbError> {
    if !policy.is_available(&technician.specialty, technician.workload.count()) {
        warn!(
            technician_id = %technician.id,
            workload = technician.workload.count(),
            capacity = policy.capacity_for(&technician.specialty),
            "Technician over capacity after concurrent assignment"
        );
    }

    technician.workload.attach(problem_id);
    let is_available = policy.is_available(&technician.specialty, technician.workload.count());

    technicians::save_workload(
        &mut *conn,
        technician.id,
        &technician.workload,
        is_available,
        Some(Utc::now()),
    )
    .await
}

/// Remove a problem from a locked technician's workload and recompute its
/// availability.
pub(crate) async fn release_problem(
    conn: &mut PgConnection,
    policy: &CapacityPolicy,
    mut technician: TechnicianRecord,
    problem_id: ProblemId,
) -> Result<TechnicianRecord, DbError> {
    technician.workload.detach(problem_id);
    let is_available = policy.is_available(&technician.specialty, technician.workload.count());

    technicians::save_workload(&mut *conn, technician.id, &technician.workload, is_available, None)
        .await
}

async fn queue_assignment_email(
    conn: &mut PgConnection,
    technician: &TechnicianRecord,
    problem: &ProblemRecord,
) -> Result<(), DbError> {
    let Some(to) = technician.email.clone() else {
        return Ok(());
    };

    let message = OutboundMessage::AssignmentNotification {
        problem_id: problem.id,
        technician_id: technician.id,
        email: assignment_email(to, problem),
    };
    let key = format!("{}:{}", problem.id, technician.id);
    outbox::enqueue(&mut *conn, &key, &message).await?;

    Ok(())
}

fn assignment_email(to: String, problem: &ProblemRecord) -> Email {
    Email {
        to,
        subject: format!("New {} problem assigned to you", problem.category),
        body: format!(
            "A new problem has been assigned to you.\n\n\
             Problem: {}\n\
             Category: {}\n\
             Reported by: {}\n\n\
             {}",
            problem.id, problem.category, problem.reporter_id, problem.description
        ),
    }
}
