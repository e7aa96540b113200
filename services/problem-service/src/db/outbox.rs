//! Outbound message queue.
//!
//! Messages are inserted in the same transaction as the state change that
//! caused them and delivered later by the outbox worker. The pair
//! `(kind, idempotency_key)` is unique, so enqueueing the same logical
//! message twice is a no-op.

use std::time::Duration;

use chrono::{DateTime, Utc};
use desk_id::{OutboxId, ProblemId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

use super::DbError;
use crate::collaborators::{Email, TechnicianSync};

/// A message waiting to be delivered to a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Tell a technician about a newly assigned problem.
    AssignmentNotification {
        problem_id: ProblemId,
        technician_id: UserId,
        email: Email,
    },
    /// Push a technician's availability to the user-management service.
    TechnicianSync {
        technician_id: UserId,
        sync: TechnicianSync,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssignmentNotification { .. } => "assignment_notification",
            Self::TechnicianSync { .. } => "technician_sync",
        }
    }
}

/// A claimed message. The payload is decoded by the worker so a corrupt row
/// can be dead-lettered instead of wedging the queue.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub kind: String,
    pub attempts: i32,
    pub payload: serde_json::Value,
}

/// Returns false if an identical message was already queued.
pub async fn enqueue<'e>(
    exec: impl PgExecutor<'e>,
    idempotency_key: &str,
    message: &OutboundMessage,
) -> Result<bool, DbError> {
    let payload = serde_json::to_value(message)?;

    let result = sqlx::query(
        r#"
        INSERT INTO outbox (kind, idempotency_key, payload)
        VALUES ($1, $2, $3)
        ON CONFLICT (kind, idempotency_key) DO NOTHING
        "#,
    )
    .bind(message.kind())
    .bind(idempotency_key)
    .bind(payload)
    .execute(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(result.rows_affected() > 0)
}

/// Retire undelivered availability syncs for a technician.
///
/// Syncs carry the full availability state, so only the newest one matters.
/// Called before queueing a new sync so a retried older snapshot can never
/// land after a newer one.
pub async fn supersede_technician_syncs<'e>(
    exec: impl PgExecutor<'e>,
    technician_id: UserId,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox
        SET dead_at = now(), last_error = 'superseded by a newer sync'
        WHERE kind = 'technician_sync'
          AND payload->>'technician_id' = $1
          AND delivered_at IS NULL AND dead_at IS NULL
        "#,
    )
    .bind(technician_id.to_string())
    .execute(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(result.rows_affected())
}

/// Claim up to `limit` due messages.
///
/// Claiming pushes `next_attempt_at` forward by `lease`, so a worker that
/// dies mid-batch only delays those messages instead of losing them, and
/// concurrent workers never claim the same row.
pub async fn claim_due<'e>(
    exec: impl PgExecutor<'e>,
    limit: i64,
    lease: Duration,
) -> Result<Vec<OutboxEntry>, DbError> {
    let mut entries = sqlx::query_as::<_, OutboxRow>(
        r#"
        UPDATE outbox
        SET next_attempt_at = now() + make_interval(secs => $2)
        WHERE id IN (
            SELECT id FROM outbox
            WHERE delivered_at IS NULL AND dead_at IS NULL AND next_attempt_at <= now()
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, kind, attempts, payload
        "#,
    )
    .bind(limit)
    .bind(lease.as_secs_f64())
    .fetch_all(exec)
    .await
    .map_err(DbError::Query)?
    .into_iter()
    .map(|row| OutboxEntry {
        id: OutboxId::new(row.id),
        kind: row.kind,
        attempts: row.attempts,
        payload: row.payload,
    })
    .collect::<Vec<_>>();

    entries.sort_by_key(|e| e.id);
    Ok(entries)
}

pub async fn mark_delivered<'e>(exec: impl PgExecutor<'e>, id: OutboxId) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET delivered_at = now(), attempts = attempts + 1, last_error = NULL
        WHERE id = $1
        "#,
    )
    .bind(id.value())
    .execute(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(())
}

pub async fn schedule_retry<'e>(
    exec: impl PgExecutor<'e>,
    id: OutboxId,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET attempts = $2, next_attempt_at = $3, last_error = $4
        WHERE id = $1 AND dead_at IS NULL
        "#,
    )
    .bind(id.value())
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .execute(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(())
}

pub async fn mark_dead<'e>(
    exec: impl PgExecutor<'e>,
    id: OutboxId,
    attempts: i32,
    error: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET attempts = $2, dead_at = now(), last_error = $3
        WHERE id = $1
        "#,
    )
    .bind(id.value())
    .bind(attempts)
    .bind(error)
    .execute(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(())
}

struct OutboxRow {
    id: i64,
    kind: String,
    attempts: i32,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            attempts: row.try_get("attempts")?,
            payload: row.try_get("payload")?,
        })
    }
}
