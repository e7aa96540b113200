//! Technician workload queries.
//!
//! Technicians are rows in `users` with the technician role. The user
//! records themselves belong to the user-management service; this service
//! only reads them and maintains the workload columns.

use chrono::{DateTime, Utc};
use desk_dispatch::{Candidate, Workload};
use desk_id::{ProblemId, UserId};
use sqlx::PgExecutor;
use tracing::warn;

use super::DbError;

pub const TECHNICIAN_ROLE: &str = "technician";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicianRecord {
    pub id: UserId,
    pub email: Option<String>,
    pub specialty: String,
    pub is_available: bool,
    pub workload: Workload,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl TechnicianRecord {
    pub fn as_candidate(&self) -> Candidate {
        Candidate {
            technician_id: self.id,
            specialty: self.specialty.clone(),
            workload: self.workload.count(),
            last_assigned_at: self.last_assigned_at,
        }
    }
}

/// Technicians of a (normalised) specialty that are flagged available.
///
/// The `users` table is shared with the user-management service, so rows
/// this service cannot read are skipped with a warning rather than failing
/// the lookup.
pub async fn find_candidates<'e>(
    exec: impl PgExecutor<'e>,
    specialty: &str,
) -> Result<Vec<Candidate>, DbError> {
    let rows = sqlx::query_as::<_, TechnicianRow>(
        r#"
        SELECT user_id, email, specialty, is_available, assigned_problems,
               current_problem, last_assigned_at
        FROM users
        WHERE role = $1 AND lower(trim(specialty)) = $2 AND is_available
        ORDER BY user_id ASC
        "#,
    )
    .bind(TECHNICIAN_ROLE)
    .bind(specialty)
    .fetch_all(exec)
    .await
    .map_err(DbError::Query)?;

    Ok(readable_candidates(rows))
}

fn readable_candidates(rows: Vec<TechnicianRow>) -> Vec<Candidate> {
    rows.into_iter()
        .filter_map(|row| {
            let user_id = row.user_id.clone();
            match TechnicianRecord::try_from(row) {
                Ok(technician) => Some(technician.as_candidate()),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Skipping unreadable technician row");
                    None
                }
            }
        })
        .collect()
}

/// Load a technician and hold its row lock until the transaction ends.
pub async fn lock<'e>(
    exec: impl PgExecutor<'e>,
    id: UserId,
) -> Result<Option<TechnicianRecord>, DbError> {
    sqlx::query_as::<_, TechnicianRow>(
        r#"
        SELECT user_id, email, specialty, is_available, assigned_problems,
               current_problem, last_assigned_at
        FROM users
        WHERE user_id = $1 AND role = $2
        FOR UPDATE
        "#,
    )
    .bind(id.to_string())
    .bind(TECHNICIAN_ROLE)
    .fetch_optional(exec)
    .await
    .map_err(DbError::Query)?
    .map(TechnicianRecord::try_from)
    .transpose()
}

/// Write back workload, availability and (when given) the assignment time.
pub async fn save_workload<'e>(
    exec: impl PgExecutor<'e>,
    id: UserId,
    workload: &Workload,
    is_available: bool,
    assigned_at: Option<DateTime<Utc>>,
) -> Result<TechnicianRecord, DbError> {
    let assigned: Vec<String> = workload.assigned().map(ProblemId::to_string).collect();

    let row = sqlx::query_as::<_, TechnicianRow>(
        r#"
        UPDATE users
        SET assigned_problems = $2,
            current_problem = $3,
            is_available = $4,
            last_assigned_at = COALESCE($5, last_assigned_at)
        WHERE user_id = $1
        RETURNING user_id, email, specialty, is_available, assigned_problems,
                  current_problem, last_assigned_at
        "#,
    )
    .bind(id.to_string())
    .bind(assigned)
    .bind(workload.current().map(|p| p.to_string()))
    .bind(is_available)
    .bind(assigned_at)
    .fetch_one(exec)
    .await
    .map_err(DbError::Query)?;

    TechnicianRecord::try_from(row)
}

// =============================================================================
// Row Types
// =============================================================================

struct TechnicianRow {
    user_id: String,
    email: Option<String>,
    specialty: Option<String>,
    is_available: bool,
    assigned_problems: Vec<String>,
    current_problem: Option<String>,
    last_assigned_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TechnicianRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            specialty: row.try_get("specialty")?,
            is_available: row.try_get("is_available")?,
            assigned_problems: row.try_get("assigned_problems")?,
            current_problem: row.try_get("current_problem")?,
            last_assigned_at: row.try_get("last_assigned_at")?,
        })
    }
}

impl TryFrom<TechnicianRow> for TechnicianRecord {
    type Error = DbError;

    fn try_from(row: TechnicianRow) -> Result<Self, Self::Error> {
        let id: UserId = row
            .user_id
            .parse()
            .map_err(|e| DbError::corrupt("users", row.user_id.clone(), e))?;

        let assigned = row
            .assigned_problems
            .iter()
            .map(|raw| raw.parse::<ProblemId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::corrupt("users", id.to_string(), e))?;
        let current = row
            .current_problem
            .as_deref()
            .map(str::parse::<ProblemId>)
            .transpose()
            .map_err(|e| DbError::corrupt("users", id.to_string(), e))?;

        Ok(Self {
            id,
            email: row.email.filter(|e| !e.trim().is_empty()),
            specialty: desk_dispatch::normalize_category(row.specialty.as_deref().unwrap_or_default()),
            is_available: row.is_available,
            workload: Workload::new(assigned, current),
            last_assigned_at: row.last_assigned_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_candidate() {
        let held = ProblemId::new();
        let row = TechnicianRow {
            user_id: UserId::new().to_string(),
            email: Some("  ".to_string()),
            specialty: Some("Plumbing".to_string()),
            is_available: true,
            assigned_problems: vec![held.to_string(), held.to_string()],
            current_problem: Some(held.to_string()),
            last_assigned_at: None,
        };

        let record = TechnicianRecord::try_from(row).unwrap();
        assert_eq!(record.email, None);
        assert_eq!(record.specialty, "plumbing");
        assert_eq!(record.workload.current(), Some(held));

        let candidate = record.as_candidate();
        assert_eq!(candidate.workload, 1);
    }

    #[test]
    fn test_corrupt_assigned_problem() {
        let row = TechnicianRow {
            user_id: UserId::new().to_string(),
            email: None,
            specialty: None,
            is_available: true,
            assigned_problems: vec!["not-an-id".to_string()],
            current_problem: None,
            last_assigned_at: None,
        };

        assert!(matches!(
            TechnicianRecord::try_from(row),
            Err(DbError::CorruptRow { table: "users", .. })
        ));
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let good = UserId::new();
        let rows = vec![
            TechnicianRow {
                user_id: "64f1c0ffee".to_string(),
                email: None,
                specialty: Some("plumbing".to_string()),
                is_available: true,
                assigned_problems: vec![],
                current_problem: None,
                last_assigned_at: None,
            },
            TechnicianRow {
                user_id: good.to_string(),
                email: None,
                specialty: Some("plumbing".to_string()),
                is_available: true,
                assigned_problems: vec!["not-a-problem".to_string()],
                current_problem: None,
                last_assigned_at: None,
            },
            TechnicianRow {
                user_id: good.to_string(),
                email: None,
                specialty: Some("plumbing".to_string()),
                is_available: true,
                assigned_problems: vec![],
                current_problem: None,
                last_assigned_at: None,
            },
        ];

        let candidates = readable_candidates(rows);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].technician_id, good);
        assert_eq!(candidates[0].workload, 0);
    }
}
