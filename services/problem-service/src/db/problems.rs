//! Problem queries.

use chrono::{DateTime, Utc};
use desk_dispatch::ProblemStatus;
use desk_id::{ProblemId, UserId};
use sqlx::PgExecutor;

use super::DbError;

/// A problem as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRecord {
    pub id: ProblemId,
    pub reporter_id: String,
    pub description: String,
    pub category: String,
    pub status: ProblemStatus,
    pub is_template: bool,
    pub assigned_technician: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
}

/// Values for a new problem row.
#[derive(Debug, Clone)]
pub struct ProblemInsert {
    pub id: ProblemId,
    pub reporter_id: String,
    pub description: String,
    pub category: String,
    pub is_template: bool,
    pub assigned_technician: Option<UserId>,
}

/// Listing filter. Unset fields do not constrain the result.
#[derive(Debug, Clone)]
pub struct ProblemFilter {
    pub reporter_id: Option<String>,
    pub assigned_technician: Option<UserId>,
    pub status: Option<ProblemStatus>,
    pub is_template: Option<bool>,
    pub limit: i64,
}

impl Default for ProblemFilter {
    fn default() -> Self {
        Self {
            reporter_id: None,
            assigned_technician: None,
            status: None,
            is_template: None,
            limit: 100,
        }
    }
}

pub async fn get<'e>(
    exec: impl PgExecutor<'e>,
    id: ProblemId,
) -> Result<Option<ProblemRecord>, DbError> {
    sqlx::query_as::<_, ProblemRow>(
        r#"
        SELECT problem_id, reporter_id, description, category, status, is_template,
               assigned_technician, created_at, updated_at, solved_at
        FROM problems
        WHERE problem_id = $1
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(exec)
    .await
    .map_err(DbError::Query)?
    .map(ProblemRecord::try_from)
    .transpose()
}

/// Load a problem and hold its row lock until the transaction ends.
pub async fn lock<'e>(
    exec: impl PgExecutor<'e>,
    id: ProblemId,
) -> Result<Option<ProblemRecord>, DbError> {
    sqlx::query_as::<_, ProblemRow>(
        r#"
        SELECT problem_id, reporter_id, description, category, status, is_template,
               assigned_technician, created_at, updated_at, solved_at
        FROM problems
        WHERE problem_id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(exec)
    .await
    .map_err(DbError::Query)?
    .map(ProblemRecord::try_from)
    .transpose()
}

/// Newest first.
pub async fn list<'e>(
    exec: impl PgExecutor<'e>,
    filter: &ProblemFilter,
) -> Result<Vec<ProblemRecord>, DbError> {
    let rows = sqlx::query_as::<_, ProblemRow>(
        r#"
        SELECT problem_id, reporter_id, description, category, status, is_template,
               assigned_technician, created_at, updated_at, solved_at
        FROM problems
        WHERE ($1::TEXT IS NULL OR reporter_id = $1)
          AND ($2::TEXT IS NULL OR assigned_technician = $2)
          AND ($3::TEXT IS NULL OR status = $3)
          AND ($4::BOOLEAN IS NULL OR is_template = $4)
        ORDER BY created_at DESC, problem_id DESC
        LIMIT $5
        "#,
    )
    .bind(filter.reporter_id.as_deref())
    .bind(filter.assigned_technician.map(|t| t.to_string()))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.is_template)
    .bind(filter.limit)
    .fetch_all(exec)
    .await
    .map_err(DbError::Query)?;

    rows.into_iter().map(ProblemRecord::try_from).collect()
}

/// Open, non-template problems without an assignee, oldest first, starting
/// after `after` when given.
pub async fn list_unassigned<'e>(
    exec: impl PgExecutor<'e>,
    after: Option<ProblemId>,
    limit: i64,
) -> Result<Vec<ProblemId>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT problem_id
        FROM problems
        WHERE assigned_technician IS NULL AND NOT is_template AND status <> 'solved'
          AND ($1::TEXT IS NULL OR problem_id > $1)
        ORDER BY problem_id ASC
        LIMIT $2
        "#,
    )
    .bind(after.map(|id| id.to_string()))
    .bind(limit)
    .fetch_all(exec)
    .await
    .map_err(DbError::Query)?;

    ids.into_iter()
        .map(|raw| {
            raw.parse()
                .map_err(|e| DbError::corrupt("problems", raw.clone(), e))
        })
        .collect()
}

pub async fn insert<'e>(
    exec: impl PgExecutor<'e>,
    new: &ProblemInsert,
) -> Result<ProblemRecord, DbError> {
    let row = sqlx::query_as::<_, ProblemRow>(
        r#"
        INSERT INTO problems (
            problem_id, reporter_id, description, category, status, is_template,
            assigned_technician
        )
        VALUES ($1, $2, $3, $4, 'waiting', $5, $6)
        RETURNING problem_id, reporter_id, description, category, status, is_template,
                  assigned_technician, created_at, updated_at, solved_at
        "#,
    )
    .bind(new.id.to_string())
    .bind(&new.reporter_id)
    .bind(&new.description)
    .bind(&new.category)
    .bind(new.is_template)
    .bind(new.assigned_technician.map(|t| t.to_string()))
    .fetch_one(exec)
    .await
    .map_err(DbError::Query)?;

    ProblemRecord::try_from(row)
}

/// Set the assignee of an unassigned, non-template problem.
///
/// Returns `None` if the problem is gone, is a template, or already has an
/// assignee.
pub async fn set_assignee<'e>(
    exec: impl PgExecutor<'e>,
    id: ProblemId,
    technician: UserId,
) -> Result<Option<ProblemRecord>, DbError> {
    sqlx::query_as::<_, ProblemRow>(
        r#"
        UPDATE problems
        SET assigned_technician = $2, updated_at = now()
        WHERE problem_id = $1 AND assigned_technician IS NULL AND NOT is_template
        RETURNING problem_id, reporter_id, description, category, status, is_template,
                  assigned_technician, created_at, updated_at, solved_at
        "#,
    )
    .bind(id.to_string())
    .bind(technician.to_string())
    .fetch_optional(exec)
    .await
    .map_err(DbError::Query)?
    .map(ProblemRecord::try_from)
    .transpose()
}

pub async fn set_status<'e>(
    exec: impl PgExecutor<'e>,
    id: ProblemId,
    status: ProblemStatus,
    solved_at: Option<DateTime<Utc>>,
) -> Result<Option<ProblemRecord>, DbError> {
    sqlx::query_as::<_, ProblemRow>(
        r#"
        UPDATE problems
        SET status = $2, solved_at = $3, updated_at = now()
        WHERE problem_id = $1
        RETURNING problem_id, reporter_id, description, category, status, is_template,
                  assigned_technician, created_at, updated_at, solved_at
        "#,
    )
    .bind(id.to_string())
    .bind(status.as_str())
    .bind(solved_at)
    .fetch_optional(exec)
    .await
    .map_err(DbError::Query)?
    .map(ProblemRecord::try_from)
    .transpose()
}

/// Returns false when no row matched.
pub async fn delete<'e>(exec: impl PgExecutor<'e>, id: ProblemId) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM problems WHERE problem_id = $1")
        .bind(id.to_string())
        .execute(exec)
        .await
        .map_err(DbError::Query)?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Row Types
// =============================================================================

struct ProblemRow {
    problem_id: String,
    reporter_id: String,
    description: String,
    category: String,
    status: String,
    is_template: bool,
    assigned_technician: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    solved_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProblemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            problem_id: row.try_get("problem_id")?,
            reporter_id: row.try_get("reporter_id")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            status: row.try_get("status")?,
            is_template: row.try_get("is_template")?,
            assigned_technician: row.try_get("assigned_technician")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            solved_at: row.try_get("solved_at")?,
        })
    }
}

impl TryFrom<ProblemRow> for ProblemRecord {
    type Error = DbError;

    fn try_from(row: ProblemRow) -> Result<Self, Self::Error> {
        let id: ProblemId = row
            .problem_id
            .parse()
            .map_err(|e| DbError::corrupt("problems", row.problem_id.clone(), e))?;
        let status: ProblemStatus = row
            .status
            .parse()
            .map_err(|e| DbError::corrupt("problems", id.to_string(), e))?;
        let assigned_technician = row
            .assigned_technician
            .as_deref()
            .map(str::parse::<UserId>)
            .transpose()
            .map_err(|e| DbError::corrupt("problems", id.to_string(), e))?;

        Ok(Self {
            id,
            reporter_id: row.reporter_id,
            description: row.description,
            category: row.category,
            status,
            is_template: row.is_template,
            assigned_technician,
            created_at: row.created_at,
            updated_at: row.updated_at,
            solved_at: row.solved_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ProblemRow {
        ProblemRow {
            problem_id: ProblemId::new().to_string(),
            reporter_id: "chef-7".to_string(),
            description: "Sink is leaking".to_string(),
            category: "plumbing".to_string(),
            status: "in_progress".to_string(),
            is_template: false,
            assigned_technician: Some(UserId::new().to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            solved_at: None,
        }
    }

    #[test]
    fn test_row_maps_to_record() {
        let row = row();
        let expected_tech = row.assigned_technician.clone();
        let record = ProblemRecord::try_from(row).unwrap();

        assert_eq!(record.status, ProblemStatus::InProgress);
        assert_eq!(
            record.assigned_technician.map(|t| t.to_string()),
            expected_tech
        );
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let mut row = row();
        row.status = "closed".to_string();

        let err = ProblemRecord::try_from(row).unwrap_err();
        assert!(matches!(err, DbError::CorruptRow { table: "problems", .. }));
    }

    #[test]
    fn test_bad_technician_id_is_corrupt() {
        let mut row = row();
        row.assigned_technician = Some("tech-42".to_string());

        assert!(ProblemRecord::try_from(row).is_err());
    }

    #[test]
    fn test_filter_default_limit() {
        assert_eq!(ProblemFilter::default().limit, 100);
    }
}
