//! Problem API endpoints.
//!
//! Handlers are thin: they validate input, call the assignment engine or
//! the lifecycle reconciler, and map the result to JSON.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use desk_dispatch::{ProblemStatus, Transition};
use desk_id::{ProblemId, UserId};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::assignment::{AssignmentError, AssignmentResult, NewProblem};
use crate::db::problems::{self, ProblemFilter, ProblemRecord};
use crate::db::DbError;
use crate::lifecycle::LifecycleError;
use crate::state::AppState;

const MAX_REPORTER_ID_LEN: usize = 128;
const MAX_DESCRIPTION_LEN: usize = 4000;
const MAX_CATEGORY_LEN: usize = 64;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/problems", post(create_problem).get(list_problems))
        .route(
            "/problems/predefined",
            post(create_predefined).get(list_predefined),
        )
        .route("/problems/regular", get(list_regular))
        .route(
            "/problems/{problem_id}",
            get(get_problem).put(update_status).delete(delete_problem),
        )
        .route("/problems/{problem_id}/reopen", post(reopen_problem))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of `POST /problems` and `POST /problems/predefined`.
///
/// Fields are optional so that missing ones are reported as field errors
/// rather than as a deserialization failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemRequest {
    #[serde(default, alias = "chefId")]
    pub reporter_id: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProblemsQuery {
    pub reporter_id: Option<String>,
    /// Legacy name for `reporterId`.
    pub chef_id: Option<String>,
    pub assigned_technician: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemResponse {
    pub id: String,
    pub reporter_id: String,
    pub description: String,
    pub category: String,
    pub status: ProblemStatus,
    pub is_template: bool,
    pub assigned_technician: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
}

impl From<ProblemRecord> for ProblemResponse {
    fn from(record: ProblemRecord) -> Self {
        Self {
            id: record.id.to_string(),
            reporter_id: record.reporter_id,
            description: record.description,
            category: record.category,
            status: record.status,
            is_template: record.is_template,
            assigned_technician: record.assigned_technician.map(|t| t.to_string()),
            created_at: record.created_at,
            updated_at: record.updated_at,
            solved_at: record.solved_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemResponse {
    pub problem: ProblemResponse,
    /// Null when no technician was available.
    pub assigned_technician: Option<String>,
    pub workload: Option<usize>,
    pub message: String,
}

impl From<AssignmentResult> for CreateProblemResponse {
    fn from(result: AssignmentResult) -> Self {
        Self {
            assigned_technician: result.assigned_technician.map(|t| t.to_string()),
            workload: result.workload,
            message: result.message,
            problem: result.problem.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListProblemsResponse {
    pub items: Vec<ProblemResponse>,
    pub total: usize,
}

impl From<Vec<ProblemRecord>> for ListProblemsResponse {
    fn from(records: Vec<ProblemRecord>) -> Self {
        let items: Vec<ProblemResponse> = records.into_iter().map(Into::into).collect();
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
}

// =============================================================================
// Validation
// =============================================================================

/// Check a create request and turn it into a `NewProblem`.
pub fn validate_new_problem(req: CreateProblemRequest) -> Result<NewProblem, Vec<FieldError>> {
    let mut errors = Vec::new();

    let reporter_id = required(&mut errors, "reporterId", req.reporter_id, MAX_REPORTER_ID_LEN);
    let description = required(&mut errors, "description", req.description, MAX_DESCRIPTION_LEN);
    let category = required(&mut errors, "category", req.category, MAX_CATEGORY_LEN);

    match (reporter_id, description, category) {
        (Some(reporter_id), Some(description), Some(category)) if errors.is_empty() => {
            Ok(NewProblem {
                reporter_id,
                description,
                category,
            })
        }
        _ => Err(errors),
    }
}

fn required(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<String>,
    max_len: usize,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();

    if value.is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
        return None;
    }
    if value.chars().count() > max_len {
        errors.push(FieldError::new(
            field,
            format!("must be at most {max_len} characters"),
        ));
        return None;
    }

    Some(value)
}

fn parse_problem_id(raw: &str, request_id: &str) -> Result<ProblemId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_problem_id", "Invalid problem ID format")
            .with_request_id(request_id)
    })
}

fn parse_status(raw: &str, request_id: &str) -> Result<ProblemStatus, ApiError> {
    raw.parse().map_err(|e: desk_dispatch::UnknownStatus| {
        ApiError::bad_request("invalid_status", e.to_string()).with_request_id(request_id)
    })
}

impl ListProblemsQuery {
    fn into_filter(self, request_id: &str) -> Result<ProblemFilter, ApiError> {
        let assigned_technician = self
            .assigned_technician
            .as_deref()
            .map(|raw| {
                raw.parse::<UserId>().map_err(|_| {
                    ApiError::bad_request("invalid_technician_id", "Invalid technician ID format")
                        .with_request_id(request_id)
                })
            })
            .transpose()?;

        let status = self
            .status
            .as_deref()
            .map(|raw| parse_status(raw, request_id))
            .transpose()?;

        Ok(ProblemFilter {
            reporter_id: self.reporter_id.or(self.chef_id),
            assigned_technician,
            status,
            is_template: None,
            limit: self
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
        })
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

fn store_failure(e: DbError, request_id: &str) -> ApiError {
    error!(error = %e, request_id = %request_id, "Store failure");
    ApiError::internal("internal_error", "Internal server error").with_request_id(request_id)
}

fn assignment_error(e: AssignmentError, request_id: &str) -> ApiError {
    match e {
        AssignmentError::NotFound(id) => {
            ApiError::not_found("problem_not_found", format!("Problem {id} not found"))
                .with_request_id(request_id)
        }
        AssignmentError::Store(e) => store_failure(e, request_id),
    }
}

fn lifecycle_error(e: LifecycleError, request_id: &str) -> ApiError {
    match e {
        LifecycleError::NotFound(id) => {
            ApiError::not_found("problem_not_found", format!("Problem {id} not found"))
                .with_request_id(request_id)
        }
        LifecycleError::InvalidTransition(e) => {
            ApiError::conflict("invalid_transition", e.to_string()).with_request_id(request_id)
        }
        LifecycleError::Store(e) => store_failure(e, request_id),
    }
}

fn validation_failed(details: Vec<FieldError>, request_id: &str) -> ApiError {
    ApiError::bad_request("validation_failed", "Invalid problem")
        .with_details(details)
        .with_request_id(request_id)
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /problems
async fn create_problem(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateProblemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;
    let new = validate_new_problem(req).map_err(|d| validation_failed(d, &ctx.request_id))?;

    let result = state
        .engine()
        .assign(new)
        .await
        .map_err(|e| assignment_error(e, &ctx.request_id))?;

    Ok((StatusCode::CREATED, Json(CreateProblemResponse::from(result))))
}

/// POST /problems/predefined
async fn create_predefined(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateProblemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;
    let new = validate_new_problem(req).map_err(|d| validation_failed(d, &ctx.request_id))?;

    let problem = state
        .engine()
        .create_template(new)
        .await
        .map_err(|e| assignment_error(e, &ctx.request_id))?;

    Ok((StatusCode::CREATED, Json(ProblemResponse::from(problem))))
}

/// GET /problems
async fn list_problems(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<ListProblemsQuery>, QueryRejection>,
) -> Result<Json<ListProblemsResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;
    let filter = query.into_filter(&ctx.request_id)?;

    list(&state, &filter, &ctx.request_id).await
}

/// GET /problems/predefined
async fn list_predefined(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListProblemsResponse>, ApiError> {
    let filter = ProblemFilter {
        is_template: Some(true),
        ..Default::default()
    };
    list(&state, &filter, &ctx.request_id).await
}

/// GET /problems/regular
async fn list_regular(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListProblemsResponse>, ApiError> {
    let filter = ProblemFilter {
        is_template: Some(false),
        ..Default::default()
    };
    list(&state, &filter, &ctx.request_id).await
}

async fn list(
    state: &AppState,
    filter: &ProblemFilter,
    request_id: &str,
) -> Result<Json<ListProblemsResponse>, ApiError> {
    let records = problems::list(state.db().pool(), filter)
        .await
        .map_err(|e| store_failure(e, request_id))?;

    Ok(Json(records.into()))
}

/// GET /problems/{problem_id}
async fn get_problem(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(problem_id): Path<String>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let id = parse_problem_id(&problem_id, &ctx.request_id)?;

    let problem = problems::get(state.db().pool(), id)
        .await
        .map_err(|e| store_failure(e, &ctx.request_id))?
        .ok_or_else(|| {
            ApiError::not_found("problem_not_found", format!("Problem {id} not found"))
                .with_request_id(&ctx.request_id)
        })?;

    Ok(Json(problem.into()))
}

/// PUT /problems/{problem_id}
async fn update_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(problem_id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let id = parse_problem_id(&problem_id, &ctx.request_id)?;
    let Json(req) = payload.map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;
    let status = parse_status(&req.status, &ctx.request_id)?;

    let problem = state
        .lifecycle()
        .transition(id, Transition::Set(status))
        .await
        .map_err(|e| lifecycle_error(e, &ctx.request_id))?;

    Ok(Json(problem.into()))
}

/// POST /problems/{problem_id}/reopen
async fn reopen_problem(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(problem_id): Path<String>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let id = parse_problem_id(&problem_id, &ctx.request_id)?;

    let problem = state
        .lifecycle()
        .transition(id, Transition::Reopen)
        .await
        .map_err(|e| lifecycle_error(e, &ctx.request_id))?;

    Ok(Json(problem.into()))
}

/// DELETE /problems/{problem_id}
async fn delete_problem(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(problem_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = parse_problem_id(&problem_id, &ctx.request_id)?;

    state
        .lifecycle()
        .delete(id)
        .await
        .map_err(|e| lifecycle_error(e, &ctx.request_id))?;

    Ok(Json(DeleteResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request(reporter: &str, description: &str, category: &str) -> CreateProblemRequest {
        CreateProblemRequest {
            reporter_id: Some(reporter.to_string()),
            description: Some(description.to_string()),
            category: Some(category.to_string()),
        }
    }

    #[test]
    fn test_valid_problem_is_trimmed() {
        let new = validate_new_problem(request(" chef-1 ", "Sink is leaking ", " Plumbing")).unwrap();

        assert_eq!(new.reporter_id, "chef-1");
        assert_eq!(new.description, "Sink is leaking");
        // Category is normalised by the engine, not here.
        assert_eq!(new.category, "Plumbing");
    }

    #[rstest]
    #[case(request("", "Sink is leaking", "plumbing"), "reporterId")]
    #[case(request("chef-1", "   ", "plumbing"), "description")]
    #[case(request("chef-1", "Sink is leaking", ""), "category")]
    #[case(request("chef-1", "Sink is leaking", &"x".repeat(65)), "category")]
    #[case(request(&"r".repeat(129), "Sink is leaking", "plumbing"), "reporterId")]
    fn test_invalid_field_is_reported(#[case] req: CreateProblemRequest, #[case] field: &str) {
        let errors = validate_new_problem(req).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, field);
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let errors = validate_new_problem(CreateProblemRequest::default()).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();

        assert_eq!(fields, ["reporterId", "description", "category"]);
    }

    #[test]
    fn test_chef_id_alias_is_accepted() {
        let req: CreateProblemRequest = serde_json::from_value(serde_json::json!({
            "chefId": "chef-7",
            "description": "Oven will not heat",
            "category": "electrical"
        }))
        .unwrap();

        assert_eq!(req.reporter_id.as_deref(), Some("chef-7"));
    }

    #[test]
    fn test_query_prefers_reporter_id_over_chef_id() {
        let query = ListProblemsQuery {
            reporter_id: Some("chef-1".to_string()),
            chef_id: Some("chef-2".to_string()),
            ..Default::default()
        };

        let filter = query.into_filter("req").unwrap();
        assert_eq!(filter.reporter_id.as_deref(), Some("chef-1"));
        assert_eq!(filter.limit, DEFAULT_LIST_LIMIT);
        assert_eq!(filter.is_template, None);
    }

    #[test]
    fn test_query_falls_back_to_chef_id() {
        let query = ListProblemsQuery {
            chef_id: Some("chef-2".to_string()),
            limit: Some(10_000),
            ..Default::default()
        };

        let filter = query.into_filter("req").unwrap();
        assert_eq!(filter.reporter_id.as_deref(), Some("chef-2"));
        assert_eq!(filter.limit, MAX_LIST_LIMIT);
    }

    #[rstest]
    #[case(ListProblemsQuery { status: Some("done".to_string()), ..Default::default() }, "invalid_status")]
    #[case(ListProblemsQuery { assigned_technician: Some("tech-1".to_string()), ..Default::default() }, "invalid_technician_id")]
    fn test_query_rejects_bad_values(#[case] query: ListProblemsQuery, #[case] code: &str) {
        let error = query.into_filter("req_1").unwrap_err();

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.body.code, code);
        assert_eq!(error.body.request_id, "req_1");
    }

    #[test]
    fn test_query_parses_status_and_technician() {
        let technician = UserId::new();
        let query = ListProblemsQuery {
            assigned_technician: Some(technician.to_string()),
            status: Some("in_progress".to_string()),
            ..Default::default()
        };

        let filter = query.into_filter("req").unwrap();
        assert_eq!(filter.assigned_technician, Some(technician));
        assert_eq!(filter.status, Some(ProblemStatus::InProgress));
    }

    #[test]
    fn test_bad_problem_id_is_bad_request() {
        let error = parse_problem_id("42", "req_1").unwrap_err();

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.body.code, "invalid_problem_id");
    }
}
