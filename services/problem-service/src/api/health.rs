//! Health check endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    /// RFC 3339.
    pub timestamp: String,
    pub components: ComponentHealth,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    pub database: ComponentStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "unavailable".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Returns 503 when the database is unreachable.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_result = state.db().health_check().await;
    let (status, response) = health_response(db_result.err().map(|e| e.to_string()));
    (status, Json(response))
}

fn health_response(db_error: Option<String>) -> (StatusCode, HealthResponse) {
    let db_ok = db_error.is_none();

    let response = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        service: "problem-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: ComponentHealth {
            database: ComponentStatus {
                status: if db_ok { "ok" } else { "unavailable" }.to_string(),
                message: db_error,
            },
        },
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_database() {
        let (status, response) = health_response(None);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "ok");
        assert_eq!(response.service, "problem-service");
        assert_eq!(response.components.database.status, "ok");
        assert!(response.components.database.message.is_none());
    }

    #[test]
    fn test_unreachable_database() {
        let (status, response) = health_response(Some("connection refused".to_string()));

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status, "degraded");
        assert_eq!(response.components.database.status, "unavailable");
        assert_eq!(
            response.components.database.message.as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn test_health_serializes_components() {
        let (_, response) = health_response(None);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["components"]["database"]["status"], "ok");
        assert!(json["timestamp"].as_str().is_some());
    }
}
