//! Remote collaborators: the notification service and the user-management
//! service.
//!
//! Both are only ever called from the outbox worker, never on a request
//! path. A failed call is retried later and cannot undo the state change
//! that queued it.

use std::time::Duration;

use async_trait::async_trait;
use desk_id::{ProblemId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from collaborator calls.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collaborator returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// An email handed to the notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Availability fields pushed to the user-management service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicianSync {
    pub is_available: bool,
    pub current_problem: Option<ProblemId>,
}

/// Sends emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), CollaboratorError>;
}

/// Updates technician availability in the user-management service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn update_technician(
        &self,
        technician_id: UserId,
        sync: &TechnicianSync,
    ) -> Result<(), CollaboratorError>;
}

/// Build the shared HTTP client for collaborator calls.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, CollaboratorError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

async fn expect_success(response: reqwest::Response) -> Result<(), CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Notification service client (`POST {base}/send`).
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, email: &Email) -> Result<(), CollaboratorError> {
        let url = format!("{}/send", self.base_url);
        debug!(url = %url, to = %email.to, "Sending notification");

        let response = self.client.post(&url).json(email).send().await?;
        expect_success(response).await
    }
}

/// User-management client (`PATCH {base}/users/{id}/availability`).
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn update_technician(
        &self,
        technician_id: UserId,
        sync: &TechnicianSync,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/users/{}/availability", self.base_url, technician_id);
        debug!(url = %url, is_available = sync.is_available, "Syncing technician availability");

        let response = self.client.patch(&url).json(sync).send().await?;
        expect_success(response).await
    }
}

/// Stand-in used when a collaborator URL is not configured.
pub struct LogOnly;

#[async_trait]
impl Notifier for LogOnly {
    async fn send(&self, email: &Email) -> Result<(), CollaboratorError> {
        info!(to = %email.to, subject = %email.subject, "Notification service not configured, dropping email");
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for LogOnly {
    async fn update_technician(
        &self,
        technician_id: UserId,
        sync: &TechnicianSync,
    ) -> Result<(), CollaboratorError> {
        info!(
            technician_id = %technician_id,
            is_available = sync.is_available,
            "User service not configured, dropping availability sync"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        http_client(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_notifier_posts_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_json(serde_json::json!({
                "to": "tech@example.com",
                "subject": "New problem assigned",
                "body": "hello"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(client(), format!("{}/", server.uri()));
        notifier
            .send(&Email {
                to: "tech@example.com".to_string(),
                subject: "New problem assigned".to_string(),
                body: "hello".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_notifier_surfaces_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(503).set_body_string("mail relay down"))
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(client(), server.uri());
        let err = notifier
            .send(&Email {
                to: "tech@example.com".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            CollaboratorError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "mail relay down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_user_directory_patches_availability() {
        let technician_id = UserId::new();
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("/users/{technician_id}/availability")))
            .and(body_json(serde_json::json!({
                "isAvailable": true,
                "currentProblem": null
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(client(), server.uri());
        directory
            .update_technician(
                technician_id,
                &TechnicianSync {
                    is_available: true,
                    current_problem: None,
                },
            )
            .await
            .unwrap();
    }
}
