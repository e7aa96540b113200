//! Delivery of queued collaborator calls.
//!
//! State changes write `OutboundMessage`s to the outbox table inside their
//! own transaction; `OutboxWorker` drains the table and performs the calls.
//! A failing collaborator therefore never fails or rolls back a request.

mod worker;

pub use worker::{OutboxStats, OutboxWorker, OutboxWorkerConfig};

use std::sync::Arc;

use crate::collaborators::{CollaboratorError, LogOnly, Notifier, UserDirectory};
use crate::db::outbox::OutboundMessage;

/// The external services messages are delivered to.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn UserDirectory>,
}

impl Collaborators {
    pub fn new(notifier: Arc<dyn Notifier>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            notifier,
            directory,
        }
    }

    /// Collaborators that only log.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogOnly), Arc::new(LogOnly))
    }
}

pub(crate) async fn deliver(
    collaborators: &Collaborators,
    message: &OutboundMessage,
) -> Result<(), CollaboratorError> {
    match message {
        OutboundMessage::AssignmentNotification { email, .. } => {
            collaborators.notifier.send(email).await
        }
        OutboundMessage::TechnicianSync {
            technician_id,
            sync,
        } => {
            collaborators
                .directory
                .update_technician(*technician_id, sync)
                .await
        }
    }
}
