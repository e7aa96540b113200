//! Outbox background worker.
//!
//! Claims due messages, hands them to the collaborators and records the
//! result. Failed deliveries are retried with backoff until the retry
//! policy gives up, after which the row is dead-lettered.

use std::time::Duration;

use chrono::Utc;
use desk_dispatch::{RetryDecision, RetryPolicy};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{deliver, Collaborators};
use crate::db::outbox::{self, OutboundMessage, OutboxEntry};
use crate::db::DbError;

#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    pub interval: Duration,
    pub batch_size: i64,
    /// How long a claimed message is hidden from other workers.
    pub lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            batch_size: 20,
            lease: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Slack on top of the collaborator calls for the bookkeeping queries.
const LEASE_MARGIN: Duration = Duration::from_secs(30);

impl OutboxWorkerConfig {
    /// Size the lease so a batch in which every call runs into the timeout
    /// still finishes before its rows become claimable again.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        let calls = u32::try_from(self.batch_size.max(1)).unwrap_or(u32::MAX);
        self.lease = call_timeout.saturating_mul(calls).saturating_add(LEASE_MARGIN);
        self
    }
}

/// Counters for a single outbox pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

pub struct OutboxWorker {
    pool: PgPool,
    collaborators: Collaborators,
    config: OutboxWorkerConfig,
}

impl OutboxWorker {
    pub fn new(pool: PgPool, collaborators: Collaborators, config: OutboxWorkerConfig) -> Self {
        Self {
            pool,
            collaborators,
            config,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_attempts = self.config.retry.max_attempts,
            "Starting outbox worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass().await {
                        Ok(stats) if stats.claimed > 0 => {
                            debug!(
                                claimed = stats.claimed,
                                delivered = stats.delivered,
                                retried = stats.retried,
                                dead = stats.dead,
                                "Outbox pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Outbox pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Outbox worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Deliver one batch of due messages, in enqueue order.
    pub async fn run_pass(&self) -> Result<OutboxStats, DbError> {
        let entries =
            outbox::claim_due(&self.pool, self.config.batch_size, self.config.lease).await?;
        let mut stats = OutboxStats {
            claimed: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            match self.process(&entry).await? {
                Delivery::Delivered => stats.delivered += 1,
                Delivery::Retrying => stats.retried += 1,
                Delivery::Dead => stats.dead += 1,
            }
        }

        Ok(stats)
    }

    async fn process(&self, entry: &OutboxEntry) -> Result<Delivery, DbError> {
        let attempts = entry.attempts.saturating_add(1);

        let message: OutboundMessage = match serde_json::from_value(entry.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    outbox_id = %entry.id,
                    kind = %entry.kind,
                    error = %e,
                    "Undecodable outbox payload, dead-lettering"
                );
                outbox::mark_dead(&self.pool, entry.id, attempts, &e.to_string()).await?;
                return Ok(Delivery::Dead);
            }
        };

        let error = match deliver(&self.collaborators, &message).await {
            Ok(()) => {
                outbox::mark_delivered(&self.pool, entry.id).await?;
                debug!(outbox_id = %entry.id, kind = %entry.kind, "Outbox message delivered");
                return Ok(Delivery::Delivered);
            }
            Err(e) => e.to_string(),
        };

        match self.config.retry.after_failure(attempts.max(0) as u32) {
            RetryDecision::RetryAfter(delay) => {
                let next_attempt_at =
                    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                outbox::schedule_retry(&self.pool, entry.id, attempts, next_attempt_at, &error)
                    .await?;
                warn!(
                    outbox_id = %entry.id,
                    kind = %entry.kind,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Outbox delivery failed, will retry"
                );
                Ok(Delivery::Retrying)
            }
            RetryDecision::GiveUp => {
                outbox::mark_dead(&self.pool, entry.id, attempts, &error).await?;
                error!(
                    outbox_id = %entry.id,
                    kind = %entry.kind,
                    attempts,
                    error = %error,
                    "Outbox delivery failed permanently"
                );
                Ok(Delivery::Dead)
            }
        }
    }
}

enum Delivery {
    Delivered,
    Retrying,
    Dead,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_scales_with_batch_and_timeout() {
        let config = OutboxWorkerConfig::default().with_call_timeout(Duration::from_secs(10));

        assert_eq!(config.lease, Duration::from_secs(20 * 10 + 30));
    }

    #[test]
    fn test_lease_outlives_worst_case_batch() {
        let config = OutboxWorkerConfig {
            batch_size: 50,
            ..OutboxWorkerConfig::default()
        }
        .with_call_timeout(Duration::from_secs(10));

        assert!(config.lease > Duration::from_secs(50 * 10));
    }
}
