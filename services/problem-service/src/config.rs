use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use desk_dispatch::{CapacityPolicy, RetryPolicy, DEFAULT_CAPACITY};

use crate::collaborators::{http_client, HttpNotifier, HttpUserDirectory, LogOnly, Notifier, UserDirectory};
use crate::db::DbConfig;
use crate::outbox::{Collaborators, OutboxWorkerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub capacity: CapacityPolicy,
    pub notify_url: Option<String>,
    pub user_service_url: Option<String>,
    pub collaborator_timeout: Duration,
    pub backfill_interval: Duration,
    pub backfill_batch_size: i64,
    pub outbox: OutboxWorkerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take their
    /// defaults; set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_or(&var, "DESK_LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?;
        let log_level = var("DESK_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let dev_mode = var("DESK_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let db_defaults = DbConfig::default();
        let database = DbConfig {
            database_url: var("DATABASE_URL").unwrap_or(db_defaults.database_url.clone()),
            max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", db_defaults.max_connections)?
                .max(1),
            min_connections: parse_or(&var, "DB_MIN_CONNECTIONS", db_defaults.min_connections)?,
            ..db_defaults
        };

        let capacity = CapacityPolicy::new(parse_or(&var, "DESK_TECH_CAPACITY", DEFAULT_CAPACITY)?);
        let capacity = match var("DESK_CAPACITY_OVERRIDES") {
            Some(raw) => capacity
                .with_overrides_from_str(&raw)
                .context("invalid DESK_CAPACITY_OVERRIDES")?,
            None => capacity,
        };

        let collaborator_timeout =
            Duration::from_secs(parse_or::<u64>(&var, "DESK_COLLABORATOR_TIMEOUT_SECS", 10)?);
        let backfill_interval =
            Duration::from_secs(parse_or::<u64>(&var, "DESK_BACKFILL_INTERVAL_SECS", 10)?.max(1));

        let outbox = OutboxWorkerConfig {
            interval: Duration::from_secs(parse_or::<u64>(&var, "DESK_OUTBOX_INTERVAL_SECS", 2)?.max(1)),
            retry: RetryPolicy {
                max_attempts: parse_or::<u32>(&var, "DESK_OUTBOX_MAX_ATTEMPTS", 8)?.max(1),
                ..RetryPolicy::default()
            },
            ..OutboxWorkerConfig::default()
        }
        .with_call_timeout(collaborator_timeout);

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            capacity,
            notify_url: var("DESK_NOTIFY_URL"),
            user_service_url: var("DESK_USER_SERVICE_URL"),
            collaborator_timeout,
            backfill_interval,
            backfill_batch_size: 50,
            outbox,
        })
    }

    /// HTTP clients for the configured collaborators, logging stand-ins for
    /// the rest.
    pub fn collaborators(&self) -> Result<Collaborators> {
        let client = http_client(self.collaborator_timeout)?;

        let notifier: Arc<dyn Notifier> = match &self.notify_url {
            Some(url) => Arc::new(HttpNotifier::new(client.clone(), url.as_str())),
            None => Arc::new(LogOnly),
        };
        let directory: Arc<dyn UserDirectory> = match &self.user_service_url {
            Some(url) => Arc::new(HttpUserDirectory::new(client, url.as_str())),
            None => Arc::new(LogOnly),
        };

        Ok(Collaborators::new(notifier, directory))
    }
}

fn parse_or<T>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.capacity.default_capacity(), 3);
        assert_eq!(config.notify_url, None);
        assert_eq!(config.collaborator_timeout, Duration::from_secs(10));
        assert_eq!(config.backfill_interval, Duration::from_secs(10));
        assert_eq!(config.outbox.interval, Duration::from_secs(2));
        assert_eq!(config.outbox.retry.max_attempts, 8);
        assert_eq!(config.database.database_url, "postgres://localhost/desk");
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_database_settings() {
        let config = config(&[
            ("DATABASE_URL", "postgres://desk@db/desk"),
            ("DB_MAX_CONNECTIONS", "25"),
            ("DB_MIN_CONNECTIONS", "5"),
        ])
        .unwrap();

        assert_eq!(config.database.database_url, "postgres://desk@db/desk");
        assert_eq!(config.database.max_connections, 25);
        assert_eq!(config.database.min_connections, 5);
    }

    #[test]
    fn test_outbox_lease_covers_a_full_batch() {
        let config = config(&[("DESK_COLLABORATOR_TIMEOUT_SECS", "30")]).unwrap();
        let worst_case = Duration::from_secs(30) * config.outbox.batch_size as u32;

        assert!(config.outbox.lease > worst_case);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DESK_DEV", "true"),
            ("DESK_TECH_CAPACITY", "4"),
            ("DESK_CAPACITY_OVERRIDES", "electrical=5, plumbing=2"),
            ("DESK_NOTIFY_URL", "http://notify.internal"),
            ("DESK_OUTBOX_MAX_ATTEMPTS", "3"),
        ])
        .unwrap();

        assert!(config.dev_mode);
        assert_eq!(config.capacity.capacity_for("electrical"), 5);
        assert_eq!(config.capacity.capacity_for("plumbing"), 2);
        assert_eq!(config.capacity.capacity_for("hvac"), 4);
        assert_eq!(config.notify_url.as_deref(), Some("http://notify.internal"));
        assert_eq!(config.outbox.retry.max_attempts, 3);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config(&[("DESK_NOTIFY_URL", "  "), ("DESK_TECH_CAPACITY", "")]).unwrap();

        assert_eq!(config.notify_url, None);
        assert_eq!(config.capacity.default_capacity(), 3);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("DESK_LISTEN_ADDR", "not-an-addr")]).is_err());
        assert!(config(&[("DESK_TECH_CAPACITY", "many")]).is_err());
        assert!(config(&[("DESK_CAPACITY_OVERRIDES", "electrical")]).is_err());
        assert!(config(&[("DB_MAX_CONNECTIONS", "abc")]).is_err());
        assert!(config(&[("DB_MIN_CONNECTIONS", "-1")]).is_err());
    }
}
