//! Problem desk service
//!
//! Accepts problem reports, assigns them to the least-loaded qualified
//! technician and keeps technician workload in step with problem status.

use anyhow::Result;
use desk_problem_service::{
    api,
    assignment::{AssignmentEngine, BackfillWorker},
    config,
    db::Database,
    lifecycle::LifecycleReconciler,
    outbox::OutboxWorker,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to DESK_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting problem service");
    info!(
        listen_addr = %config.listen_addr,
        default_capacity = config.capacity.default_capacity(),
        notify_configured = config.notify_url.is_some(),
        user_service_configured = config.user_service_url.is_some(),
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let collaborators = config.collaborators()?;
    let engine = AssignmentEngine::new(db.pool().clone(), config.capacity.clone());
    let lifecycle = LifecycleReconciler::new(db.pool().clone(), config.capacity.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backfill_worker = BackfillWorker::new(
        engine.clone(),
        config.backfill_interval,
        config.backfill_batch_size,
    );
    let backfill_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            backfill_worker.run(shutdown_rx).await;
        }
    });

    let outbox_worker = OutboxWorker::new(db.pool().clone(), collaborators, config.outbox.clone());
    let outbox_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            outbox_worker.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(db, engine, lifecycle);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, backfill_handle).await {
        warn!(error = %e, "Backfill worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, outbox_handle).await {
        warn!(error = %e, "Outbox worker did not shut down in time");
    }

    info!("Problem service shutdown complete");
    Ok(())
}
